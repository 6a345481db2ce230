// CapitalGit - Versioned content engine
// Copyright (C) 2025 CapitalGit Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.

//! Reference (ref) storage
//!
//! References give commits human-readable names:
//! - **Direct refs** point at a commit (`refs/heads/main`)
//! - **Symbolic refs** point at another ref (`HEAD` -> `refs/heads/main`)
//!
//! Each ref is a small text file under the repository root. Updates are
//! written to a uniquely named temp file and renamed into place, so readers
//! never observe a partial ref and concurrent writers resolve as
//! last-writer-wins.

use crate::error::VersionError;
use crate::Oid;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Namespace holding branch refs
pub const HEADS_PREFIX: &str = "refs/heads/";

/// Name of the symbolic ref recording the default branch
pub const HEAD: &str = "HEAD";

const MAX_SYMBOLIC_DEPTH: usize = 10;

/// Ref types in the reference database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefType {
    /// Points at a commit
    Direct,
    /// Points at another ref
    Symbolic,
}

/// A reference to a commit or another reference
///
/// ```
/// use capitalgit_versioning::{Oid, Ref, RefType};
///
/// let main = Ref::new_direct("refs/heads/main", Oid::hash(b"commit"));
/// assert_eq!(main.ref_type, RefType::Direct);
/// assert_eq!(main.branch_name(), Some("main"));
///
/// let head = Ref::new_symbolic("HEAD", "refs/heads/main");
/// assert_eq!(head.target.as_deref(), Some("refs/heads/main"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    /// Full ref name (e.g. "refs/heads/main", "HEAD")
    pub name: String,

    /// Direct or symbolic
    pub ref_type: RefType,

    /// Target commit of a direct ref
    pub oid: Option<Oid>,

    /// Target ref of a symbolic ref
    pub target: Option<String>,
}

impl Ref {
    /// Direct ref to a commit
    pub fn new_direct(name: impl Into<String>, oid: Oid) -> Self {
        Self {
            name: name.into(),
            ref_type: RefType::Direct,
            oid: Some(oid),
            target: None,
        }
    }

    /// Symbolic ref to another ref
    pub fn new_symbolic(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ref_type: RefType::Symbolic,
            oid: None,
            target: Some(target.into()),
        }
    }

    /// Branch name for refs under `refs/heads/`
    pub fn branch_name(&self) -> Option<&str> {
        self.name.strip_prefix(HEADS_PREFIX)
    }

    /// Check the direct/symbolic fields are consistent
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("Reference name cannot be empty");
        }

        match (self.ref_type, &self.oid, &self.target) {
            (RefType::Direct, Some(_), None) | (RefType::Symbolic, None, Some(_)) => Ok(()),
            (RefType::Direct, _, _) => anyhow::bail!("Direct reference must have an OID and no target"),
            (RefType::Symbolic, _, _) => anyhow::bail!("Symbolic reference must have a target and no OID"),
        }
    }

    /// Text form: `<hex-oid>\n` or `ref: <target>\n`
    pub fn serialize(&self) -> anyhow::Result<Vec<u8>> {
        let content = match (self.ref_type, &self.oid, &self.target) {
            (RefType::Direct, Some(oid), _) => format!("{}\n", oid.to_hex()),
            (RefType::Symbolic, _, Some(target)) => format!("ref: {}\n", target),
            _ => anyhow::bail!("Malformed reference: {}", self.name),
        };
        Ok(content.into_bytes())
    }

    /// Parse the text form of the ref called `name`
    pub fn deserialize(name: &str, data: &[u8]) -> anyhow::Result<Self> {
        let content = std::str::from_utf8(data)
            .map_err(|e| anyhow::anyhow!("Invalid UTF-8 in ref {}: {}", name, e))?
            .trim();

        if let Some(target) = content.strip_prefix("ref: ") {
            Ok(Self::new_symbolic(name, target))
        } else {
            let oid = Oid::from_hex(content)
                .map_err(|e| anyhow::anyhow!("Invalid OID in ref {}: {}", name, e))?;
            Ok(Self::new_direct(name, oid))
        }
    }
}

/// Full ref name of a branch
pub fn branch_ref(branch: &str) -> String {
    format!("{}{}", HEADS_PREFIX, branch)
}

/// File-backed reference database
///
/// ```no_run
/// use capitalgit_versioning::{Oid, Ref, RefDatabase};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let refdb = RefDatabase::new("/tmp/capitalgit");
///
///     let oid = Oid::hash(b"commit");
///     refdb.write(&Ref::new_direct("refs/heads/main", oid)).await?;
///     refdb.write(&Ref::new_symbolic("HEAD", "refs/heads/main")).await?;
///
///     assert_eq!(refdb.resolve("HEAD").await?, oid);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RefDatabase {
    root: PathBuf,
}

impl RefDatabase {
    /// Reference database rooted at `root`
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ref_path(&self, ref_name: &str) -> PathBuf {
        self.root.join(ref_name)
    }

    /// Store a reference, replacing any previous value
    pub async fn write(&self, r: &Ref) -> anyhow::Result<()> {
        r.validate()?;

        let data = r.serialize()?;
        let path = self.ref_path(&r.name);
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Reference path has no parent: {}", r.name))?;
        fs::create_dir_all(parent).await?;

        let temp_path = parent.join(format!(".tmp-{}", uuid::Uuid::new_v4().simple()));
        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(anyhow::Error::new(e).context(format!("Failed to write reference {}", r.name)));
        }

        debug!(ref_name = %r.name, ref_type = ?r.ref_type, "Reference written");
        Ok(())
    }

    /// Read a reference, failing with `NotFound` when it does not exist
    pub async fn read(&self, ref_name: &str) -> anyhow::Result<Ref> {
        self.try_read(ref_name)
            .await?
            .ok_or_else(|| VersionError::not_found(format!("reference {}", ref_name)).into())
    }

    /// Read a reference if it exists
    pub async fn try_read(&self, ref_name: &str) -> anyhow::Result<Option<Ref>> {
        match fs::read(self.ref_path(ref_name)).await {
            Ok(data) => Ok(Some(Ref::deserialize(ref_name, &data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow::Error::new(e).context(format!("Failed to read reference {}", ref_name))),
        }
    }

    /// Check if a reference exists
    pub async fn exists(&self, ref_name: &str) -> anyhow::Result<bool> {
        Ok(fs::metadata(self.ref_path(ref_name))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false))
    }

    /// Delete a reference, pruning directories it leaves empty
    pub async fn delete(&self, ref_name: &str) -> anyhow::Result<()> {
        let path = self.ref_path(ref_name);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VersionError::not_found(format!("reference {}", ref_name)).into());
            }
            Err(e) => return Err(e.into()),
        }

        let stop = self.root.join("refs");
        let mut dir = path.parent().map(Path::to_path_buf);
        while let Some(current) = dir {
            if current == stop || !current.starts_with(&stop) {
                break;
            }
            // fails once the directory still has children
            if fs::remove_dir(&current).await.is_err() {
                break;
            }
            dir = current.parent().map(Path::to_path_buf);
        }

        debug!(ref_name = %ref_name, "Reference deleted");
        Ok(())
    }

    /// Full names of all refs under `prefix` (e.g. "refs/heads/"), sorted
    pub async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let dir_path = self.root.join(prefix.trim_end_matches('/'));
        if !fs::try_exists(&dir_path).await? {
            return Ok(Vec::new());
        }

        let mut refs = Vec::new();
        let mut pending = vec![dir_path];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if entry.file_name().to_string_lossy().starts_with(".tmp-") {
                    continue;
                }
                if let Ok(rel) = path.strip_prefix(&self.root) {
                    let name: Vec<String> = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    refs.push(name.join("/"));
                }
            }
        }

        refs.sort();
        debug!(prefix = %prefix, count = refs.len(), "Listed references");
        Ok(refs)
    }

    /// Follow symbolic refs until a direct one, returning its commit
    pub async fn resolve(&self, ref_name: &str) -> anyhow::Result<Oid> {
        self.try_resolve(ref_name)
            .await?
            .ok_or_else(|| VersionError::not_found(format!("reference {}", ref_name)).into())
    }

    /// Like [`resolve`](Self::resolve), but a missing final target is `None`
    pub async fn try_resolve(&self, ref_name: &str) -> anyhow::Result<Option<Oid>> {
        let mut current = ref_name.to_string();

        for _ in 0..MAX_SYMBOLIC_DEPTH {
            let Some(r) = self.try_read(&current).await? else {
                return Ok(None);
            };
            match (r.ref_type, r.oid, r.target) {
                (RefType::Direct, Some(oid), _) => return Ok(Some(oid)),
                (RefType::Symbolic, _, Some(target)) => current = target,
                _ => anyhow::bail!("Malformed reference: {}", current),
            }
        }

        anyhow::bail!("Circular reference detected in: {}", ref_name)
    }

    /// Point a direct ref at `oid` (last writer wins)
    pub async fn update(&self, ref_name: &str, oid: Oid) -> anyhow::Result<()> {
        if let Some(existing) = self.try_read(ref_name).await? {
            if existing.ref_type != RefType::Direct {
                anyhow::bail!("Cannot update symbolic reference {} with an OID", ref_name);
            }
        }
        self.write(&Ref::new_direct(ref_name, oid)).await?;
        debug!(ref_name = %ref_name, oid = %oid, "Updated reference");
        Ok(())
    }

    /// Point a symbolic ref at `target`
    pub async fn update_symbolic(&self, ref_name: &str, target: &str) -> anyhow::Result<()> {
        self.write(&Ref::new_symbolic(ref_name, target)).await
    }
}
