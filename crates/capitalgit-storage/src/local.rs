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

//! Local filesystem storage backend
//!
//! Objects live under `<root>/objects`, sharded by the first four key
//! characters when they are alphanumeric:
//!
//! ```text
//! root/
//!   objects/
//!     3f/
//!       a1/
//!         3fa1c0...
//! ```
//!
//! A `/` inside a key is stored as `__` in the file name.
//!
//! Writes go to a uniquely named temp file in the destination directory,
//! are synced, then renamed over the final path. Two writers racing on the
//! same key each rename a complete file, so the last rename wins and no
//! reader ever observes a partial object.

use crate::error::StorageError;
use crate::{validate_key, StorageBackend};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

const OBJECTS_DIR: &str = "objects";
const TEMP_PREFIX: &str = ".tmp-";
const SLASH_ENCODING: &str = "__";

/// Filesystem-backed storage rooted at a directory
#[derive(Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Open (creating if needed) a backend rooted at `root`.
    ///
    /// # Errors
    ///
    /// Fails when `root` exists and is not a directory.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use capitalgit_storage::LocalBackend;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> anyhow::Result<()> {
    /// let storage = LocalBackend::new("/var/lib/capitalgit/recipes").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new<P: AsRef<Path>>(root: P) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();

        match fs::metadata(&root).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(StorageError::backend(format!(
                    "path exists but is not a directory: {}",
                    root.display()
                ))
                .into())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fs::create_dir_all(&root).await?;
            }
            Err(e) => return Err(StorageError::from(e).into()),
        }

        debug!(root = %root.display(), "Opened local storage backend");
        Ok(LocalBackend { root })
    }

    /// Root directory of this backend
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> anyhow::Result<PathBuf> {
        validate_key(key)?;
        let encoded = key.replace('/', SLASH_ENCODING);
        if encoded == "." || encoded == ".." || encoded.starts_with(TEMP_PREFIX) || key.contains('\\') {
            return Err(StorageError::invalid_key(format!("unsupported key: {key}")).into());
        }

        let mut path = self.root.join(OBJECTS_DIR);
        let shard: String = key.chars().take(4).collect();
        if shard.len() == 4 && shard.chars().all(|c| c.is_ascii_alphanumeric()) {
            path.push(&shard[0..2]);
            path.push(&shard[2..4]);
        }
        path.push(encoded);
        Ok(path)
    }

    async fn collect_keys(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let objects_dir = self.root.join(OBJECTS_DIR);
        let mut results = Vec::new();
        let mut pending = vec![objects_dir];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::from(e).into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                    continue;
                }

                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if name.starts_with(TEMP_PREFIX) {
                    continue;
                }

                let key = name.replace(SLASH_ENCODING, "/");
                if key.starts_with(prefix) {
                    results.push(key);
                }
            }
        }

        results.sort();
        Ok(results)
    }
}

impl fmt::Debug for LocalBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalBackend")
            .field("root", &self.root)
            .finish()
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        let path = self.object_path(key)?;

        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::not_found(key).into())
            }
            Err(e) => Err(StorageError::from(e).into()),
        }
    }

    async fn put(&self, key: &str, data: &[u8]) -> anyhow::Result<()> {
        let path = self.object_path(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::invalid_key(format!("no parent directory for {key}")))?;
        fs::create_dir_all(parent).await?;

        let temp_path = parent.join(format!("{}{}", TEMP_PREFIX, uuid::Uuid::new_v4().simple()));

        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::from(e).into());
        }

        trace!(key = %key, bytes = data.len(), "Stored object");
        Ok(())
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let path = self.object_path(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let path = self.object_path(key)?;

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from(e).into()),
        }
    }

    async fn list_objects(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        self.collect_keys(prefix).await
    }
}
