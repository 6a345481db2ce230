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

//! Branch table
//!
//! This module provides branch management on top of [`RefDatabase`]:
//! - Creating branches under explicit or generated names
//! - Reading and moving branch tips
//! - Listing and deleting branches
//! - The default branch, recorded by the symbolic `HEAD` ref

use crate::error::VersionError;
use crate::refs::{branch_ref, HEAD, HEADS_PREFIX};
use crate::{Oid, RefDatabase, RefType};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

/// Prefix of generated branch names
pub const GENERATED_BRANCH_PREFIX: &str = "proposal-";

/// A named branch and the commit it points to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    /// Branch name (e.g. "main", "feature/auth")
    pub name: String,

    /// Tip commit
    pub target: Oid,
}

/// Branch operations manager
///
/// # Examples
///
/// ```no_run
/// use capitalgit_versioning::{BranchManager, Oid};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let branches = BranchManager::new("/tmp/capitalgit", "main");
///     branches.initialize().await?;
///
///     let commit_oid = Oid::hash(b"commit data");
///     branches.set("main", commit_oid).await?;
///
///     let feature = branches.create("feature/auth", commit_oid).await?;
///     let generated = branches.create_generated(commit_oid).await?;
///     println!("{} and {}", feature.name, generated.name);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct BranchManager {
    refdb: RefDatabase,
    default_branch: String,
    // held from the name check to the ref write
    creating: Arc<AsyncMutex<()>>,
}

impl BranchManager {
    /// Branch manager over refs stored under `root`
    pub fn new<P: AsRef<Path>>(root: P, default_branch: impl Into<String>) -> Self {
        Self {
            refdb: RefDatabase::new(root),
            default_branch: default_branch.into(),
            creating: Arc::default(),
        }
    }

    /// Reopen a branch table, reading the default branch from `HEAD`
    pub async fn open<P: AsRef<Path>>(root: P) -> anyhow::Result<Self> {
        let refdb = RefDatabase::new(root);
        let head = refdb.read(HEAD).await?;

        let default_branch = match (head.ref_type, head.target.as_deref()) {
            (RefType::Symbolic, Some(target)) => target
                .strip_prefix(HEADS_PREFIX)
                .ok_or_else(|| anyhow::anyhow!("HEAD points outside {}: {}", HEADS_PREFIX, target))?
                .to_string(),
            _ => anyhow::bail!("HEAD is not a symbolic reference"),
        };

        Ok(Self {
            refdb,
            default_branch,
            creating: Arc::default(),
        })
    }

    /// Record the default branch in `HEAD`. The branch itself stays unborn.
    pub async fn initialize(&self) -> anyhow::Result<()> {
        validate_branch_name(&self.default_branch)?;
        self.refdb
            .update_symbolic(HEAD, &branch_ref(&self.default_branch))
            .await?;
        info!(default_branch = %self.default_branch, "Initialized branch table");
        Ok(())
    }

    /// Name of the default branch
    pub fn default_branch(&self) -> &str {
        &self.default_branch
    }

    /// Underlying reference database
    pub fn refdb(&self) -> &RefDatabase {
        &self.refdb
    }

    /// Create a branch at `target`.
    ///
    /// Concurrent creations through clones of this manager are serialized,
    /// so of two calls racing for one name exactly one succeeds.
    ///
    /// # Errors
    ///
    /// [`VersionError::InvalidName`] if the name is malformed, already taken,
    /// or would nest inside (or around) an existing branch.
    pub async fn create(&self, name: &str, target: Oid) -> anyhow::Result<BranchInfo> {
        validate_branch_name(name)?;
        let _creating = self.creating.lock().await;

        for existing in self.names().await? {
            let reason = if existing == name {
                Some("branch already exists".to_string())
            } else if existing.starts_with(&format!("{}/", name))
                || name.starts_with(&format!("{}/", existing))
            {
                Some(format!("conflicts with existing branch '{}'", existing))
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(VersionError::invalid_name(name, reason).into());
            }
        }

        self.refdb.update(&branch_ref(name), target).await?;
        info!(branch = %name, target = %target, "Created branch");
        Ok(BranchInfo {
            name: name.to_string(),
            target,
        })
    }

    /// Create a branch at `target` under a fresh generated name
    pub async fn create_generated(&self, target: Oid) -> anyhow::Result<BranchInfo> {
        loop {
            let name = format!("{}{}", GENERATED_BRANCH_PREFIX, uuid::Uuid::new_v4().simple());
            if !self.exists(&name).await? {
                return self.create(&name, target).await;
            }
            debug!(branch = %name, "Generated branch name already taken");
        }
    }

    /// Tip of a branch, `NotFound` if it does not exist
    pub async fn get(&self, name: &str) -> anyhow::Result<Oid> {
        self.tip(name)
            .await?
            .ok_or_else(|| VersionError::not_found(format!("branch {}", name)).into())
    }

    /// Tip of a branch, `None` if it does not exist (or is still unborn)
    pub async fn tip(&self, name: &str) -> anyhow::Result<Option<Oid>> {
        validate_branch_name(name)?;
        self.refdb.try_resolve(&branch_ref(name)).await
    }

    /// Move a branch to `target`, creating it if needed (last writer wins)
    pub async fn set(&self, name: &str, target: Oid) -> anyhow::Result<()> {
        validate_branch_name(name)?;
        self.refdb.update(&branch_ref(name), target).await?;
        debug!(branch = %name, target = %target, "Moved branch");
        Ok(())
    }

    /// Whether the branch has a tip
    pub async fn exists(&self, name: &str) -> anyhow::Result<bool> {
        validate_branch_name(name)?;
        self.refdb.exists(&branch_ref(name)).await
    }

    /// Delete a branch. The default branch cannot be deleted.
    pub async fn delete(&self, name: &str) -> anyhow::Result<()> {
        if name == self.default_branch {
            return Err(VersionError::invalid_name(name, "cannot delete the default branch").into());
        }
        validate_branch_name(name)?;
        self.refdb.delete(&branch_ref(name)).await?;
        info!(branch = %name, "Deleted branch");
        Ok(())
    }

    /// All branches with a tip, sorted by name
    pub async fn list(&self) -> anyhow::Result<Vec<BranchInfo>> {
        let mut branches = Vec::new();
        for ref_name in self.refdb.list(HEADS_PREFIX).await? {
            let Some(name) = ref_name.strip_prefix(HEADS_PREFIX) else {
                continue;
            };
            let target = self.refdb.resolve(&ref_name).await?;
            branches.push(BranchInfo {
                name: name.to_string(),
                target,
            });
        }
        Ok(branches)
    }

    async fn names(&self) -> anyhow::Result<Vec<String>> {
        Ok(self
            .refdb
            .list(HEADS_PREFIX)
            .await?
            .into_iter()
            .filter_map(|r| r.strip_prefix(HEADS_PREFIX).map(str::to_string))
            .collect())
    }
}

/// Check a branch name, returning [`VersionError::InvalidName`] if rejected.
///
/// Names may contain `/` separated segments but no empty segment, no segment
/// starting with `.`, no `..`, no backslash, and no whitespace or control
/// characters. They may not start with `-` or end with `.` or `/`.
pub fn validate_branch_name(name: &str) -> anyhow::Result<()> {
    let reason = if name.is_empty() {
        Some("branch name cannot be empty")
    } else if name.starts_with('-') || name.starts_with('.') || name.starts_with('/') {
        Some("branch name cannot start with '-', '.' or '/'")
    } else if name.ends_with('.') || name.ends_with('/') {
        Some("branch name cannot end with '.' or '/'")
    } else if name.contains("..") || name.contains("//") || name.contains('\\') {
        Some("branch name contains invalid sequences")
    } else if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        Some("branch name contains whitespace or control characters")
    } else if name.split('/').any(|segment| segment.starts_with('.')) {
        Some("branch name segment cannot start with '.'")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(VersionError::invalid_name(name, reason).into()),
        None => Ok(()),
    }
}
