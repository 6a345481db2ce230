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

//! Per-branch transactions
//!
//! A [`BranchTransaction`] holds the branch lock for its whole lifetime, so
//! every read-modify-write of the branch ref inside it is serialized against
//! other transactions on the same branch. The lock is released when the
//! transaction is dropped, whether the work succeeded or not. Objects are
//! always stored before the ref moves, so a failed step leaves the branch
//! where it was.

use crate::error::{VersionError, VersionResult};
use crate::lock::BranchGuard;
use crate::merge::{MergeHeads, MergeOutcome};
use crate::repository::Engine;
use crate::{CommitSummary, FileMode, ObjectType, Oid, Signature};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Options for writing a file
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Target branch; the default branch when `None`
    pub branch: Option<String>,
    /// Commit author; the configured committer when `None`
    pub author: Option<Signature>,
    /// Committer; the author when `None`
    pub committer: Option<Signature>,
    /// Commit message; generated from the path when `None`
    pub message: Option<String>,
    /// File mode; keeps the existing mode (or regular) when `None`
    pub mode: Option<FileMode>,
}

impl WriteOptions {
    /// Write to `branch`
    pub fn on_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Set the author
    pub fn author(mut self, author: Signature) -> Self {
        self.author = Some(author);
        self
    }

    /// Set the committer
    pub fn committer(mut self, committer: Signature) -> Self {
        self.committer = Some(committer);
        self
    }

    /// Set the commit message
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set the file mode
    pub fn mode(mut self, mode: FileMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// Options for deleting a file
#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    /// Target branch; the default branch when `None`
    pub branch: Option<String>,
    /// Commit author; the configured committer when `None`
    pub author: Option<Signature>,
    /// Commit message; generated from the path when `None`
    pub message: Option<String>,
}

/// Options for merging a branch
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// Merge commit message
    pub message: Option<String>,
    /// Merge commit author; the configured committer when `None`
    pub author: Option<Signature>,
}

/// Exclusive scope over one branch
pub struct BranchTransaction {
    id: Uuid,
    engine: Arc<Engine>,
    guard: BranchGuard,
    started: Instant,
}

impl std::fmt::Debug for BranchTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchTransaction")
            .field("id", &self.id)
            .field("branch", &self.guard.branch())
            .finish()
    }
}

impl BranchTransaction {
    /// Wait for the lock on `branch` and open a transaction on it
    pub(crate) async fn begin(engine: Arc<Engine>, branch: &str) -> VersionResult<Self> {
        crate::branch::validate_branch_name(branch)?;
        let guard = engine.locks.acquire(branch).await;
        let id = Uuid::new_v4();
        debug!(transaction_id = %id, branch = %branch, "Began branch transaction");
        Ok(Self {
            id,
            engine,
            guard,
            started: Instant::now(),
        })
    }

    /// Transaction id, for log correlation
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Branch this transaction holds
    pub fn branch(&self) -> &str {
        self.guard.branch()
    }

    /// Current tip; `None` while the default branch is unborn
    ///
    /// # Errors
    ///
    /// [`VersionError::NotFound`] if the branch does not exist and is not the
    /// default branch.
    pub async fn tip(&self) -> VersionResult<Option<Oid>> {
        Ok(self.current_tip().await?)
    }

    /// Write `content` at `path` and commit it on this branch.
    ///
    /// # Errors
    ///
    /// [`VersionError::PathConflict`] when the path is malformed, crosses a
    /// file, or names a directory.
    #[instrument(level = "debug", skip(self, content, options), fields(branch = %self.branch()))]
    pub async fn write(
        &self,
        path: &str,
        content: impl AsRef<[u8]>,
        options: &WriteOptions,
    ) -> VersionResult<CommitSummary> {
        self.check_branch(options.branch.as_deref())?;
        Ok(self.write_inner(path, content.as_ref(), options).await?)
    }

    /// Remove the file at `path` with a commit on this branch.
    ///
    /// Returns `false` (and commits nothing) when there is no file at `path`,
    /// including when a directory segment of `path` is a file.
    ///
    /// # Errors
    ///
    /// [`VersionError::PathConflict`] when `path` names a directory.
    #[instrument(level = "debug", skip(self, options), fields(branch = %self.branch()))]
    pub async fn delete(&self, path: &str, options: &DeleteOptions) -> VersionResult<bool> {
        self.check_branch(options.branch.as_deref())?;
        Ok(self.delete_inner(path, options).await?)
    }

    /// Merge `from_branch` into this branch.
    ///
    /// Conflicts are returned as [`MergeOutcome::Conflicted`] and leave the
    /// branch untouched.
    #[instrument(level = "debug", skip(self, options), fields(branch = %self.branch()))]
    pub async fn merge(&self, from_branch: &str, options: &MergeOptions) -> VersionResult<MergeOutcome> {
        Ok(self.merge_inner(from_branch, options).await?)
    }

    async fn write_inner(
        &self,
        path: &str,
        content: &[u8],
        options: &WriteOptions,
    ) -> anyhow::Result<CommitSummary> {
        let engine = &self.engine;
        let tip = self.current_tip().await?;
        let root = self.root_tree(tip).await?;

        let mode = match options.mode {
            Some(mode) => mode,
            None => match root {
                Some(root) => engine
                    .trees
                    .lookup(&root, path)
                    .await?
                    .filter(|entry| entry.is_blob())
                    .map_or(FileMode::Regular, |entry| entry.mode),
                None => FileMode::Regular,
            },
        };

        let blob = engine.odb.write(ObjectType::Blob, content).await?;
        let tree = engine.trees.update(root, path, Some((blob, mode))).await?;

        let message = options
            .message
            .clone()
            .unwrap_or_else(|| format!("Update {}", path));
        let summary = self
            .commit(tree, tip, options.author.clone(), options.committer.clone(), &message)
            .await?;

        info!(branch = %self.branch(), path = %path, commit = %summary.commit, "Wrote file");
        Ok(summary)
    }

    async fn delete_inner(&self, path: &str, options: &DeleteOptions) -> anyhow::Result<bool> {
        let engine = &self.engine;
        let tip = self.current_tip().await?;
        let Some(root) = self.root_tree(tip).await? else {
            crate::tree_builder::split_path(path)?;
            return Ok(false);
        };

        match engine.trees.lookup(&root, path).await? {
            None => return Ok(false),
            Some(entry) if entry.is_tree() => {
                return Err(VersionError::path_conflict(path, "path is a directory").into());
            }
            Some(_) => {}
        }

        let tree = engine.trees.update(Some(root), path, None).await?;
        let message = options
            .message
            .clone()
            .unwrap_or_else(|| format!("Delete {}", path));
        let summary = self
            .commit(tree, tip, options.author.clone(), None, &message)
            .await?;

        info!(branch = %self.branch(), path = %path, commit = %summary.commit, "Deleted file");
        Ok(true)
    }

    async fn merge_inner(&self, from_branch: &str, options: &MergeOptions) -> anyhow::Result<MergeOutcome> {
        let engine = &self.engine;
        let base_tip = self.current_tip().await?;
        let branch_tip = engine.branches.get(from_branch).await?;

        let author = options
            .author
            .clone()
            .unwrap_or_else(|| engine.config.committer.signature());
        let committer = engine.config.committer.signature();

        let outcome = engine
            .merger
            .merge(
                MergeHeads {
                    base_branch: self.branch(),
                    base_tip,
                    branch: from_branch,
                    branch_tip,
                },
                author,
                Some(committer),
                options.message.as_deref(),
            )
            .await?;

        if let MergeOutcome::Merged { commit, analysis } = &outcome {
            if base_tip != Some(commit.commit) {
                engine.branches.set(self.branch(), commit.commit).await?;
                info!(
                    branch = %self.branch(),
                    from = %from_branch,
                    analysis = ?analysis,
                    commit = %commit.commit,
                    "Merged branch"
                );
            }
        }

        Ok(outcome)
    }

    async fn commit(
        &self,
        tree: Oid,
        tip: Option<Oid>,
        author: Option<Signature>,
        committer: Option<Signature>,
        message: &str,
    ) -> anyhow::Result<CommitSummary> {
        let engine = &self.engine;
        let author = author.unwrap_or_else(|| engine.config.committer.signature());
        let oid = engine
            .graph
            .create_commit(tree, tip.into_iter().collect(), author, committer, message)
            .await?;
        engine.branches.set(self.branch(), oid).await?;
        engine.graph.summary(&oid).await
    }

    async fn current_tip(&self) -> anyhow::Result<Option<Oid>> {
        self.engine.tip_of(self.branch()).await
    }

    async fn root_tree(&self, tip: Option<Oid>) -> anyhow::Result<Option<Oid>> {
        match tip {
            Some(tip) => Ok(Some(self.engine.graph.read(&tip).await?.tree)),
            None => Ok(None),
        }
    }

    fn check_branch(&self, requested: Option<&str>) -> VersionResult<()> {
        match requested {
            Some(branch) if branch != self.branch() => Err(VersionError::invalid_name(
                branch,
                format!("transaction holds branch '{}'", self.branch()),
            )),
            _ => Ok(()),
        }
    }
}

impl Drop for BranchTransaction {
    fn drop(&mut self) {
        debug!(
            transaction_id = %self.id,
            branch = %self.guard.branch(),
            held_ms = self.started.elapsed().as_millis() as u64,
            "Released branch transaction"
        );
    }
}
