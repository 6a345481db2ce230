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

//! Working repository
//!
//! [`WorkingRepository`] is the public surface of the engine: path reads and
//! writes as commits, branches, history, diffs and merges. On disk a
//! repository root holds:
//!
//! ```text
//! <root>/config.toml
//! <root>/HEAD                 symbolic ref to the default branch
//! <root>/refs/heads/...       branch refs
//! <root>/objects/...          object store (LocalBackend)
//! <root>/proposals/<id>.json  proposal records
//! ```
//!
//! Handles are cheap to clone and share one lifecycle: after [`close`]
//! every operation fails with [`VersionError::Closed`].
//!
//! [`close`]: WorkingRepository::close

use crate::branch::BranchManager;
use crate::config::RepositoryConfig;
use crate::diff::{CommitDiff, TreeDiffer};
use crate::error::{VersionError, VersionResult};
use crate::graph::CommitGraph;
use crate::lock::BranchLocks;
use crate::merge::{MergeEngine, MergeOutcome};
use crate::proposal::ProposalBook;
use crate::transaction::{BranchTransaction, DeleteOptions, MergeOptions, WriteOptions};
use crate::tree::EntryInfo;
use crate::tree_builder::TreeBuilder;
use crate::walk::{read_all, ListEntry, ReadMode, Snapshot, TreeWalk};
use crate::{BranchInfo, CommitSummary, ObjectDatabase, ObjectType, OdbMetrics, Oid, Tree};
use anyhow::Context;
use capitalgit_storage::{LocalBackend, StorageBackend};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument};

const CONFIG_FILE: &str = "config.toml";
const OBJECTS_DIR: &str = "objects";
const PROPOSALS_DIR: &str = "proposals";

/// A file read from a branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadResult {
    /// File bytes; serialized as a string when valid UTF-8
    #[serde(serialize_with = "crate::walk::serialize_content")]
    pub value: Vec<u8>,
    /// Tree entry of the file
    pub entry: EntryInfo,
    /// Commits that changed the file, most recent first
    pub commits: Vec<CommitSummary>,
}

impl ReadResult {
    /// Content as UTF-8 text, if it is valid UTF-8
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

/// Shared engine state behind every handle and transaction
#[derive(Debug)]
pub(crate) struct Engine {
    pub(crate) root: PathBuf,
    pub(crate) config: RepositoryConfig,
    pub(crate) odb: Arc<ObjectDatabase>,
    pub(crate) branches: BranchManager,
    pub(crate) graph: CommitGraph,
    pub(crate) trees: TreeBuilder,
    pub(crate) differ: TreeDiffer,
    pub(crate) merger: MergeEngine,
    pub(crate) locks: BranchLocks,
}

impl Engine {
    fn new(
        root: PathBuf,
        config: RepositoryConfig,
        storage: Arc<dyn StorageBackend>,
        branches: BranchManager,
    ) -> Self {
        let odb = Arc::new(ObjectDatabase::with_compression(
            storage,
            config.cache_capacity,
            config.compression,
        ));
        Self {
            graph: CommitGraph::new(Arc::clone(&odb)),
            trees: TreeBuilder::new(Arc::clone(&odb)),
            differ: TreeDiffer::new(Arc::clone(&odb), config.context_lines),
            merger: MergeEngine::new(Arc::clone(&odb), config.context_lines, config.merge_file_options()),
            locks: BranchLocks::new(),
            odb,
            branches,
            config,
            root,
        }
    }

    /// Tip of `branch`; `None` for the unborn default branch
    pub(crate) async fn tip_of(&self, branch: &str) -> anyhow::Result<Option<Oid>> {
        match self.branches.tip(branch).await? {
            Some(tip) => Ok(Some(tip)),
            None if branch == self.branches.default_branch() => Ok(None),
            None => Err(VersionError::not_found(format!("branch {}", branch)).into()),
        }
    }

    /// Root tree at the tip of `branch`; the empty tree while unborn
    async fn tree_of(&self, branch: &str) -> anyhow::Result<(Option<Oid>, Oid)> {
        match self.tip_of(branch).await? {
            Some(tip) => Ok((Some(tip), self.graph.read(&tip).await?.tree)),
            None => Ok((None, Tree::new().write(&self.odb).await?)),
        }
    }
}

/// Handle on a versioned content repository
#[derive(Debug, Clone)]
pub struct WorkingRepository {
    engine: Arc<Engine>,
    open: Arc<AtomicBool>,
}

impl WorkingRepository {
    /// Create a new repository under `root`.
    ///
    /// The default branch starts unborn; the first write creates its root
    /// commit.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use capitalgit_versioning::{RepositoryConfig, WorkingRepository, WriteOptions};
    ///
    /// # async fn example() -> anyhow::Result<()> {
    /// let repo = WorkingRepository::init("/tmp/handbook", RepositoryConfig::new("handbook")).await?;
    /// repo.write("intro.md", "# Hello\n", &WriteOptions::default()).await?;
    ///
    /// let file = repo.read("intro.md", None).await?.expect("just written");
    /// assert_eq!(file.text(), Some("# Hello\n"));
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(level = "debug", skip(root, config), fields(root = %root.as_ref().display()))]
    pub async fn init<P: AsRef<Path>>(root: P, config: RepositoryConfig) -> VersionResult<Self> {
        Ok(Self::init_inner(root.as_ref(), config).await?)
    }

    async fn init_inner(root: &Path, config: RepositoryConfig) -> anyhow::Result<Self> {
        config.validate()?;
        if tokio::fs::try_exists(root.join(crate::refs::HEAD)).await? {
            anyhow::bail!("repository already initialized at {}", root.display());
        }

        tokio::fs::create_dir_all(root.join("refs").join("heads")).await?;
        tokio::fs::create_dir_all(root.join(PROPOSALS_DIR)).await?;
        config.save_toml(&root.join(CONFIG_FILE)).await?;

        let storage = Arc::new(LocalBackend::new(root.join(OBJECTS_DIR)).await?);
        let branches = BranchManager::new(root, config.default_branch.clone());
        branches.initialize().await?;

        info!(root = %root.display(), slug = %config.slug, "Initialized repository");
        Ok(Self::from_engine(Engine::new(root.to_path_buf(), config, storage, branches)))
    }

    /// Open an existing repository.
    ///
    /// Settings come from `config.toml`, overridden by `CAPITALGIT_*`
    /// environment variables; the default branch always comes from `HEAD`.
    ///
    /// # Errors
    ///
    /// [`VersionError::NotFound`] if `root` holds no repository.
    #[instrument(level = "debug", skip(root), fields(root = %root.as_ref().display()))]
    pub async fn open<P: AsRef<Path>>(root: P) -> VersionResult<Self> {
        Ok(Self::open_inner(root.as_ref()).await?)
    }

    async fn open_inner(root: &Path) -> anyhow::Result<Self> {
        let head = tokio::fs::metadata(root.join(crate::refs::HEAD)).await;
        if !head.is_ok_and(|meta| meta.is_file()) {
            return Err(VersionError::not_found(format!("repository at {}", root.display())).into());
        }

        let config_path = root.join(CONFIG_FILE);
        let mut config = if tokio::fs::try_exists(&config_path).await? {
            RepositoryConfig::from_toml(&config_path).await?
        } else {
            RepositoryConfig::default()
        };
        config.apply_env();

        let branches = BranchManager::open(root).await?;
        config.default_branch = branches.default_branch().to_string();
        config.validate()?;

        let storage = Arc::new(
            LocalBackend::new(root.join(OBJECTS_DIR))
                .await
                .context("opening object store")?,
        );

        debug!(root = %root.display(), default_branch = %config.default_branch, "Opened repository");
        Ok(Self::from_engine(Engine::new(root.to_path_buf(), config, storage, branches)))
    }

    /// Repository over an arbitrary object backend, with refs under
    /// `refs_root`. `HEAD` is created if missing.
    pub async fn with_backend<P: AsRef<Path>>(
        storage: Arc<dyn StorageBackend>,
        refs_root: P,
        config: RepositoryConfig,
    ) -> VersionResult<Self> {
        config.validate()?;
        let root = refs_root.as_ref().to_path_buf();

        let head = tokio::fs::metadata(root.join(crate::refs::HEAD)).await;
        let branches = if head.is_ok_and(|meta| meta.is_file()) {
            BranchManager::open(&root).await?
        } else {
            let branches = BranchManager::new(&root, config.default_branch.clone());
            branches.initialize().await?;
            branches
        };

        let mut config = config;
        config.default_branch = branches.default_branch().to_string();
        Ok(Self::from_engine(Engine::new(root, config, storage, branches)))
    }

    fn from_engine(engine: Engine) -> Self {
        Self {
            engine: Arc::new(engine),
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Close the handle (and every clone of it) and drop cached objects
    pub async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.engine.odb.clear_cache().await;
            info!(root = %self.engine.root.display(), "Closed repository");
        }
    }

    /// Whether the handle is still usable
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn engine(&self) -> VersionResult<&Arc<Engine>> {
        if self.is_open() {
            Ok(&self.engine)
        } else {
            Err(VersionError::Closed)
        }
    }

    /// Repository root directory
    pub fn root(&self) -> &Path {
        &self.engine.root
    }

    /// Effective configuration
    pub fn config(&self) -> &RepositoryConfig {
        &self.engine.config
    }

    /// Name of the default branch
    pub fn default_branch(&self) -> &str {
        self.engine.branches.default_branch()
    }

    /// Object store statistics
    pub async fn metrics(&self) -> VersionResult<OdbMetrics> {
        Ok(self.engine()?.odb.metrics().await)
    }

    /// Proposal workflow over this repository
    pub fn proposals(&self) -> VersionResult<ProposalBook> {
        let engine = self.engine()?;
        Ok(ProposalBook::new(self.clone(), engine.root.join(PROPOSALS_DIR)))
    }

    pub(crate) fn differ(&self) -> VersionResult<&TreeDiffer> {
        Ok(&self.engine()?.differ)
    }

    pub(crate) fn graph(&self) -> VersionResult<&CommitGraph> {
        Ok(&self.engine()?.graph)
    }

    pub(crate) fn branch_manager(&self) -> VersionResult<&BranchManager> {
        Ok(&self.engine()?.branches)
    }

    fn branch_or_default<'a>(&'a self, branch: Option<&'a str>) -> &'a str {
        branch.unwrap_or_else(|| self.default_branch())
    }

    /// Read the file at `path`.
    ///
    /// Returns `None` when nothing is there, when `path` is a directory, or
    /// while the default branch is unborn.
    #[instrument(level = "debug", skip(self))]
    pub async fn read(&self, path: &str, branch: Option<&str>) -> VersionResult<Option<ReadResult>> {
        let engine = self.engine()?;
        let branch = self.branch_or_default(branch);
        crate::tree_builder::split_path(path)?;

        let Some(tip) = engine.tip_of(branch).await? else {
            return Ok(None);
        };
        let tree = engine.graph.read(&tip).await?.tree;

        let entry = match engine.trees.lookup(&tree, path).await? {
            Some(entry) if entry.is_blob() => entry,
            _ => return Ok(None),
        };

        let value = engine.odb.read_typed(&entry.oid, ObjectType::Blob).await?;
        let commits = engine.graph.path_history(&tip, path).await?;

        Ok(Some(ReadResult {
            value,
            entry: EntryInfo::from(&entry),
            commits,
        }))
    }

    /// Write `content` at `path` as a new commit
    pub async fn write(
        &self,
        path: &str,
        content: impl AsRef<[u8]>,
        options: &WriteOptions,
    ) -> VersionResult<CommitSummary> {
        let branch = self.branch_or_default(options.branch.as_deref()).to_string();
        let tx = self.begin(&branch).await?;
        tx.write(path, content, options).await
    }

    /// Delete the file at `path` as a new commit; `false` if there was none
    pub async fn delete(&self, path: &str, options: &DeleteOptions) -> VersionResult<bool> {
        let branch = self.branch_or_default(options.branch.as_deref()).to_string();
        let tx = self.begin(&branch).await?;
        tx.delete(path, options).await
    }

    /// Every file of a branch with its content
    pub async fn read_all(&self, branch: Option<&str>, mode: ReadMode) -> VersionResult<Snapshot> {
        let engine = self.engine()?;
        let (_, tree) = engine.tree_of(self.branch_or_default(branch)).await?;
        Ok(read_all(&engine.odb, &tree, mode).await?)
    }

    /// Lazy depth-first walk over the files of a branch
    pub async fn walk(&self, branch: Option<&str>) -> VersionResult<TreeWalk> {
        let engine = self.engine()?;
        let (_, tree) = engine.tree_of(self.branch_or_default(branch)).await?;
        Ok(TreeWalk::new(Arc::clone(&engine.odb), tree))
    }

    /// Every file path of a branch with its entry, depth-first
    pub async fn list(&self, branch: Option<&str>) -> VersionResult<Vec<ListEntry>> {
        let mut walk = self.walk(branch).await?;
        Ok(walk.collect_remaining().await?)
    }

    /// History of a branch, most recent first (empty while unborn)
    pub async fn log(&self, branch: Option<&str>, limit: Option<usize>) -> VersionResult<Vec<CommitSummary>> {
        let engine = self.engine()?;
        match engine.tip_of(self.branch_or_default(branch)).await? {
            Some(tip) => Ok(engine.graph.log(&tip, limit).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Create a branch at the tip of `base` (default branch when `None`).
    ///
    /// Without a `name` a fresh `proposal-<uuid>` name is generated.
    ///
    /// # Errors
    ///
    /// [`VersionError::Unborn`] when `base` has no commits,
    /// [`VersionError::InvalidName`] when `name` is taken or malformed.
    #[instrument(level = "debug", skip(self))]
    pub async fn create_branch(&self, base: Option<&str>, name: Option<&str>) -> VersionResult<BranchInfo> {
        let engine = self.engine()?;
        let base = self.branch_or_default(base);
        let target = engine
            .tip_of(base)
            .await?
            .ok_or_else(|| VersionError::Unborn(base.to_string()))?;

        let info = match name {
            Some(name) => {
                let _guard = engine.locks.acquire(name).await;
                engine.branches.create(name, target).await?
            }
            None => engine.branches.create_generated(target).await?,
        };
        Ok(info)
    }

    /// Delete a branch other than the default branch
    pub async fn delete_branch(&self, name: &str) -> VersionResult<()> {
        let engine = self.engine()?;
        let _guard = engine.locks.acquire(name).await;
        Ok(engine.branches.delete(name).await?)
    }

    /// Merge `branch_name` into the default branch
    pub async fn merge_branch(&self, branch_name: &str, options: &MergeOptions) -> VersionResult<MergeOutcome> {
        let tx = self.begin(self.default_branch()).await?;
        tx.merge(branch_name, options).await
    }

    /// Per-file patches from commit `from` to commit `to`
    pub async fn diff(&self, from: &Oid, to: &Oid) -> VersionResult<CommitDiff> {
        let engine = self.engine()?;
        Ok(engine.differ.diff_commits(Some(from), to).await?)
    }

    /// What merging `branch_name` into `base` (default branch when `None`)
    /// would change: the diff from their merge base to the branch tip.
    pub async fn merge_preview(&self, branch_name: &str, base: Option<&str>) -> VersionResult<CommitDiff> {
        let engine = self.engine()?;
        let base_tip = engine.tip_of(self.branch_or_default(base)).await?;
        let branch_tip = engine.branches.get(branch_name).await?;
        Ok(engine.merger.preview(base_tip, branch_tip).await?)
    }

    /// Open an exclusive transaction on `branch`.
    ///
    /// Waits while another transaction holds the branch.
    pub async fn begin(&self, branch: &str) -> VersionResult<BranchTransaction> {
        let engine = self.engine()?;
        BranchTransaction::begin(Arc::clone(engine), branch).await
    }

    /// Tip of `branch`; `None` while the default branch is unborn
    pub async fn branch_tip(&self, branch: &str) -> VersionResult<Option<Oid>> {
        Ok(self.engine()?.tip_of(branch).await?)
    }

    /// All branches with commits, sorted by name
    pub async fn branches(&self) -> VersionResult<Vec<BranchInfo>> {
        Ok(self.engine()?.branches.list().await?)
    }

    /// Summary of one commit
    pub async fn commit(&self, oid: &Oid) -> VersionResult<CommitSummary> {
        Ok(self.engine()?.graph.summary(oid).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Signature;
    use capitalgit_storage::MockBackend;
    use tempfile::TempDir;

    async fn memory_repo() -> (TempDir, WorkingRepository) {
        let dir = TempDir::new().unwrap();
        let repo = WorkingRepository::with_backend(
            Arc::new(MockBackend::new()),
            dir.path(),
            RepositoryConfig::new("test"),
        )
        .await
        .unwrap();
        (dir, repo)
    }

    #[tokio::test]
    async fn test_unborn_repository() {
        let (_dir, repo) = memory_repo().await;
        assert_eq!(repo.default_branch(), "main");
        assert_eq!(repo.branch_tip("main").await.unwrap(), None);
        assert!(repo.read("a.txt", None).await.unwrap().is_none());
        assert!(repo.log(None, None).await.unwrap().is_empty());
        assert!(repo.list(None).await.unwrap().is_empty());

        let err = repo.create_branch(None, Some("feature")).await.unwrap_err();
        assert!(matches!(err, VersionError::Unborn(ref b) if b == "main"));
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (_dir, repo) = memory_repo().await;
        let author = Signature::now("Ann", "ann@example.com");
        let summary = repo
            .write(
                "docs/intro.md",
                "hello\n",
                &WriteOptions::default().author(author).message("Add intro"),
            )
            .await
            .unwrap();

        assert_eq!(summary.message, "Add intro");
        assert!(summary.parents.is_empty());
        assert_eq!(summary.committer.name, "Ann");

        let read = repo.read("docs/intro.md", None).await.unwrap().unwrap();
        assert_eq!(read.text(), Some("hello\n"));
        assert_eq!(read.entry.name, "intro.md");
        assert_eq!(read.commits.len(), 1);
        assert_eq!(read.commits[0].commit, summary.commit);

        // directories are not files
        assert!(repo.read("docs", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_default_author_is_configured_committer() {
        let (_dir, repo) = memory_repo().await;
        let summary = repo.write("a", "a", &WriteOptions::default()).await.unwrap();
        assert_eq!(summary.author.name, "CapitalGit");
        assert_eq!(summary.message, "Update a");
    }

    #[tokio::test]
    async fn test_delete_semantics() {
        let (_dir, repo) = memory_repo().await;
        let none = DeleteOptions::default();
        assert!(!repo.delete("missing.txt", &none).await.unwrap());

        repo.write("dir/file.txt", "x", &WriteOptions::default()).await.unwrap();
        assert!(!repo.delete("dir/file.txt/nested", &none).await.unwrap());
        assert!(repo.delete("dir", &none).await.unwrap_err().is_path_conflict());

        assert!(repo.delete("dir/file.txt", &none).await.unwrap());
        assert!(repo.read("dir/file.txt", None).await.unwrap().is_none());
        assert!(!repo.delete("dir/file.txt", &none).await.unwrap());
        assert_eq!(repo.log(None, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_closed_handle_rejects_operations() {
        let (_dir, repo) = memory_repo().await;
        let clone = repo.clone();
        repo.close().await;

        assert!(!clone.is_open());
        assert!(matches!(clone.read("a", None).await, Err(VersionError::Closed)));
        assert!(matches!(
            clone.write("a", "a", &WriteOptions::default()).await,
            Err(VersionError::Closed)
        ));
        assert!(matches!(clone.begin("main").await, Err(VersionError::Closed)));
    }

    #[tokio::test]
    async fn test_unknown_branch_is_not_found() {
        let (_dir, repo) = memory_repo().await;
        let err = repo.read("a", Some("nope")).await.unwrap_err();
        assert!(err.is_not_found());

        let err = repo
            .write("a", "a", &WriteOptions::default().on_branch("nope"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_init_and_reopen() {
        let dir = TempDir::new().unwrap();
        let mut config = RepositoryConfig::new("persisted");
        config.default_branch = "trunk".into();

        let repo = WorkingRepository::init(dir.path(), config).await.unwrap();
        let written = repo.write("a.txt", "a\n", &WriteOptions::default()).await.unwrap();
        repo.close().await;

        let reopened = WorkingRepository::open(dir.path()).await.unwrap();
        assert_eq!(reopened.default_branch(), "trunk");
        assert_eq!(reopened.config().slug, "persisted");
        assert_eq!(reopened.branch_tip("trunk").await.unwrap(), Some(written.commit));

        assert!(WorkingRepository::init(dir.path(), RepositoryConfig::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_open_missing_repository() {
        let dir = TempDir::new().unwrap();
        let err = WorkingRepository::open(dir.path().join("absent")).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
