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

//! Proposed edits
//!
//! A proposal is an edit made on its own generated branch, forked from the
//! default branch, waiting to be accepted (merged back) or abandoned.
//! Records are JSON files named after the proposal id.

use crate::error::{VersionError, VersionResult};
use crate::repository::WorkingRepository;
use crate::transaction::{MergeOptions, WriteOptions};
use crate::{Oid, Signature};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Lifecycle of a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    /// Waiting for a decision
    Open,
    /// Merged into the default branch
    Merged,
    /// Dropped without merging
    Abandoned,
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProposalStatus::Open => "open",
            ProposalStatus::Merged => "merged",
            ProposalStatus::Abandoned => "abandoned",
        })
    }
}

/// A proposed edit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Proposal id
    pub id: Uuid,
    /// Branch holding the edit
    pub branch_name: String,
    /// Default branch tip the branch was forked from
    pub base_commit: Oid,
    /// Who proposed it
    pub author: Signature,
    /// Current status
    pub status: ProposalStatus,
    /// Description, also used as the commit message
    pub message: String,
    /// When it was proposed
    pub created_at: DateTime<Utc>,
    /// Merge result once accepted
    pub merged_commit: Option<Oid>,
}

impl Proposal {
    /// Whether the proposal still awaits a decision
    pub fn is_open(&self) -> bool {
        self.status == ProposalStatus::Open
    }
}

/// Proposal records of one repository
#[derive(Debug, Clone)]
pub struct ProposalBook {
    repo: WorkingRepository,
    dir: PathBuf,
}

impl ProposalBook {
    /// Proposals of `repo`, stored under `dir`
    pub fn new<P: AsRef<Path>>(repo: WorkingRepository, dir: P) -> Self {
        Self {
            repo,
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Propose writing `content` at `path`.
    ///
    /// Forks a generated branch from the default branch tip and commits the
    /// edit there as `author`.
    ///
    /// # Errors
    ///
    /// [`VersionError::Unborn`] while the default branch has no commits.
    #[instrument(level = "debug", skip(self, content, author))]
    pub async fn propose(
        &self,
        path: &str,
        content: impl AsRef<[u8]>,
        author: Signature,
        message: &str,
    ) -> VersionResult<Proposal> {
        let branch = self.repo.create_branch(None, None).await?;

        let write = WriteOptions::default()
            .on_branch(branch.name.clone())
            .author(author.clone())
            .message(message);
        if let Err(err) = self.repo.write(path, content, &write).await {
            // no orphan branch behind a rejected edit
            self.repo.delete_branch(&branch.name).await?;
            return Err(err);
        }

        let proposal = Proposal {
            id: Uuid::new_v4(),
            branch_name: branch.name,
            base_commit: branch.target,
            author,
            status: ProposalStatus::Open,
            message: message.to_string(),
            created_at: Utc::now(),
            merged_commit: None,
        };
        if let Err(err) = self.save(&proposal).await {
            warn!(branch = %proposal.branch_name, error = %err, "Discarding branch of unsaved proposal");
            self.repo.delete_branch(&proposal.branch_name).await?;
            return Err(err.into());
        }

        info!(proposal = %proposal.id, branch = %proposal.branch_name, path = %path, "Opened proposal");
        Ok(proposal)
    }

    /// Load a proposal
    pub async fn get(&self, id: Uuid) -> VersionResult<Proposal> {
        Ok(self.load(id).await?)
    }

    /// Every proposal, oldest first
    pub async fn list(&self) -> VersionResult<Vec<Proposal>> {
        Ok(self.load_all().await?)
    }

    /// Proposals whose branch changed `path` (a file, or a directory
    /// prefix) since it was forked
    pub async fn list_for_path(&self, path: &str) -> VersionResult<Vec<Proposal>> {
        let graph = self.repo.graph()?;
        let differ = self.repo.differ()?;
        let branches = self.repo.branch_manager()?;
        let dir_prefix = format!("{}/", path.trim_end_matches('/'));

        let mut matching = Vec::new();
        for proposal in self.load_all().await? {
            let Some(tip) = branches.tip(&proposal.branch_name).await? else {
                continue;
            };
            let base_tree = graph.read(&proposal.base_commit).await?.tree;
            let tip_tree = graph.read(&tip).await?.tree;
            let changes = differ.diff_trees(Some(&base_tree), Some(&tip_tree)).await?;

            if changes.paths().any(|p| p == path || p.starts_with(&dir_prefix)) {
                matching.push(proposal);
            }
        }
        Ok(matching)
    }

    /// Proposals whose author name or email matches `who` (case-insensitive)
    pub async fn list_by_author(&self, who: &str) -> VersionResult<Vec<Proposal>> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .filter(|proposal| proposal.author.matches(who))
            .collect())
    }

    /// Merge an open proposal into the default branch.
    ///
    /// # Errors
    ///
    /// [`VersionError::MergeConflict`] when the merge conflicts; the proposal
    /// stays open. [`VersionError::InvalidState`] when it is not open.
    #[instrument(level = "debug", skip(self))]
    pub async fn accept(&self, id: Uuid) -> VersionResult<Proposal> {
        let mut proposal = self.get(id).await?;
        let _guard = self.lock(&proposal).await?;
        // re-read under the lock
        proposal = self.get(id).await?;
        ensure_open(&proposal)?;

        let options = MergeOptions {
            message: Some(format!("Merge proposal {}: {}", proposal.id, proposal.message)),
            author: Some(proposal.author.at(Utc::now())),
        };
        let commit = self
            .repo
            .merge_branch(&proposal.branch_name, &options)
            .await?
            .into_commit()?;

        proposal.status = ProposalStatus::Merged;
        proposal.merged_commit = Some(commit.commit);
        if let Err(err) = self.save(&proposal).await {
            warn!(branch = %proposal.branch_name, error = %err, "Discarding branch of unsaved proposal");
            self.repo.delete_branch(&proposal.branch_name).await?;
            return Err(err.into());
        }

        info!(proposal = %proposal.id, commit = %commit.commit, "Accepted proposal");
        Ok(proposal)
    }

    /// Abandon an open proposal. Its branch is kept.
    pub async fn abandon(&self, id: Uuid) -> VersionResult<Proposal> {
        let proposal = self.get(id).await?;
        let _guard = self.lock(&proposal).await?;
        let mut proposal = self.get(id).await?;
        ensure_open(&proposal)?;

        proposal.status = ProposalStatus::Abandoned;
        if let Err(err) = self.save(&proposal).await {
            warn!(branch = %proposal.branch_name, error = %err, "Discarding branch of unsaved proposal");
            self.repo.delete_branch(&proposal.branch_name).await?;
            return Err(err.into());
        }

        info!(proposal = %proposal.id, "Abandoned proposal");
        Ok(proposal)
    }

    // Status changes are serialized on the proposal's branch
    async fn lock(&self, proposal: &Proposal) -> VersionResult<crate::transaction::BranchTransaction> {
        self.repo.begin(&proposal.branch_name).await
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn load(&self, id: Uuid) -> anyhow::Result<Proposal> {
        let path = self.record_path(id);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(VersionError::not_found(format!("proposal {}", id)).into());
            }
            Err(err) => return Err(err.into()),
        };
        serde_json::from_slice(&data).with_context(|| format!("decoding proposal {}", id))
    }

    async fn load_all(&self) -> anyhow::Result<Vec<Proposal>> {
        let mut proposals = Vec::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(proposals),
            Err(err) => return Err(err.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(id) = name
                .to_str()
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|n| Uuid::parse_str(n).ok())
            else {
                continue;
            };
            proposals.push(self.load(id).await?);
        }

        proposals.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(proposals)
    }

    async fn save(&self, proposal: &Proposal) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let data = serde_json::to_vec_pretty(proposal)?;
        let path = self.record_path(proposal.id);
        let temp_path = self.dir.join(format!(".tmp-{}", Uuid::new_v4().simple()));

        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, &path).await
        }
        .await;

        if let Err(err) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| format!("saving proposal {}", proposal.id));
        }

        debug!(proposal = %proposal.id, status = %proposal.status, "Saved proposal");
        Ok(())
    }
}

fn ensure_open(proposal: &Proposal) -> VersionResult<()> {
    if proposal.is_open() {
        Ok(())
    } else {
        Err(VersionError::InvalidState(format!(
            "proposal {} is {}",
            proposal.id, proposal.status
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RepositoryConfig;
    use capitalgit_storage::MockBackend;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, WorkingRepository, ProposalBook) {
        let dir = TempDir::new().unwrap();
        let repo = WorkingRepository::with_backend(
            Arc::new(MockBackend::new()),
            dir.path(),
            RepositoryConfig::new("proposals"),
        )
        .await
        .unwrap();
        repo.write("guide.md", "intro\nbody\noutro\n", &WriteOptions::default())
            .await
            .unwrap();
        let book = repo.proposals().unwrap();
        (dir, repo, book)
    }

    fn bob() -> Signature {
        Signature::now("Bob", "bob@example.com")
    }

    #[tokio::test]
    async fn test_propose_and_accept() {
        let (_dir, repo, book) = setup().await;
        let proposal = book
            .propose("guide.md", "intro\nbody v2\noutro\n", bob(), "Improve body")
            .await
            .unwrap();

        assert!(proposal.is_open());
        assert!(proposal.branch_name.starts_with("proposal-"));
        assert_eq!(Some(proposal.base_commit), repo.branch_tip("main").await.unwrap());
        // the default branch is untouched until acceptance
        let current = repo.read("guide.md", None).await.unwrap().unwrap();
        assert_eq!(current.text(), Some("intro\nbody\noutro\n"));

        let accepted = book.accept(proposal.id).await.unwrap();
        assert_eq!(accepted.status, ProposalStatus::Merged);
        assert_eq!(accepted.merged_commit, repo.branch_tip("main").await.unwrap());

        let merged = repo.read("guide.md", None).await.unwrap().unwrap();
        assert_eq!(merged.text(), Some("intro\nbody v2\noutro\n"));

        let again = book.accept(proposal.id).await.unwrap_err();
        assert!(matches!(again, VersionError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_conflicting_proposal_stays_open() {
        let (_dir, _repo, book) = setup().await;
        let first = book
            .propose("guide.md", "intro\nfirst\noutro\n", bob(), "First")
            .await
            .unwrap();
        let second = book
            .propose("guide.md", "intro\nsecond\noutro\n", bob(), "Second")
            .await
            .unwrap();

        book.accept(first.id).await.unwrap();
        let err = book.accept(second.id).await.unwrap_err();
        assert!(err.is_merge_conflict());
        assert!(book.get(second.id).await.unwrap().is_open());

        let abandoned = book.abandon(second.id).await.unwrap();
        assert_eq!(abandoned.status, ProposalStatus::Abandoned);
        assert!(book.abandon(second.id).await.is_err());
    }

    #[tokio::test]
    async fn test_listing() {
        let (_dir, _repo, book) = setup().await;
        let guide = book.propose("guide.md", "new\n", bob(), "Guide").await.unwrap();
        let other = book
            .propose("faq/q1.md", "q\n", Signature::now("Cy", "cy@example.com"), "FAQ")
            .await
            .unwrap();

        let all = book.list().await.unwrap();
        assert_eq!(all.len(), 2);

        let for_guide = book.list_for_path("guide.md").await.unwrap();
        assert_eq!(for_guide.iter().map(|p| p.id).collect::<Vec<_>>(), vec![guide.id]);

        let for_faq = book.list_for_path("faq").await.unwrap();
        assert_eq!(for_faq.iter().map(|p| p.id).collect::<Vec<_>>(), vec![other.id]);

        let by_bob = book.list_by_author("BOB@example.com").await.unwrap();
        assert_eq!(by_bob.len(), 1);
        assert_eq!(by_bob[0].id, guide.id);
    }

    #[tokio::test]
    async fn test_missing_proposal() {
        let (_dir, _repo, book) = setup().await;
        let err = book.get(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_rejected_edit_leaves_no_branch() {
        let (_dir, repo, book) = setup().await;
        let err = book.propose("guide.md/inner", "x", bob(), "bad").await.unwrap_err();
        assert!(err.is_path_conflict());
        assert_eq!(repo.branches().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unsaved_proposal_leaves_no_branch() {
        let (dir, repo, book) = setup().await;
        // a file where the proposal directory should be
        std::fs::write(dir.path().join("proposals"), b"").unwrap();

        let result = book.propose("guide.md", "intro\nnew\noutro\n", bob(), "Edit").await;
        assert!(result.is_err());
        let branches = repo.branches().await.unwrap();
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].name, "main");
    }
}
