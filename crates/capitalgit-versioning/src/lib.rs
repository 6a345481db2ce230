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

//! Versioned content engine for CapitalGit
//!
//! This crate stores path-addressed text content as a commit history and
//! supports branch-based collaborative editing:
//! - Content-addressable object database with SHA-256 addressing
//! - Copy-on-write trees rebuilt along a single path per write
//! - Commit graph with topological log, merge-base and path history
//! - Branch refs with per-branch transactions
//! - Myers line diff, unified patches and diff3 file merges
//! - Merge analysis (up-to-date, fast-forward, normal, unborn) with
//!   structural conflict reporting
//!
//! # Architecture
//!
//! Layers, leaf first:
//!
//! - **Object store** ([`ObjectDatabase`]): framed, hashed, optionally
//!   compressed objects over any `StorageBackend`, with an LRU cache
//! - **Trees** ([`Tree`], [`TreeBuilder`], [`TreeWalk`])
//! - **Commits** ([`Commit`], [`CommitGraph`], [`LcaFinder`])
//! - **Refs** ([`RefDatabase`], [`BranchManager`], [`BranchLocks`])
//! - **Diff and merge** ([`TreeDiffer`], [`merge_file`](merge_file::merge_file),
//!   [`MergeEngine`])
//! - **Repository** ([`WorkingRepository`], [`BranchTransaction`],
//!   [`ProposalBook`])
//!
//! # Examples
//!
//! ```no_run
//! use capitalgit_versioning::{MergeOptions, RepositoryConfig, WorkingRepository, WriteOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let repo = WorkingRepository::init("/tmp/capitalgit-handbook", RepositoryConfig::new("handbook")).await?;
//!     repo.write("welcome.md", "Hello\n", &WriteOptions::default()).await?;
//!
//!     // edit on a branch, then merge it back
//!     let branch = repo.create_branch(None, None).await?;
//!     repo.write("welcome.md", "Hello, world\n", &WriteOptions::default().on_branch(branch.name.clone()))
//!         .await?;
//!
//!     let preview = repo.merge_preview(&branch.name, None).await?;
//!     println!("{} file(s) change", preview.files_changed);
//!
//!     let outcome = repo.merge_branch(&branch.name, &MergeOptions::default()).await?;
//!     println!("{}", serde_json::to_string_pretty(&outcome)?);
//!     Ok(())
//! }
//! ```

mod branch;
mod commit;
pub mod config;
pub mod conflict;
pub mod diff;
mod error;
mod graph;
mod lca;
pub mod line_diff;
mod lock;
pub mod merge;
pub mod merge_file;
mod metrics;
mod object;
mod odb;
mod oid;
pub mod patch;
pub mod proposal;
mod refs;
mod repository;
mod transaction;
mod tree;
pub mod tree_builder;
mod walk;

pub use branch::{validate_branch_name, BranchInfo, BranchManager, GENERATED_BRANCH_PREFIX};
pub use commit::{Commit, CommitSummary, Signature};
pub use config::{Identity, RepositoryConfig};
pub use conflict::{Conflict, ConflictStats, ConflictType, MergeFile};
pub use diff::{ChangeKind, Changes, CommitDiff, FileChange, FilePatch, FileVersion, TreeDiff, TreeDiffer};
pub use error::{VersionError, VersionResult};
pub use graph::CommitGraph;
pub use lca::{LcaFinder, LcaResult};
pub use lock::{BranchGuard, BranchLocks};
pub use merge::{MergeAnalysis, MergeEngine, MergeHeads, MergeOutcome, TreeMerge};
pub use merge_file::{ConflictStyle, MergeFileOptions, MergeFileResult};
pub use metrics::OdbMetrics;
pub use object::ObjectType;
pub use odb::ObjectDatabase;
pub use oid::Oid;
pub use proposal::{Proposal, ProposalBook, ProposalStatus};
pub use refs::{branch_ref, Ref, RefDatabase, RefType, HEAD, HEADS_PREFIX};
pub use repository::{ReadResult, WorkingRepository};
pub use transaction::{BranchTransaction, DeleteOptions, MergeOptions, WriteOptions};
pub use tree::{EntryInfo, EntryKind, FileMode, Tree, TreeEntry};
pub use tree_builder::{split_path, TreeBuilder};
pub use walk::{read_all, FileValue, ListEntry, ReadMode, Snapshot, SnapshotNode, TreeWalk};
