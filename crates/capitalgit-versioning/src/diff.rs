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

//! Tree and commit diffing
//!
//! Compares snapshots file by file over full paths, recursing into
//! subdirectories whose ids differ and skipping those that match.
//!
//! # Change Classification
//!
//! - **Added**: file exists in target but not in source
//! - **Deleted**: file exists in source but not in target
//! - **Modified**: file exists in both with different content or mode
//!
//! Renames are not detected; they show up as a deletion plus an addition.

use crate::patch::{unified_patch, PatchSide};
use crate::{Commit, FileMode, ObjectDatabase, ObjectType, Oid, Tree, TreeEntry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument, trace};

/// A file's content and mode at some point in history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileVersion {
    /// Blob id
    pub oid: Oid,
    /// File mode
    pub mode: FileMode,
}

impl From<&TreeEntry> for FileVersion {
    fn from(entry: &TreeEntry) -> Self {
        FileVersion {
            oid: entry.oid,
            mode: entry.mode,
        }
    }
}

/// Structural change of one file path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    /// Full slash-delimited path
    pub path: String,
    /// Version in the source tree
    pub old: Option<FileVersion>,
    /// Version in the target tree
    pub new: Option<FileVersion>,
}

/// Kind of a [`FileChange`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Only in target
    Added,
    /// Only in source
    Deleted,
    /// In both, different
    Modified,
}

impl FileChange {
    /// Added, deleted or modified
    pub fn kind(&self) -> ChangeKind {
        match (&self.old, &self.new) {
            (None, _) => ChangeKind::Added,
            (_, None) => ChangeKind::Deleted,
            _ => ChangeKind::Modified,
        }
    }
}

/// Two-way tree diff result, sorted by path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeDiff {
    /// One entry per changed file
    pub changes: Vec<FileChange>,
}

impl TreeDiff {
    /// No file changed
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Changed paths
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.changes.iter().map(|c| c.path.as_str())
    }

    /// Change at `path`, if any
    pub fn get(&self, path: &str) -> Option<&FileChange> {
        self.changes
            .binary_search_by(|c| c.path.as_str().cmp(path))
            .ok()
            .map(|i| &self.changes[i])
    }
}

/// Per-file patch within a [`CommitDiff`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePatch {
    /// Path in the source snapshot (absent for added files)
    pub old_path: Option<String>,
    /// Path in the target snapshot (absent for deleted files)
    pub new_path: Option<String>,
    /// Unified patch text
    pub patch: String,
    /// Added lines
    pub additions: usize,
    /// Removed lines
    pub deletions: usize,
}

/// File patches grouped by change kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changes {
    /// Files only in the target
    pub added: Vec<FilePatch>,
    /// Files in both that differ
    pub modified: Vec<FilePatch>,
    /// Files only in the source
    pub deleted: Vec<FilePatch>,
}

/// Diff between two commits
///
/// Serializes as `{commits, files_changed, additions, deletions, changes}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitDiff {
    /// `[source, target]`; the source is absent when diffing from the empty tree
    pub commits: [Option<Oid>; 2],
    /// Number of changed files
    pub files_changed: usize,
    /// Total added lines
    pub additions: usize,
    /// Total removed lines
    pub deletions: usize,
    /// Per-file patches
    pub changes: Changes,
}

/// Tree differ for comparing snapshots
#[derive(Debug, Clone)]
pub struct TreeDiffer {
    odb: Arc<ObjectDatabase>,
    context_lines: usize,
}

impl TreeDiffer {
    /// Create a tree differ rendering patches with `context_lines` of context
    pub fn new(odb: Arc<ObjectDatabase>, context_lines: usize) -> Self {
        Self { odb, context_lines }
    }

    /// Diff two trees; `None` stands for the empty tree.
    #[instrument(level = "debug", skip(self))]
    pub async fn diff_trees(&self, source: Option<&Oid>, target: Option<&Oid>) -> anyhow::Result<TreeDiff> {
        let mut changes = Vec::new();
        if source != target {
            self.diff_level(String::new(), source.copied(), target.copied(), &mut changes)
                .await?;
        }
        changes.sort_by(|a, b| a.path.cmp(&b.path));

        debug!(changed = changes.len(), "Diff complete");
        Ok(TreeDiff { changes })
    }

    /// Diff two commits into per-file patches.
    ///
    /// `source` may be `None` to diff from the empty tree.
    pub async fn diff_commits(&self, source: Option<&Oid>, target: &Oid) -> anyhow::Result<CommitDiff> {
        let source_tree = match source {
            Some(oid) => Some(Commit::read(&self.odb, oid).await?.tree),
            None => None,
        };
        let target_tree = Commit::read(&self.odb, target).await?.tree;

        let tree_diff = self.diff_trees(source_tree.as_ref(), Some(&target_tree)).await?;
        let mut diff = CommitDiff {
            commits: [source.copied(), Some(*target)],
            files_changed: tree_diff.changes.len(),
            additions: 0,
            deletions: 0,
            changes: Changes::default(),
        };

        for change in &tree_diff.changes {
            let patch = self.file_patch(change).await?;
            diff.additions += patch.additions;
            diff.deletions += patch.deletions;
            match change.kind() {
                ChangeKind::Added => diff.changes.added.push(patch),
                ChangeKind::Deleted => diff.changes.deleted.push(patch),
                ChangeKind::Modified => diff.changes.modified.push(patch),
            }
        }

        Ok(diff)
    }

    /// Render the patch of one structural change
    pub async fn file_patch(&self, change: &FileChange) -> anyhow::Result<FilePatch> {
        let old_content = self.content(change.old.as_ref()).await?;
        let new_content = self.content(change.new.as_ref()).await?;

        let rendered = unified_patch(
            patch_side(&change.path, change.old.as_ref(), &old_content),
            patch_side(&change.path, change.new.as_ref(), &new_content),
            self.context_lines,
        );

        Ok(FilePatch {
            old_path: change.old.map(|_| change.path.clone()),
            new_path: change.new.map(|_| change.path.clone()),
            patch: rendered.text,
            additions: rendered.additions,
            deletions: rendered.deletions,
        })
    }

    async fn content(&self, version: Option<&FileVersion>) -> anyhow::Result<Vec<u8>> {
        match version {
            Some(v) => self.odb.read_typed(&v.oid, ObjectType::Blob).await,
            None => Ok(Vec::new()),
        }
    }

    async fn diff_level(
        &self,
        prefix: String,
        source: Option<Oid>,
        target: Option<Oid>,
        changes: &mut Vec<FileChange>,
    ) -> anyhow::Result<()> {
        let mut pending = vec![(prefix, source, target)];

        while let Some((prefix, source, target)) = pending.pop() {
            let source_tree = self.tree_or_empty(source).await?;
            let target_tree = self.tree_or_empty(target).await?;

            let names: BTreeSet<&str> = source_tree
                .iter()
                .chain(target_tree.iter())
                .map(|e| e.name.as_str())
                .collect();

            for name in names {
                let path = join(&prefix, name);
                let old = source_tree.get_entry(name);
                let new = target_tree.get_entry(name);

                if let (Some(o), Some(n)) = (old, new) {
                    if o.oid == n.oid && o.mode == n.mode {
                        continue;
                    }
                }

                let (old_file, old_dir) = split_entry(old);
                let (new_file, new_dir) = split_entry(new);

                if old_dir.is_some() || new_dir.is_some() {
                    pending.push((path.clone(), old_dir, new_dir));
                }
                if old_file.is_some() || new_file.is_some() {
                    trace!(path = %path, "Changed");
                    changes.push(FileChange {
                        path,
                        old: old_file,
                        new: new_file,
                    });
                }
            }
        }

        Ok(())
    }

    async fn tree_or_empty(&self, oid: Option<Oid>) -> anyhow::Result<Tree> {
        match oid {
            Some(oid) => Tree::read(&self.odb, &oid).await,
            None => Ok(Tree::new()),
        }
    }
}

fn patch_side<'a>(path: &'a str, version: Option<&FileVersion>, content: &'a [u8]) -> Option<PatchSide<'a>> {
    version.map(|v| PatchSide {
        path,
        oid: v.oid,
        mode: v.mode,
        content,
    })
}

fn split_entry(entry: Option<&TreeEntry>) -> (Option<FileVersion>, Option<Oid>) {
    match entry {
        Some(e) if e.is_tree() => (None, Some(e.oid)),
        Some(e) => (Some(FileVersion::from(e)), None),
        None => (None, None),
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}
