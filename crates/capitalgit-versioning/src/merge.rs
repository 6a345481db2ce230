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

//! Merge engine
//!
//! Merging a branch into a base branch goes through one of four states:
//!
//! - **Unborn**: the base branch has no commits; it takes the branch tip.
//! - **UpToDate**: the branch tip is already reachable from the base tip.
//! - **FastForward**: the base tip is an ancestor of the branch tip.
//! - **Normal**: histories diverged; a per-file 3-way merge against the
//!   merge base produces either a two-parent merge commit or conflicts.
//!
//! The engine never moves refs itself. Callers advance the base branch to
//! the commit in [`MergeOutcome::Merged`] unless the analysis is
//! [`MergeAnalysis::UpToDate`].

use crate::conflict::{classify, merge_modes, Conflict, ConflictStats, ConflictType, Resolution};
use crate::diff::{CommitDiff, FileVersion, TreeDiffer};
use crate::error::VersionError;
use crate::graph::CommitGraph;
use crate::lca::LcaFinder;
use crate::merge_file::{merge_file, MergeFileOptions};
use crate::tree_builder::TreeBuilder;
use crate::{CommitSummary, ObjectDatabase, ObjectType, Oid, Signature};
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, trace};

/// Which path a merge took
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeAnalysis {
    /// Nothing to merge
    UpToDate,
    /// Base branch moved forward to the branch tip
    FastForward,
    /// Diverged histories merged with a new commit
    Normal,
    /// Base branch had no commits
    Unborn,
}

/// Result of a merge
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// The merge completed
    Merged {
        /// Commit the base branch points at after the merge
        commit: CommitSummary,
        /// How the merge was performed
        analysis: MergeAnalysis,
    },
    /// The 3-way merge found conflicts; nothing was written to refs
    Conflicted {
        /// Name of the merged branch
        branch: String,
        /// Base branch tip
        orig_head: CommitSummary,
        /// Merged branch tip
        merge_head: CommitSummary,
        /// Common ancestor, when the histories share one
        merge_base: Option<CommitSummary>,
        /// Conflicting paths, sorted by path
        conflicts: Vec<Conflict>,
    },
}

impl MergeOutcome {
    /// Whether the merge completed
    pub fn is_success(&self) -> bool {
        matches!(self, MergeOutcome::Merged { .. })
    }

    /// Resulting commit of a completed merge
    pub fn commit(&self) -> Option<&CommitSummary> {
        match self {
            MergeOutcome::Merged { commit, .. } => Some(commit),
            MergeOutcome::Conflicted { .. } => None,
        }
    }

    /// Merge analysis of a completed merge
    pub fn analysis(&self) -> Option<MergeAnalysis> {
        match self {
            MergeOutcome::Merged { analysis, .. } => Some(*analysis),
            MergeOutcome::Conflicted { .. } => None,
        }
    }

    /// Conflicts of a failed merge (empty on success)
    pub fn conflicts(&self) -> &[Conflict] {
        match self {
            MergeOutcome::Merged { .. } => &[],
            MergeOutcome::Conflicted { conflicts, .. } => conflicts,
        }
    }

    /// Conflict counts by type (all zero on success)
    pub fn conflict_stats(&self) -> ConflictStats {
        ConflictStats::from_conflicts(self.conflicts())
    }

    /// The resulting commit, or [`VersionError::MergeConflict`]
    pub fn into_commit(self) -> Result<CommitSummary, VersionError> {
        match self {
            MergeOutcome::Merged { commit, .. } => Ok(commit),
            MergeOutcome::Conflicted {
                branch, conflicts, ..
            } => Err(VersionError::MergeConflict {
                branch,
                count: conflicts.len(),
            }),
        }
    }
}

#[derive(Serialize)]
struct MergedView<'a> {
    success: bool,
    commit: &'a CommitSummary,
    analysis: MergeAnalysis,
}

#[derive(Serialize)]
struct ConflictedView<'a> {
    success: bool,
    orig_head: &'a CommitSummary,
    merge_head: &'a CommitSummary,
    merge_base: Option<&'a CommitSummary>,
    conflicts: &'a [Conflict],
}

impl Serialize for MergeOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MergeOutcome::Merged { commit, analysis } => MergedView {
                success: true,
                commit,
                analysis: *analysis,
            }
            .serialize(serializer),
            MergeOutcome::Conflicted {
                orig_head,
                merge_head,
                merge_base,
                conflicts,
                ..
            } => ConflictedView {
                success: false,
                orig_head,
                merge_head,
                merge_base: merge_base.as_ref(),
                conflicts,
            }
            .serialize(serializer),
        }
    }
}

/// Tips taking part in a merge
#[derive(Debug, Clone, Copy)]
pub struct MergeHeads<'a> {
    /// Branch being merged into
    pub base_branch: &'a str,
    /// Its tip; `None` when it has no commits
    pub base_tip: Option<Oid>,
    /// Branch being merged
    pub branch: &'a str,
    /// Its tip
    pub branch_tip: Oid,
}

/// Result of merging three trees
#[derive(Debug, Clone, PartialEq)]
pub struct TreeMerge {
    /// Merged root tree; `None` when there are conflicts
    pub tree: Option<Oid>,
    /// Conflicting paths, sorted by path
    pub conflicts: Vec<Conflict>,
}

enum ContentMerge {
    Clean(FileVersion),
    Conflict(Conflict),
}

enum MergedContent {
    Stored(Oid),
    Text(String),
}

/// Merge engine
#[derive(Debug, Clone)]
pub struct MergeEngine {
    odb: Arc<ObjectDatabase>,
    lca_finder: LcaFinder,
    differ: TreeDiffer,
    trees: TreeBuilder,
    graph: CommitGraph,
    file_options: MergeFileOptions,
}

impl MergeEngine {
    /// Create a merge engine
    ///
    /// `context_lines` applies to merge previews; `file_options` controls
    /// conflict markers.
    pub fn new(odb: Arc<ObjectDatabase>, context_lines: usize, file_options: MergeFileOptions) -> Self {
        Self {
            lca_finder: LcaFinder::new(Arc::clone(&odb)),
            differ: TreeDiffer::new(Arc::clone(&odb), context_lines),
            trees: TreeBuilder::new(Arc::clone(&odb)),
            graph: CommitGraph::new(Arc::clone(&odb)),
            odb,
            file_options,
        }
    }

    /// Classify a merge of `branch_tip` into `base_tip`.
    ///
    /// Returns the analysis and the merge base used for it.
    pub async fn analyze(
        &self,
        base_tip: Option<Oid>,
        branch_tip: Oid,
    ) -> anyhow::Result<(MergeAnalysis, Option<Oid>)> {
        let Some(base_tip) = base_tip else {
            return Ok((MergeAnalysis::Unborn, None));
        };

        if self.lca_finder.is_ancestor(&branch_tip, &base_tip).await? {
            return Ok((MergeAnalysis::UpToDate, Some(branch_tip)));
        }
        if self.lca_finder.is_ancestor(&base_tip, &branch_tip).await? {
            return Ok((MergeAnalysis::FastForward, Some(base_tip)));
        }

        let merge_base = self.lca_finder.merge_base(&base_tip, &branch_tip).await?;
        Ok((MergeAnalysis::Normal, merge_base))
    }

    /// Merge `heads.branch_tip` into `heads.base_tip`.
    ///
    /// A normal merge writes a commit with parents `[base_tip, branch_tip]`.
    /// Conflicts are reported in the outcome, not as an error.
    #[instrument(level = "debug", skip(self, author, committer, message), fields(base = heads.base_branch, branch = heads.branch))]
    pub async fn merge(
        &self,
        heads: MergeHeads<'_>,
        author: Signature,
        committer: Option<Signature>,
        message: Option<&str>,
    ) -> anyhow::Result<MergeOutcome> {
        let (analysis, merge_base) = self.analyze(heads.base_tip, heads.branch_tip).await?;
        debug!(?analysis, merge_base = ?merge_base, "Merge analysis");

        let base_tip = match (analysis, heads.base_tip) {
            (MergeAnalysis::Normal, Some(tip)) => tip,
            (MergeAnalysis::UpToDate, Some(tip)) => {
                return Ok(MergeOutcome::Merged {
                    commit: self.graph.summary(&tip).await?,
                    analysis,
                });
            }
            _ => {
                return Ok(MergeOutcome::Merged {
                    commit: self.graph.summary(&heads.branch_tip).await?,
                    analysis,
                });
            }
        };

        let ours = self.graph.read(&base_tip).await?;
        let theirs = self.graph.read(&heads.branch_tip).await?;
        let base_tree = match merge_base {
            Some(mb) => Some(self.graph.read(&mb).await?.tree),
            None => None,
        };

        let merged = self
            .merge_trees(base_tree.as_ref(), &ours.tree, &theirs.tree)
            .await?;

        let Some(tree) = merged.tree else {
            let stats = ConflictStats::from_conflicts(&merged.conflicts);
            info!(
                branch = heads.branch,
                conflicts = stats.total,
                modify_modify = stats.modify_modify,
                add_add = stats.add_add,
                delete_modify = stats.delete_modify + stats.modify_delete,
                file_directory = stats.file_directory,
                "Merge produced conflicts"
            );
            let merge_base = match merge_base {
                Some(mb) => Some(self.graph.summary(&mb).await?),
                None => None,
            };
            return Ok(MergeOutcome::Conflicted {
                branch: heads.branch.to_string(),
                orig_head: ours.to_summary(base_tip),
                merge_head: theirs.to_summary(heads.branch_tip),
                merge_base,
                conflicts: merged.conflicts,
            });
        };

        let default_message = format!("Merge branch '{}' into {}", heads.branch, heads.base_branch);
        let commit = self
            .graph
            .create_commit(
                tree,
                vec![base_tip, heads.branch_tip],
                author,
                committer,
                message.unwrap_or(&default_message),
            )
            .await?;
        info!(commit = %commit, branch = heads.branch, "Created merge commit");

        Ok(MergeOutcome::Merged {
            commit: self.graph.summary(&commit).await?,
            analysis,
        })
    }

    /// Diff a branch tip against its merge base with `base_tip`.
    ///
    /// Without a merge base (or without a base tip) the diff starts from the
    /// empty tree.
    pub async fn preview(&self, base_tip: Option<Oid>, branch_tip: Oid) -> anyhow::Result<CommitDiff> {
        let merge_base = match base_tip {
            Some(tip) => self.lca_finder.merge_base(&tip, &branch_tip).await?,
            None => None,
        };
        self.differ.diff_commits(merge_base.as_ref(), &branch_tip).await
    }

    /// 3-way merge of root trees.
    ///
    /// Every path changed on either side since `base` is resolved; the result
    /// is built on top of `ours` so untouched subtrees are shared.
    #[instrument(level = "debug", skip(self))]
    pub async fn merge_trees(
        &self,
        base: Option<&Oid>,
        ours: &Oid,
        theirs: &Oid,
    ) -> anyhow::Result<TreeMerge> {
        let ours_diff = self.differ.diff_trees(base, Some(ours)).await?;
        let theirs_diff = self.differ.diff_trees(base, Some(theirs)).await?;

        let paths: BTreeSet<&str> = ours_diff.paths().chain(theirs_diff.paths()).collect();
        let mut conflicts = Vec::new();
        let mut updates: Vec<(String, Option<FileVersion>, [Option<FileVersion>; 3])> = Vec::new();

        for path in paths {
            let ours_change = ours_diff.get(path);
            let theirs_change = theirs_diff.get(path);
            let ancestor = ours_change.or(theirs_change).and_then(|c| c.old);
            let ours_version = ours_change.map_or(ancestor, |c| c.new);
            let theirs_version = theirs_change.map_or(ancestor, |c| c.new);
            let sides = [ancestor, ours_version, theirs_version];

            let resolved = match classify(ancestor, ours_version, theirs_version) {
                Resolution::Take(version) => version,
                Resolution::MergeContent { base, ours, theirs } => {
                    match self.merge_content(path, base, ours, theirs).await? {
                        ContentMerge::Clean(version) => Some(version),
                        ContentMerge::Conflict(conflict) => {
                            conflicts.push(conflict);
                            continue;
                        }
                    }
                }
                Resolution::Conflict(kind) => {
                    conflicts.push(self.conflict(path, kind, sides).await?);
                    continue;
                }
            };

            trace!(path, changed = resolved != ours_version, "Resolved path");
            if resolved != ours_version {
                updates.push((path.to_string(), resolved, sides));
            }
        }

        // deletions first, so a file can replace a directory emptied here
        updates.sort_by_key(|(_, version, _)| version.is_some());

        let mut root = *ours;
        for (path, version, sides) in updates {
            match self
                .trees
                .update(Some(root), &path, version.map(|v| (v.oid, v.mode)))
                .await
            {
                Ok(oid) => root = oid,
                Err(err) if is_path_conflict(&err) => {
                    let [ancestor, ours_version, _] = sides;
                    conflicts.push(
                        self.conflict(&path, ConflictType::FileDirectory, [ancestor, ours_version, version])
                            .await?,
                    );
                }
                Err(err) => return Err(err),
            }
        }

        conflicts.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(conflicts = conflicts.len(), "Tree merge finished");

        Ok(TreeMerge {
            tree: conflicts.is_empty().then_some(root),
            conflicts,
        })
    }

    async fn merge_content(
        &self,
        path: &str,
        base: FileVersion,
        ours: FileVersion,
        theirs: FileVersion,
    ) -> anyhow::Result<ContentMerge> {
        let mode = merge_modes(base.mode, ours.mode, theirs.mode);

        let content = if ours.oid == theirs.oid || theirs.oid == base.oid {
            MergedContent::Stored(ours.oid)
        } else if ours.oid == base.oid {
            MergedContent::Stored(theirs.oid)
        } else {
            let result = merge_file(
                &self.text(&base.oid).await?,
                &self.text(&ours.oid).await?,
                &self.text(&theirs.oid).await?,
                &self.file_options,
            );
            if !result.is_clean() {
                return Ok(ContentMerge::Conflict(Conflict::new(
                    path,
                    ConflictType::ModifyModify,
                    Some(base),
                    Some(ours),
                    Some(theirs),
                    result.into_content(),
                )));
            }
            MergedContent::Text(result.into_content())
        };

        let Some(mode) = mode else {
            let text = match content {
                MergedContent::Text(text) => text,
                MergedContent::Stored(oid) => self.text(&oid).await?,
            };
            return Ok(ContentMerge::Conflict(Conflict::new(
                path,
                ConflictType::ModifyModify,
                Some(base),
                Some(ours),
                Some(theirs),
                text,
            )));
        };

        let oid = match content {
            MergedContent::Stored(oid) => oid,
            MergedContent::Text(text) => self.odb.write(ObjectType::Blob, text.as_bytes()).await?,
        };
        Ok(ContentMerge::Clean(FileVersion { oid, mode }))
    }

    async fn conflict(
        &self,
        path: &str,
        kind: ConflictType,
        [ancestor, ours, theirs]: [Option<FileVersion>; 3],
    ) -> anyhow::Result<Conflict> {
        let merged = merge_file(
            &self.optional_text(ancestor).await?,
            &self.optional_text(ours).await?,
            &self.optional_text(theirs).await?,
            &self.file_options,
        );
        Ok(Conflict::new(path, kind, ancestor, ours, theirs, merged.into_content()))
    }

    async fn optional_text(&self, version: Option<FileVersion>) -> anyhow::Result<String> {
        match version {
            Some(version) => self.text(&version.oid).await,
            None => Ok(String::new()),
        }
    }

    async fn text(&self, oid: &Oid) -> anyhow::Result<String> {
        let bytes = self.odb.read_typed(oid, ObjectType::Blob).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn is_path_conflict(err: &anyhow::Error) -> bool {
    err.downcast_ref::<VersionError>()
        .is_some_and(VersionError::is_path_conflict)
}
