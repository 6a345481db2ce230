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

//! Commit creation and history traversal

use crate::{Commit, CommitSummary, FileMode, ObjectDatabase, Oid, Signature, TreeBuilder};
use chrono::{DateTime, Utc};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Creates commits and walks history from a tip
#[derive(Debug, Clone)]
pub struct CommitGraph {
    odb: Arc<ObjectDatabase>,
}

#[derive(PartialEq, Eq)]
struct Ready {
    time: DateTime<Utc>,
    discovered: Reverse<usize>,
    oid: Oid,
}

impl Ord for Ready {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.discovered.cmp(&other.discovered))
    }
}

impl PartialOrd for Ready {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl CommitGraph {
    /// Create a graph over `odb`
    pub fn new(odb: Arc<ObjectDatabase>) -> Self {
        Self { odb }
    }

    /// Store a commit and return its id.
    ///
    /// When `committer` is `None` the author's identity is used, stamped with
    /// the current time.
    pub async fn create_commit(
        &self,
        tree: Oid,
        parents: Vec<Oid>,
        author: Signature,
        committer: Option<Signature>,
        message: &str,
    ) -> anyhow::Result<Oid> {
        let committer = committer.unwrap_or_else(|| author.at(Utc::now()));
        let commit = Commit::new(tree, parents, author, committer, message);
        let oid = commit.write(&self.odb).await?;
        debug!(commit = %oid, tree = %tree, parents = commit.parents.len(), "Created commit");
        Ok(oid)
    }

    /// Load a commit
    pub async fn read(&self, oid: &Oid) -> anyhow::Result<Commit> {
        Commit::read(&self.odb, oid).await
    }

    /// Summary of a single commit
    pub async fn summary(&self, oid: &Oid) -> anyhow::Result<CommitSummary> {
        Ok(self.read(oid).await?.to_summary(*oid))
    }

    /// History reachable from `tip`, most recent first.
    ///
    /// A commit is only emitted once all of its children reachable from `tip`
    /// have been. Among commits that are ready, the newest committer time
    /// goes first, then the one discovered first. `limit` truncates the
    /// result without changing its order.
    #[instrument(level = "debug", skip(self))]
    pub async fn log(&self, tip: &Oid, limit: Option<usize>) -> anyhow::Result<Vec<CommitSummary>> {
        let (commits, order) = self.reachable(tip).await?;

        let mut pending_children: HashMap<Oid, usize> = HashMap::new();
        for commit in commits.values() {
            for parent in unique_parents(commit) {
                *pending_children.entry(parent).or_insert(0) += 1;
            }
        }

        let discovered: HashMap<Oid, usize> =
            order.iter().enumerate().map(|(i, oid)| (*oid, i)).collect();
        let ready = |oid: Oid| -> anyhow::Result<Ready> {
            let commit = commits
                .get(&oid)
                .ok_or_else(|| anyhow::anyhow!("commit {} missing from traversal", oid))?;
            Ok(Ready {
                time: commit.committer.time,
                discovered: Reverse(discovered.get(&oid).copied().unwrap_or(usize::MAX)),
                oid,
            })
        };

        let limit = limit.unwrap_or(usize::MAX);
        let mut heap = BinaryHeap::new();
        heap.push(ready(*tip)?);
        let mut out = Vec::new();

        while let Some(next) = heap.pop() {
            if out.len() >= limit {
                break;
            }
            let commit = commits
                .get(&next.oid)
                .ok_or_else(|| anyhow::anyhow!("commit {} missing from traversal", next.oid))?;
            out.push(commit.to_summary(next.oid));

            for parent in unique_parents(commit) {
                if let Some(count) = pending_children.get_mut(&parent) {
                    *count -= 1;
                    if *count == 0 {
                        heap.push(ready(parent)?);
                    }
                }
            }
        }

        debug!(tip = %tip, count = out.len(), "Walked history");
        Ok(out)
    }

    /// Commits, in [`log`](Self::log) order, that changed the entry at `path`.
    ///
    /// A commit changed the path when its entry there differs from the entry
    /// in every one of its parents. A root commit counts when it has the path.
    pub async fn path_history(&self, tip: &Oid, path: &str) -> anyhow::Result<Vec<CommitSummary>> {
        let builder = TreeBuilder::new(Arc::clone(&self.odb));
        let mut entries: HashMap<Oid, Option<(Oid, FileMode)>> = HashMap::new();
        let mut history = Vec::new();

        for summary in self.log(tip, None).await? {
            let own = self.entry_at(&builder, &mut entries, &summary.commit, &summary.tree, path).await?;

            let changed = if summary.parents.is_empty() {
                own.is_some()
            } else {
                let mut differs_from_all = true;
                for parent in &summary.parents {
                    let parent_tree = self.read(parent).await?.tree;
                    if self.entry_at(&builder, &mut entries, parent, &parent_tree, path).await? == own {
                        differs_from_all = false;
                        break;
                    }
                }
                differs_from_all
            };

            if changed {
                history.push(summary);
            }
        }

        Ok(history)
    }

    async fn entry_at(
        &self,
        builder: &TreeBuilder,
        memo: &mut HashMap<Oid, Option<(Oid, FileMode)>>,
        commit: &Oid,
        tree: &Oid,
        path: &str,
    ) -> anyhow::Result<Option<(Oid, FileMode)>> {
        if let Some(found) = memo.get(commit) {
            return Ok(*found);
        }
        let found = builder.lookup(tree, path).await?.map(|e| (e.oid, e.mode));
        memo.insert(*commit, found);
        Ok(found)
    }

    async fn reachable(&self, tip: &Oid) -> anyhow::Result<(HashMap<Oid, Commit>, Vec<Oid>)> {
        let mut commits = HashMap::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([*tip]);

        while let Some(oid) = queue.pop_front() {
            if commits.contains_key(&oid) {
                continue;
            }
            let commit = self.read(&oid).await?;
            queue.extend(commit.parents.iter().copied());
            order.push(oid);
            commits.insert(oid, commit);
        }

        Ok((commits, order))
    }
}

fn unique_parents(commit: &Commit) -> Vec<Oid> {
    let mut seen = Vec::with_capacity(commit.parents.len());
    for parent in &commit.parents {
        if !seen.contains(parent) {
            seen.push(*parent);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ObjectType, Tree};
    use capitalgit_storage::MockBackend;
    use chrono::TimeZone;

    fn at(secs: i64) -> Signature {
        Signature::new("Ann", "ann@example.com", Utc.timestamp_opt(secs, 0).unwrap())
    }

    async fn setup() -> (Arc<ObjectDatabase>, CommitGraph, Oid) {
        let odb = Arc::new(ObjectDatabase::new(Arc::new(MockBackend::new()), 100));
        let empty = Tree::new().write(&odb).await.unwrap();
        (Arc::clone(&odb), CommitGraph::new(odb), empty)
    }

    fn messages(log: &[CommitSummary]) -> Vec<&str> {
        log.iter().map(|c| c.message.as_str()).collect()
    }

    #[tokio::test]
    async fn test_committer_defaults_to_author() {
        let (_, graph, tree) = setup().await;
        let oid = graph.create_commit(tree, vec![], at(10), None, "first").await.unwrap();
        let commit = graph.read(&oid).await.unwrap();
        assert_eq!(commit.committer.name, "Ann");
        assert_eq!(commit.committer.email, "ann@example.com");
    }

    #[tokio::test]
    async fn test_log_linear_and_limit() {
        let (_, graph, tree) = setup().await;
        let c1 = graph.create_commit(tree, vec![], at(1), Some(at(1)), "one").await.unwrap();
        let c2 = graph.create_commit(tree, vec![c1], at(2), Some(at(2)), "two").await.unwrap();
        let c3 = graph.create_commit(tree, vec![c2], at(3), Some(at(3)), "three").await.unwrap();

        let log = graph.log(&c3, None).await.unwrap();
        assert_eq!(messages(&log), vec!["three", "two", "one"]);

        let first = graph.log(&c3, Some(1)).await.unwrap();
        assert_eq!(first, log[..1].to_vec());
    }

    #[tokio::test]
    async fn test_log_is_topological_despite_clock_skew() {
        let (_, graph, tree) = setup().await;
        let root = graph.create_commit(tree, vec![], at(100), Some(at(100)), "root").await.unwrap();
        // child committed with an older clock than its parent
        let child = graph.create_commit(tree, vec![root], at(50), Some(at(50)), "child").await.unwrap();

        let log = graph.log(&child, None).await.unwrap();
        assert_eq!(messages(&log), vec!["child", "root"]);
    }

    #[tokio::test]
    async fn test_log_merge_orders_branches_by_time() {
        let (_, graph, tree) = setup().await;
        let base = graph.create_commit(tree, vec![], at(1), Some(at(1)), "base").await.unwrap();
        let ours = graph.create_commit(tree, vec![base], at(2), Some(at(2)), "ours").await.unwrap();
        let theirs = graph.create_commit(tree, vec![base], at(3), Some(at(3)), "theirs").await.unwrap();
        let merge = graph
            .create_commit(tree, vec![ours, theirs], at(4), Some(at(4)), "merge")
            .await
            .unwrap();

        let log = graph.log(&merge, None).await.unwrap();
        assert_eq!(messages(&log), vec!["merge", "theirs", "ours", "base"]);
    }

    #[tokio::test]
    async fn test_path_history() {
        let (odb, graph, empty) = setup().await;
        let builder = TreeBuilder::new(Arc::clone(&odb));
        let v1 = odb.write(ObjectType::Blob, b"v1").await.unwrap();
        let v2 = odb.write(ObjectType::Blob, b"v2").await.unwrap();
        let other = odb.write(ObjectType::Blob, b"other").await.unwrap();

        let t1 = builder.update(Some(empty), "notes.txt", Some((v1, FileMode::Regular))).await.unwrap();
        let c1 = graph.create_commit(t1, vec![], at(1), None, "add notes").await.unwrap();

        let t2 = builder.update(Some(t1), "other.txt", Some((other, FileMode::Regular))).await.unwrap();
        let c2 = graph.create_commit(t2, vec![c1], at(2), None, "add other").await.unwrap();

        let t3 = builder.update(Some(t2), "notes.txt", Some((v2, FileMode::Regular))).await.unwrap();
        let c3 = graph.create_commit(t3, vec![c2], at(3), None, "edit notes").await.unwrap();

        let history = graph.path_history(&c3, "notes.txt").await.unwrap();
        assert_eq!(messages(&history), vec!["edit notes", "add notes"]);

        let history = graph.path_history(&c3, "other.txt").await.unwrap();
        assert_eq!(messages(&history), vec!["add other"]);
    }
}
