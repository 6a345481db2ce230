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

//! Lowest Common Ancestor (LCA) search for merge base detection
//!
//! # Algorithm
//!
//! 1. Collect the full ancestry of both commits (BFS over parents)
//! 2. Intersect the two sets to get every common ancestor
//! 3. Keep the common ancestors that are not a parent of another common
//!    ancestor. The common set is closed under "parent of", so those are
//!    exactly the ancestors that no other common ancestor descends from.
//! 4. Several survivors mean a criss-cross history; [`LcaFinder::merge_base`]
//!    picks the one with the newest committer time.
//!
//! # Examples
//!
//! ```no_run
//! use capitalgit_versioning::{LcaFinder, ObjectDatabase, Oid};
//! use capitalgit_storage::MockBackend;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let odb = Arc::new(ObjectDatabase::new(Arc::new(MockBackend::new()), 100));
//!     let lca_finder = LcaFinder::new(odb);
//!
//!     let ours = Oid::hash(b"commit1");
//!     let theirs = Oid::hash(b"commit2");
//!     println!("Merge base: {:?}", lca_finder.merge_base(&ours, &theirs).await?);
//!     Ok(())
//! }
//! ```

use crate::{Commit, ObjectDatabase, Oid};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Lowest Common Ancestor finder for merge operations
#[derive(Debug, Clone)]
pub struct LcaFinder {
    odb: Arc<ObjectDatabase>,
}

/// Result of an LCA search with metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LcaResult {
    /// Best common ancestors, newest committer time first
    pub merge_bases: Vec<Oid>,

    /// Whether several unrelated best ancestors exist
    pub is_criss_cross: bool,
}

impl LcaResult {
    /// The chosen merge base, if the histories are related
    pub fn best(&self) -> Option<Oid> {
        self.merge_bases.first().copied()
    }
}

struct Node {
    parents: Vec<Oid>,
    time: DateTime<Utc>,
}

impl LcaFinder {
    /// Create a new LCA finder
    pub fn new(odb: Arc<ObjectDatabase>) -> Self {
        Self { odb }
    }

    /// The merge base of two commits, or `None` for unrelated histories.
    ///
    /// When one commit is an ancestor of the other it is the merge base.
    pub async fn merge_base(&self, oid1: &Oid, oid2: &Oid) -> anyhow::Result<Option<Oid>> {
        Ok(self.find_merge_bases(oid1, oid2).await?.best())
    }

    /// Every best common ancestor of two commits
    pub async fn find_merge_bases(&self, oid1: &Oid, oid2: &Oid) -> anyhow::Result<LcaResult> {
        debug!(oid1 = %oid1, oid2 = %oid2, "Finding merge base");

        if oid1 == oid2 {
            return Ok(LcaResult {
                merge_bases: vec![*oid1],
                is_criss_cross: false,
            });
        }

        let ancestors1 = self.ancestry(oid1).await?;
        let ancestors2 = self.ancestry(oid2).await?;

        let common: Vec<(&Oid, &Node)> = ancestors1
            .iter()
            .filter(|(oid, _)| ancestors2.contains_key(*oid))
            .collect();

        let parents_of_common: HashSet<Oid> = common
            .iter()
            .flat_map(|(_, node)| node.parents.iter().copied())
            .collect();

        let mut best: Vec<(&Oid, &Node)> = common
            .into_iter()
            .filter(|(oid, _)| !parents_of_common.contains(*oid))
            .collect();
        best.sort_by(|(a_oid, a), (b_oid, b)| b.time.cmp(&a.time).then_with(|| a_oid.cmp(b_oid)));

        let merge_bases: Vec<Oid> = best.into_iter().map(|(oid, _)| *oid).collect();
        debug!(merge_bases = ?merge_bases, count = merge_bases.len(), "Found merge base(s)");

        Ok(LcaResult {
            is_criss_cross: merge_bases.len() > 1,
            merge_bases,
        })
    }

    /// Check if `ancestor` is in the history of `descendant` (or equal to it)
    pub async fn is_ancestor(&self, ancestor: &Oid, descendant: &Oid) -> anyhow::Result<bool> {
        if ancestor == descendant {
            return Ok(true);
        }

        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(*descendant);

        while let Some(current) = queue.pop_front() {
            if current == *ancestor {
                return Ok(true);
            }
            if !visited.insert(current) {
                continue;
            }

            let commit = Commit::read(&self.odb, &current).await?;
            queue.extend(commit.parents.iter().filter(|p| !visited.contains(*p)));
        }

        Ok(false)
    }

    async fn ancestry(&self, tip: &Oid) -> anyhow::Result<HashMap<Oid, Node>> {
        let mut nodes = HashMap::new();
        let mut queue = VecDeque::new();
        queue.push_back(*tip);

        while let Some(current) = queue.pop_front() {
            if nodes.contains_key(&current) {
                continue;
            }
            let commit = Commit::read(&self.odb, &current).await?;
            queue.extend(commit.parents.iter().filter(|p| !nodes.contains_key(*p)));
            nodes.insert(
                current,
                Node {
                    parents: commit.parents,
                    time: commit.committer.time,
                },
            );
        }

        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Signature, Tree};
    use capitalgit_storage::MockBackend;
    use chrono::TimeZone;

    struct Graph {
        odb: Arc<ObjectDatabase>,
        tree: Oid,
    }

    impl Graph {
        async fn new() -> Self {
            let odb = Arc::new(ObjectDatabase::new(Arc::new(MockBackend::new()), 100));
            let tree = Tree::new().write(&odb).await.unwrap();
            Self { odb, tree }
        }

        async fn commit(&self, parents: &[Oid], secs: i64, message: &str) -> Oid {
            let sig = Signature::new("Test", "test@example.com", Utc.timestamp_opt(secs, 0).unwrap());
            Commit::new(self.tree, parents.to_vec(), sig.clone(), sig, message)
                .write(&self.odb)
                .await
                .unwrap()
        }

        fn finder(&self) -> LcaFinder {
            LcaFinder::new(Arc::clone(&self.odb))
        }
    }

    #[tokio::test]
    async fn test_lca_same_commit() {
        let g = Graph::new().await;
        let c = g.commit(&[], 1, "root").await;
        assert_eq!(g.finder().merge_base(&c, &c).await.unwrap(), Some(c));
    }

    #[tokio::test]
    async fn test_lca_linear_history() {
        let g = Graph::new().await;
        let c1 = g.commit(&[], 1, "c1").await;
        let c2 = g.commit(&[c1], 2, "c2").await;
        let c3 = g.commit(&[c2], 3, "c3").await;

        let finder = g.finder();
        assert_eq!(finder.merge_base(&c1, &c3).await.unwrap(), Some(c1));
        assert_eq!(finder.merge_base(&c3, &c2).await.unwrap(), Some(c2));
    }

    #[tokio::test]
    async fn test_lca_diverged_branches() {
        let g = Graph::new().await;
        let base = g.commit(&[], 1, "base").await;
        let ours = g.commit(&[base], 2, "ours").await;
        let theirs = g.commit(&[base], 3, "theirs").await;

        let result = g.finder().find_merge_bases(&ours, &theirs).await.unwrap();
        assert_eq!(result.merge_bases, vec![base]);
        assert!(!result.is_criss_cross);
    }

    #[tokio::test]
    async fn test_lca_unrelated_histories() {
        let g = Graph::new().await;
        let a = g.commit(&[], 1, "a").await;
        let b = g.commit(&[], 2, "b").await;
        assert_eq!(g.finder().merge_base(&a, &b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lca_after_merge() {
        let g = Graph::new().await;
        let base = g.commit(&[], 1, "base").await;
        let feature = g.commit(&[base], 2, "feature").await;
        let main = g.commit(&[base], 3, "main").await;
        let merged = g.commit(&[main, feature], 4, "merge").await;
        let feature2 = g.commit(&[feature], 5, "feature 2").await;

        assert_eq!(g.finder().merge_base(&merged, &feature2).await.unwrap(), Some(feature));
    }

    #[tokio::test]
    async fn test_lca_criss_cross_picks_newest() {
        let g = Graph::new().await;
        let base = g.commit(&[], 1, "base").await;
        let a1 = g.commit(&[base], 2, "a1").await;
        let b1 = g.commit(&[base], 3, "b1").await;
        let a2 = g.commit(&[a1, b1], 4, "a2").await;
        let b2 = g.commit(&[b1, a1], 5, "b2").await;

        let result = g.finder().find_merge_bases(&a2, &b2).await.unwrap();
        assert!(result.is_criss_cross);
        assert_eq!(result.merge_bases, vec![b1, a1]);
        assert_eq!(result.best(), Some(b1));
    }

    #[tokio::test]
    async fn test_is_ancestor() {
        let g = Graph::new().await;
        let c1 = g.commit(&[], 1, "c1").await;
        let c2 = g.commit(&[c1], 2, "c2").await;
        let side = g.commit(&[c1], 3, "side").await;

        let finder = g.finder();
        assert!(finder.is_ancestor(&c1, &c2).await.unwrap());
        assert!(!finder.is_ancestor(&c2, &c1).await.unwrap());
        assert!(!finder.is_ancestor(&side, &c2).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_commit_is_an_error() {
        let g = Graph::new().await;
        let c1 = g.commit(&[], 1, "c1").await;
        let ghost = Oid::hash(b"never written");
        assert!(g.finder().merge_base(&c1, &ghost).await.is_err());
    }
}
