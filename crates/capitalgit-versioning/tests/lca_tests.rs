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

//! Merge base tests
//!
//! Histories covered:
//! - Linear and divergent
//! - Diamonds and merge commits
//! - Criss-cross (several best ancestors)
//! - Unrelated roots
//! - Deep chains

use capitalgit_storage::MockBackend;
use capitalgit_versioning::{CommitGraph, LcaFinder, ObjectDatabase, Oid, Signature};
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::Instant;

struct History {
    graph: CommitGraph,
    lca: LcaFinder,
}

impl History {
    fn new() -> Self {
        let odb = Arc::new(ObjectDatabase::new(Arc::new(MockBackend::new()), 100));
        Self {
            graph: CommitGraph::new(Arc::clone(&odb)),
            lca: LcaFinder::new(odb),
        }
    }

    /// Commit with a fixed time so ordering between bases is deterministic
    async fn commit(&self, message: &str, parents: Vec<Oid>, secs: i64) -> Oid {
        let sig = Signature::new(
            "Test Author",
            "test@example.com",
            Utc.timestamp_opt(secs, 0).unwrap(),
        );
        self.graph
            .create_commit(Oid::hash(b"tree"), parents, sig.clone(), Some(sig), message)
            .await
            .unwrap()
    }
}

/// A <- B <- C
#[tokio::test]
async fn test_lca_linear_history() {
    let h = History::new();
    let a = h.commit("A", vec![], 1).await;
    let b = h.commit("B", vec![a], 2).await;
    let c = h.commit("C", vec![b], 3).await;

    assert_eq!(h.lca.merge_base(&b, &c).await.unwrap(), Some(b));
    assert_eq!(h.lca.merge_base(&c, &a).await.unwrap(), Some(a));
    assert!(h.lca.is_ancestor(&a, &c).await.unwrap());
    assert!(!h.lca.is_ancestor(&c, &a).await.unwrap());
}

///     C
///    /
///   A
///    \
///     D
#[tokio::test]
async fn test_lca_divergent_branches() {
    let h = History::new();
    let a = h.commit("A", vec![], 1).await;
    let c = h.commit("C", vec![a], 2).await;
    let d = h.commit("D", vec![a], 3).await;

    let result = h.lca.find_merge_bases(&c, &d).await.unwrap();
    assert_eq!(result.merge_bases, vec![a]);
    assert!(!result.is_criss_cross);
}

///     B
///    / \
///   A   D
///    \ /
///     C
#[tokio::test]
async fn test_lca_diamond_merge() {
    let h = History::new();
    let a = h.commit("A", vec![], 1).await;
    let b = h.commit("B", vec![a], 2).await;
    let c = h.commit("C", vec![a], 3).await;
    let d = h.commit("D", vec![b, c], 4).await;
    let e = h.commit("E", vec![c], 5).await;

    // c is reachable from d, so it is the base of d and e
    assert_eq!(h.lca.merge_base(&d, &e).await.unwrap(), Some(c));
    assert_eq!(h.lca.merge_base(&d, &b).await.unwrap(), Some(b));
}

/// Feature merged into main, then both advance again
#[tokio::test]
async fn test_lca_after_previous_merge() {
    let h = History::new();
    let a = h.commit("A", vec![], 1).await;
    let f1 = h.commit("F1", vec![a], 2).await;
    let m1 = h.commit("M1", vec![a], 3).await;
    let merge = h.commit("Merge F1", vec![m1, f1], 4).await;
    let f2 = h.commit("F2", vec![f1], 5).await;
    let m2 = h.commit("M2", vec![merge], 6).await;

    assert_eq!(h.lca.merge_base(&m2, &f2).await.unwrap(), Some(f1));
}

/// A <- B, A <- C, D = merge(B, C), E = merge(C, B)
#[tokio::test]
async fn test_lca_criss_cross_prefers_newest() {
    let h = History::new();
    let a = h.commit("A", vec![], 1).await;
    let b = h.commit("B", vec![a], 2).await;
    let c = h.commit("C", vec![a], 3).await;
    let d = h.commit("D", vec![b, c], 4).await;
    let e = h.commit("E", vec![c, b], 5).await;

    let result = h.lca.find_merge_bases(&d, &e).await.unwrap();
    assert!(result.is_criss_cross);
    assert_eq!(result.merge_bases, vec![c, b]);
    assert_eq!(result.best(), Some(c));
}

#[tokio::test]
async fn test_lca_identical_commits() {
    let h = History::new();
    let a = h.commit("A", vec![], 1).await;
    assert_eq!(h.lca.merge_base(&a, &a).await.unwrap(), Some(a));
}

#[tokio::test]
async fn test_lca_no_common_ancestor() {
    let h = History::new();
    let a = h.commit("A", vec![], 1).await;
    let x = h.commit("X", vec![], 2).await;

    let result = h.lca.find_merge_bases(&a, &x).await.unwrap();
    assert!(result.merge_bases.is_empty());
    assert_eq!(result.best(), None);
    assert!(!h.lca.is_ancestor(&a, &x).await.unwrap());
}

#[tokio::test]
async fn test_lca_deep_history() {
    let h = History::new();
    let root = h.commit("root", vec![], 0).await;

    let mut left = root;
    let mut right = root;
    for i in 1..=200 {
        left = h.commit(&format!("L{}", i), vec![left], i).await;
        right = h.commit(&format!("R{}", i), vec![right], i).await;
    }

    let start = Instant::now();
    assert_eq!(h.lca.merge_base(&left, &right).await.unwrap(), Some(root));
    assert!(start.elapsed().as_secs() < 5);
}
