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

//! Property-based tests
//!
//! Uses proptest to check engine properties with random data:
//! - Object store round trips and deduplication
//! - Repository write/read round trips
//! - Line diff reconstruction and symmetry
//! - Clean 3-way merges of separated edits

use capitalgit_storage::MockBackend;
use capitalgit_versioning::line_diff::{count_changes, split_lines, Edit, MyersDiff};
use capitalgit_versioning::merge_file::{merge_file, MergeFileOptions};
use capitalgit_versioning::{ObjectDatabase, ObjectType, RepositoryConfig, WorkingRepository, WriteOptions};
use proptest::prelude::*;
use std::sync::Arc;

fn arb_binary_data() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..4096)
}

fn arb_path() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z0-9_]{1,8}", 1..4).prop_map(|segments| segments.join("/"))
}

/// Short lines from a small alphabet so diffs share plenty of lines
fn arb_text() -> impl Strategy<Value = String> {
    prop::collection::vec("[abc]{0,2}", 0..20).prop_map(|lines| {
        lines.into_iter().map(|l| format!("{}\n", l)).collect()
    })
}

/// Property: storing then reading gives back the payload
#[test]
fn proptest_store_retrieve_roundtrip() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&arb_binary_data(), |data| {
            tokio::runtime::Runtime::new().unwrap().block_on(async {
                let odb = ObjectDatabase::new(Arc::new(MockBackend::new()), 100);

                let oid = odb.write(ObjectType::Blob, &data).await.unwrap();
                let again = odb.write(ObjectType::Blob, &data).await.unwrap();
                prop_assert_eq!(oid, again);

                let retrieved = odb.read(&oid).await.unwrap();
                prop_assert_eq!(&data, &retrieved);
                Ok(())
            })
        })
        .unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: a written file reads back unchanged with one history entry
    #[test]
    fn proptest_repository_write_read(path in arb_path(), content in ".{0,200}") {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let dir = tempfile::TempDir::new().unwrap();
            let repo = WorkingRepository::with_backend(
                Arc::new(MockBackend::new()),
                dir.path(),
                RepositoryConfig::new("prop"),
            )
            .await
            .unwrap();

            let commit = repo.write(&path, &content, &WriteOptions::default()).await.unwrap();
            let read = repo.read(&path, None).await.unwrap().unwrap();

            prop_assert_eq!(read.value, content.as_bytes().to_vec());
            prop_assert_eq!(read.commits.len(), 1);
            prop_assert_eq!(read.commits[0].commit, commit.commit);
            Ok(())
        })?;
    }

    /// Property: the edit script rebuilds both sides
    #[test]
    fn proptest_line_diff_reconstructs(old in arb_text(), new in arb_text()) {
        let a = split_lines(&old);
        let b = split_lines(&new);
        let edits = MyersDiff::new(&a, &b).edits();

        let mut rebuilt_old = String::new();
        let mut rebuilt_new = String::new();
        for edit in &edits {
            match *edit {
                Edit::Equal { old, new } => {
                    rebuilt_old.push_str(a[old]);
                    rebuilt_new.push_str(b[new]);
                }
                Edit::Delete { old } => rebuilt_old.push_str(a[old]),
                Edit::Insert { new } => rebuilt_new.push_str(b[new]),
            }
        }

        prop_assert_eq!(rebuilt_old, old);
        prop_assert_eq!(rebuilt_new, new);
    }

    /// Property: swapping sides swaps insertion and deletion counts
    #[test]
    fn proptest_line_diff_symmetric(old in arb_text(), new in arb_text()) {
        let a = split_lines(&old);
        let b = split_lines(&new);

        let (added, deleted) = count_changes(&MyersDiff::new(&a, &b).edits());
        let (back_added, back_deleted) = count_changes(&MyersDiff::new(&b, &a).edits());

        prop_assert_eq!((added, deleted), (back_deleted, back_added));
    }

    /// Property: edits separated by an untouched line merge without conflict
    #[test]
    fn proptest_separated_edits_merge_cleanly(len in 3usize..30, picks in (0usize..100, 0usize..100)) {
        let ours_at = picks.0 % (len - 2);
        let theirs_at = ours_at + 2 + picks.1 % (len - ours_at - 2);

        let base: Vec<String> = (0..len).map(|i| format!("line {}\n", i)).collect();
        let mut ours = base.clone();
        ours[ours_at] = "ours\n".to_string();
        let mut theirs = base.clone();
        theirs[theirs_at] = "theirs\n".to_string();
        let mut expected = base.clone();
        expected[ours_at] = "ours\n".to_string();
        expected[theirs_at] = "theirs\n".to_string();

        let merged = merge_file(&base.concat(), &ours.concat(), &theirs.concat(), &MergeFileOptions::default());

        prop_assert!(merged.is_clean());
        prop_assert_eq!(merged.content(), expected.concat());
    }

    /// Property: merging a side with itself over any base is clean
    #[test]
    fn proptest_identical_sides_merge_to_that_side(base in arb_text(), side in arb_text()) {
        let merged = merge_file(&base, &side, &side, &MergeFileOptions::default());
        prop_assert!(merged.is_clean());
        prop_assert_eq!(merged.content(), side.as_str());
    }
}
