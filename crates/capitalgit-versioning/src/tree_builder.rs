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

//! Copy-on-write tree updates along a single path
//!
//! Writing `a/b/c.txt` loads the trees at `""`, `a` and `a/b`, swaps the leaf
//! entry, and rewrites those three trees bottom-up. Every other subtree keeps
//! its id and is shared with the previous snapshot.

use crate::error::VersionError;
use crate::{FileMode, ObjectDatabase, Oid, Tree, TreeEntry};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Split a slash-delimited path into segments.
///
/// Empty segments (`a//b`, leading or trailing `/`), `.` and `..` are
/// rejected with [`VersionError::PathConflict`].
pub fn split_path(path: &str) -> anyhow::Result<Vec<&str>> {
    if path.is_empty() {
        return Err(VersionError::path_conflict(path, "path is empty").into());
    }

    let segments: Vec<&str> = path.split('/').collect();
    for segment in &segments {
        let reason = match *segment {
            "" => Some("empty path segment"),
            "." | ".." => Some("relative path segment"),
            s if s.contains('\0') => Some("NUL byte in path"),
            _ => None,
        };
        if let Some(reason) = reason {
            return Err(VersionError::path_conflict(path, reason).into());
        }
    }
    Ok(segments)
}

/// Rebuilds root trees for single-path writes and deletes
#[derive(Debug, Clone)]
pub struct TreeBuilder {
    odb: Arc<ObjectDatabase>,
}

impl TreeBuilder {
    /// Create a builder over `odb`
    pub fn new(odb: Arc<ObjectDatabase>) -> Self {
        Self { odb }
    }

    /// Produce a new root with `path` set to `change` (or removed when `None`).
    ///
    /// # Arguments
    ///
    /// * `root` - Current root tree; `None` is the empty tree
    /// * `path` - Slash-delimited file path
    /// * `change` - `Some((blob, mode))` to write, `None` to delete
    ///
    /// # Returns
    ///
    /// The new root tree id. Deleting a path that does not exist returns the
    /// current root unchanged. Directories emptied by a delete are removed
    /// from their parents, up to (but not including) the root.
    ///
    /// # Errors
    ///
    /// [`VersionError::PathConflict`] when a directory segment of a write is a
    /// file, or when the leaf names an existing directory.
    #[instrument(level = "debug", skip(self, change), fields(delete = change.is_none()))]
    pub async fn update(
        &self,
        root: Option<Oid>,
        path: &str,
        change: Option<(Oid, FileMode)>,
    ) -> anyhow::Result<Oid> {
        let segments = split_path(path)?;
        let (leaf, dirs) = segments
            .split_last()
            .ok_or_else(|| VersionError::path_conflict(path, "path is empty"))?;

        let root_tree = match root {
            Some(oid) => Tree::read(&self.odb, &oid).await?,
            None => Tree::new(),
        };

        // trees[i] is the directory reached after i segments
        let mut trees = Vec::with_capacity(segments.len());
        trees.push(root_tree);

        for (depth, dir) in dirs.iter().enumerate() {
            let next = match trees[depth].get_entry(dir) {
                Some(entry) if entry.is_tree() => Tree::read(&self.odb, &entry.oid).await?,
                Some(_) if change.is_none() => return self.unchanged(root).await,
                Some(_) => {
                    let prefix = segments[..=depth].join("/");
                    return Err(VersionError::path_conflict(
                        path,
                        format!("'{}' is a file", prefix),
                    )
                    .into());
                }
                None if change.is_none() => return self.unchanged(root).await,
                None => Tree::new(),
            };
            trees.push(next);
        }

        let parent = trees
            .last_mut()
            .ok_or_else(|| anyhow::anyhow!("tree stack is empty"))?;
        if parent.get_entry(leaf).is_some_and(TreeEntry::is_tree) {
            return Err(VersionError::path_conflict(path, "path is a directory").into());
        }

        match change {
            Some((oid, mode)) => parent.add_entry(TreeEntry::new(*leaf, mode, oid)),
            None => {
                if parent.remove_entry(leaf).is_none() {
                    return self.unchanged(root).await;
                }
            }
        }

        // Rewrite bottom-up, pruning directories left empty.
        let mut child: Option<Oid> = None;
        for depth in (0..trees.len()).rev() {
            let mut tree = trees.pop().ok_or_else(|| anyhow::anyhow!("tree stack is empty"))?;
            if depth < dirs.len() {
                let name = dirs[depth];
                match child {
                    Some(oid) => tree.add_entry(TreeEntry::new(name, FileMode::Directory, oid)),
                    None => {
                        tree.remove_entry(name);
                    }
                }
            }

            child = if tree.is_empty() && depth > 0 {
                None
            } else {
                Some(tree.write(&self.odb).await?)
            };
        }

        let new_root = child.ok_or_else(|| anyhow::anyhow!("root tree was not written"))?;
        debug!(path = %path, root = %new_root, "Rebuilt tree along path");
        Ok(new_root)
    }

    /// Entry at `path` under `root`, if any.
    ///
    /// Returns `None` when a segment is missing or a directory segment is a
    /// file. The returned entry may itself be a directory.
    pub async fn lookup(&self, root: &Oid, path: &str) -> anyhow::Result<Option<TreeEntry>> {
        let segments = split_path(path)?;
        let mut tree = Tree::read(&self.odb, root).await?;

        for (depth, segment) in segments.iter().enumerate() {
            let Some(entry) = tree.get_entry(segment).cloned() else {
                return Ok(None);
            };
            if depth + 1 == segments.len() {
                return Ok(Some(entry));
            }
            if !entry.is_tree() {
                return Ok(None);
            }
            tree = Tree::read(&self.odb, &entry.oid).await?;
        }
        Ok(None)
    }

    async fn unchanged(&self, root: Option<Oid>) -> anyhow::Result<Oid> {
        match root {
            Some(oid) => Ok(oid),
            None => Tree::new().write(&self.odb).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ObjectType;
    use capitalgit_storage::MockBackend;

    fn create_test_builder() -> (Arc<ObjectDatabase>, TreeBuilder) {
        let odb = Arc::new(ObjectDatabase::new(Arc::new(MockBackend::new()), 100));
        (Arc::clone(&odb), TreeBuilder::new(odb))
    }

    async fn blob(odb: &ObjectDatabase, data: &[u8]) -> (Oid, FileMode) {
        (odb.write(ObjectType::Blob, data).await.unwrap(), FileMode::Regular)
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("a/b/c.txt").unwrap(), vec!["a", "b", "c.txt"]);
        for bad in ["", "/a", "a/", "a//b", "./a", "a/../b"] {
            let err = VersionError::from(split_path(bad).unwrap_err());
            assert!(err.is_path_conflict(), "{bad:?} should be rejected");
        }
    }

    #[tokio::test]
    async fn test_write_then_lookup_nested() {
        let (odb, builder) = create_test_builder();
        let content = blob(&odb, b"Lettuce\n").await;

        let root = builder.update(None, "recipes/sandwich.txt", Some(content)).await.unwrap();
        let entry = builder.lookup(&root, "recipes/sandwich.txt").await.unwrap().unwrap();
        assert_eq!(entry.oid, content.0);

        let dir = builder.lookup(&root, "recipes").await.unwrap().unwrap();
        assert!(dir.is_tree());
        assert!(builder.lookup(&root, "recipes/missing").await.unwrap().is_none());
        assert!(builder.lookup(&root, "recipes/sandwich.txt/deeper").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_untouched_subtrees_are_shared() {
        let (odb, builder) = create_test_builder();
        let a = blob(&odb, b"a").await;
        let b = blob(&odb, b"b").await;

        let root1 = builder.update(None, "left/x.txt", Some(a)).await.unwrap();
        let root1 = builder.update(Some(root1), "right/y.txt", Some(a)).await.unwrap();
        let root2 = builder.update(Some(root1), "right/y.txt", Some(b)).await.unwrap();

        let left1 = builder.lookup(&root1, "left").await.unwrap().unwrap();
        let left2 = builder.lookup(&root2, "left").await.unwrap().unwrap();
        assert_eq!(left1.oid, left2.oid);
        assert_ne!(root1, root2);
    }

    #[tokio::test]
    async fn test_delete_prunes_empty_directories() {
        let (odb, builder) = create_test_builder();
        let a = blob(&odb, b"a").await;

        let empty = Tree::new().write(&odb).await.unwrap();
        let root = builder.update(None, "a/b/c.txt", Some(a)).await.unwrap();
        let root = builder.update(Some(root), "a/b/c.txt", None).await.unwrap();

        assert_eq!(root, empty);
    }

    #[tokio::test]
    async fn test_delete_keeps_non_empty_siblings() {
        let (odb, builder) = create_test_builder();
        let a = blob(&odb, b"a").await;

        let root = builder.update(None, "dir/one.txt", Some(a)).await.unwrap();
        let root = builder.update(Some(root), "dir/two.txt", Some(a)).await.unwrap();
        let root = builder.update(Some(root), "dir/one.txt", None).await.unwrap();

        assert!(builder.lookup(&root, "dir/one.txt").await.unwrap().is_none());
        assert!(builder.lookup(&root, "dir/two.txt").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_absent_returns_same_root() {
        let (odb, builder) = create_test_builder();
        let a = blob(&odb, b"a").await;
        let root = builder.update(None, "file.txt", Some(a)).await.unwrap();

        assert_eq!(builder.update(Some(root), "nope.txt", None).await.unwrap(), root);
        assert_eq!(builder.update(Some(root), "dir/nope.txt", None).await.unwrap(), root);
        assert_eq!(builder.update(Some(root), "file.txt/child", None).await.unwrap(), root);
    }

    #[tokio::test]
    async fn test_path_conflicts() {
        let (odb, builder) = create_test_builder();
        let a = blob(&odb, b"a").await;
        let root = builder.update(None, "a/b.txt", Some(a)).await.unwrap();

        let through_file = builder.update(Some(root), "a/b.txt/c", Some(a)).await.unwrap_err();
        assert!(VersionError::from(through_file).is_path_conflict());

        let onto_dir = builder.update(Some(root), "a", Some(a)).await.unwrap_err();
        assert!(VersionError::from(onto_dir).is_path_conflict());

        let delete_dir = builder.update(Some(root), "a", None).await.unwrap_err();
        assert!(VersionError::from(delete_dir).is_path_conflict());
    }

    #[tokio::test]
    async fn test_same_snapshot_same_root() {
        let (odb, builder) = create_test_builder();
        let a = blob(&odb, b"a").await;
        let b = blob(&odb, b"b").await;

        let one = builder.update(None, "x/1", Some(a)).await.unwrap();
        let one = builder.update(Some(one), "y/2", Some(b)).await.unwrap();

        let two = builder.update(None, "y/2", Some(b)).await.unwrap();
        let two = builder.update(Some(two), "x/1", Some(a)).await.unwrap();

        assert_eq!(one, two);
    }
}
