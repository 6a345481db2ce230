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

//! Snapshot traversal
//!
//! [`TreeWalk`] lists every file of a snapshot depth-first, in name order at
//! each level, loading subtrees only as it reaches them. [`read_all`] builds
//! on it to materialize a whole snapshot, either as a flat list or as a
//! nested map keyed by path segment.

use crate::tree::EntryInfo;
use crate::{ObjectDatabase, ObjectType, Oid, Tree, TreeEntry};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One file of a snapshot, as yielded by [`TreeWalk`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListEntry {
    /// Full slash-delimited path
    pub path: String,
    /// The entry at that path
    pub entry: EntryInfo,
}

struct Frame {
    prefix: String,
    entries: std::vec::IntoIter<TreeEntry>,
}

/// Lazy depth-first walk over the files of a tree
///
/// The walk is finite, never yields directories, and can be restarted.
///
/// ```no_run
/// # use capitalgit_versioning::{ObjectDatabase, Oid, TreeWalk};
/// # use std::sync::Arc;
/// # async fn example(odb: Arc<ObjectDatabase>, root: Oid) -> anyhow::Result<()> {
/// let mut walk = TreeWalk::new(odb, root);
/// while let Some(item) = walk.next().await? {
///     println!("{} {}", item.entry.oid.short(), item.path);
/// }
/// # Ok(())
/// # }
/// ```
pub struct TreeWalk {
    odb: Arc<ObjectDatabase>,
    root: Oid,
    stack: Vec<Frame>,
    started: bool,
}

impl TreeWalk {
    /// Walk the snapshot rooted at `root`
    pub fn new(odb: Arc<ObjectDatabase>, root: Oid) -> Self {
        Self {
            odb,
            root,
            stack: Vec::new(),
            started: false,
        }
    }

    /// Next file, or `None` once the walk is exhausted.
    pub async fn next(&mut self) -> anyhow::Result<Option<ListEntry>> {
        if !self.started {
            self.started = true;
            self.push_tree(String::new(), self.root).await?;
        }

        loop {
            let Some(frame) = self.stack.last_mut() else {
                return Ok(None);
            };
            let Some(entry) = frame.entries.next() else {
                self.stack.pop();
                continue;
            };

            let path = if frame.prefix.is_empty() {
                entry.name.clone()
            } else {
                format!("{}/{}", frame.prefix, entry.name)
            };

            if entry.is_tree() {
                self.push_tree(path, entry.oid).await?;
                continue;
            }

            return Ok(Some(ListEntry {
                path,
                entry: EntryInfo::from(&entry),
            }));
        }
    }

    /// Rewind to the first file
    pub fn restart(&mut self) {
        self.stack.clear();
        self.started = false;
    }

    /// Drain the remaining files into a vector
    pub async fn collect_remaining(&mut self) -> anyhow::Result<Vec<ListEntry>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }

    async fn push_tree(&mut self, prefix: String, oid: Oid) -> anyhow::Result<()> {
        let tree = Tree::read(&self.odb, &oid).await?;
        let entries: Vec<TreeEntry> = tree.iter().cloned().collect();
        self.stack.push(Frame {
            prefix,
            entries: entries.into_iter(),
        });
        Ok(())
    }
}

/// Shape requested from [`read_all`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Ordered list of `{path, value}`
    #[default]
    Flat,
    /// Nested map keyed by segment, leaves are `{path, value}`
    Tree,
}

/// A file with its content
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileValue {
    /// Full path
    pub path: String,
    /// File bytes; serialized as a string when valid UTF-8
    #[serde(serialize_with = "serialize_content")]
    pub value: Vec<u8>,
}

impl FileValue {
    /// Content as UTF-8 text, if it is valid UTF-8
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

pub(crate) fn serialize_content<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    match std::str::from_utf8(value) {
        Ok(text) => serializer.serialize_str(text),
        Err(_) => serializer.serialize_bytes(value),
    }
}

/// Node of the nested snapshot form
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SnapshotNode {
    /// A file leaf
    File(FileValue),
    /// A directory
    Dir(BTreeMap<String, SnapshotNode>),
}

/// Whole-snapshot read result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Snapshot {
    /// Flat form
    Flat(Vec<FileValue>),
    /// Nested form
    Tree(BTreeMap<String, SnapshotNode>),
}

impl Snapshot {
    /// The flat form of this snapshot, in walk order.
    ///
    /// For the nested form this is a depth-first traversal in key order,
    /// which matches the order [`read_all`] uses for [`ReadMode::Flat`].
    pub fn flatten(&self) -> Vec<FileValue> {
        match self {
            Snapshot::Flat(files) => files.clone(),
            Snapshot::Tree(map) => {
                let mut files = Vec::new();
                let mut stack: Vec<std::collections::btree_map::Iter<'_, String, SnapshotNode>> =
                    vec![map.iter()];
                while let Some(iter) = stack.last_mut() {
                    match iter.next() {
                        None => {
                            stack.pop();
                        }
                        Some((_, SnapshotNode::File(file))) => files.push(file.clone()),
                        Some((_, SnapshotNode::Dir(children))) => stack.push(children.iter()),
                    }
                }
                files
            }
        }
    }

    /// Number of files
    pub fn len(&self) -> usize {
        match self {
            Snapshot::Flat(files) => files.len(),
            Snapshot::Tree(_) => self.flatten().len(),
        }
    }

    /// No files at all
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Materialize every file under `root`.
pub async fn read_all(
    odb: &Arc<ObjectDatabase>,
    root: &Oid,
    mode: ReadMode,
) -> anyhow::Result<Snapshot> {
    let mut walk = TreeWalk::new(Arc::clone(odb), *root);
    let mut flat = Vec::new();
    let mut nested: BTreeMap<String, SnapshotNode> = BTreeMap::new();

    while let Some(item) = walk.next().await? {
        let value = odb.read_typed(&item.entry.oid, ObjectType::Blob).await?;
        let file = FileValue {
            path: item.path,
            value,
        };

        match mode {
            ReadMode::Flat => flat.push(file),
            ReadMode::Tree => insert_nested(&mut nested, file)?,
        }
    }

    Ok(match mode {
        ReadMode::Flat => Snapshot::Flat(flat),
        ReadMode::Tree => Snapshot::Tree(nested),
    })
}

fn insert_nested(root: &mut BTreeMap<String, SnapshotNode>, file: FileValue) -> anyhow::Result<()> {
    let segments: Vec<String> = file.path.split('/').map(str::to_string).collect();
    let Some((leaf, dirs)) = segments.split_last() else {
        anyhow::bail!("empty path in snapshot");
    };

    let mut node = root;
    for dir in dirs {
        node = match node
            .entry(dir.clone())
            .or_insert_with(|| SnapshotNode::Dir(BTreeMap::new()))
        {
            SnapshotNode::Dir(children) => children,
            SnapshotNode::File(existing) => {
                anyhow::bail!("'{}' is both a file and a directory", existing.path)
            }
        };
    }
    node.insert(leaf.clone(), SnapshotNode::File(file));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FileMode, TreeBuilder};
    use capitalgit_storage::MockBackend;

    async fn sample_root() -> (Arc<ObjectDatabase>, Oid) {
        let odb = Arc::new(ObjectDatabase::new(Arc::new(MockBackend::new()), 100));
        let builder = TreeBuilder::new(Arc::clone(&odb));
        let mut root = None;
        for (path, content) in [
            ("z.txt", "last"),
            ("docs/readme.md", "hello"),
            ("a.txt", "first"),
            ("docs/api/index.md", "api"),
        ] {
            let oid = odb.write(ObjectType::Blob, content.as_bytes()).await.unwrap();
            root = Some(builder.update(root, path, Some((oid, FileMode::Regular))).await.unwrap());
        }
        (odb, root.unwrap())
    }

    #[tokio::test]
    async fn test_walk_order_is_depth_first_lexicographic() {
        let (odb, root) = sample_root().await;
        let mut walk = TreeWalk::new(odb, root);
        let paths: Vec<String> = walk
            .collect_remaining()
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.path)
            .collect();

        assert_eq!(
            paths,
            vec!["a.txt", "docs/api/index.md", "docs/readme.md", "z.txt"]
        );
    }

    #[tokio::test]
    async fn test_walk_is_restartable() {
        let (odb, root) = sample_root().await;
        let mut walk = TreeWalk::new(odb, root);

        let first = walk.next().await.unwrap().unwrap();
        walk.next().await.unwrap();
        walk.restart();
        assert_eq!(walk.next().await.unwrap().unwrap(), first);
    }

    #[tokio::test]
    async fn test_walk_of_empty_tree() {
        let odb = Arc::new(ObjectDatabase::new(Arc::new(MockBackend::new()), 10));
        let empty = Tree::new().write(&odb).await.unwrap();
        let mut walk = TreeWalk::new(odb, empty);
        assert!(walk.next().await.unwrap().is_none());
        assert!(walk.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tree_form_flattens_to_flat_form() {
        let (odb, root) = sample_root().await;

        let flat = read_all(&odb, &root, ReadMode::Flat).await.unwrap();
        let nested = read_all(&odb, &root, ReadMode::Tree).await.unwrap();

        assert_eq!(nested.flatten(), flat.flatten());
        assert_eq!(flat.len(), 4);

        let Snapshot::Tree(map) = &nested else {
            panic!("expected nested form");
        };
        let Some(SnapshotNode::Dir(docs)) = map.get("docs") else {
            panic!("docs should be a directory");
        };
        let Some(SnapshotNode::File(readme)) = docs.get("readme.md") else {
            panic!("readme should be a file");
        };
        assert_eq!(readme.path, "docs/readme.md");
        assert_eq!(readme.text(), Some("hello"));
    }

    #[tokio::test]
    async fn test_snapshot_json_shapes() {
        let (odb, root) = sample_root().await;

        let flat = serde_json::to_value(read_all(&odb, &root, ReadMode::Flat).await.unwrap()).unwrap();
        assert_eq!(flat[0]["path"], "a.txt");
        assert_eq!(flat[0]["value"], "first");

        let nested = serde_json::to_value(read_all(&odb, &root, ReadMode::Tree).await.unwrap()).unwrap();
        assert_eq!(nested["docs"]["api"]["index.md"]["value"], "api");
        assert_eq!(nested["z.txt"]["path"], "z.txt");
    }
}
