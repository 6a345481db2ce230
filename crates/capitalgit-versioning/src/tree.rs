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

//! Tree objects
//!
//! A tree is one directory level: a name-ordered set of entries pointing at
//! blobs (files) or other trees (subdirectories). Its canonical encoding is
//! the postcard serialization of the entries in name order, so equal
//! listings always hash to the same id.

use crate::{ObjectDatabase, ObjectType, Oid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Mode of a tree entry (git-style octal values)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum FileMode {
    /// Regular file (100644)
    Regular = 0o100644,
    /// Executable file (100755)
    Executable = 0o100755,
    /// Symlink (120000)
    Symlink = 0o120000,
    /// Directory (040000)
    Directory = 0o040000,
}

impl FileMode {
    /// Parse an octal mode value
    pub fn from_u32(mode: u32) -> anyhow::Result<Self> {
        match mode {
            0o100644 => Ok(FileMode::Regular),
            0o100755 => Ok(FileMode::Executable),
            0o120000 => Ok(FileMode::Symlink),
            0o040000 => Ok(FileMode::Directory),
            _ => anyhow::bail!("Unknown file mode: {:o}", mode),
        }
    }

    /// Numeric value (33188 for a regular file)
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// Kind of object an entry with this mode points at
    pub fn kind(&self) -> EntryKind {
        match self {
            FileMode::Directory => EntryKind::Tree,
            _ => EntryKind::Blob,
        }
    }
}

impl From<FileMode> for u32 {
    fn from(mode: FileMode) -> u32 {
        mode.as_u32()
    }
}

impl TryFrom<u32> for FileMode {
    type Error = String;

    fn try_from(mode: u32) -> Result<Self, Self::Error> {
        FileMode::from_u32(mode).map_err(|e| e.to_string())
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06o}", self.as_u32())
    }
}

/// Whether an entry is a file or a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// File content
    Blob,
    /// Subdirectory
    Tree,
}

impl EntryKind {
    /// Object type stored for this kind
    pub fn object_type(&self) -> ObjectType {
        match self {
            EntryKind::Blob => ObjectType::Blob,
            EntryKind::Tree => ObjectType::Tree,
        }
    }
}

/// One name inside a tree
///
/// Serializes (in JSON) as `{"name", "oid", "mode", "kind"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Single path segment
    pub name: String,

    /// Entry mode
    pub mode: FileMode,

    /// Blob or tree id
    pub oid: Oid,
}

impl TreeEntry {
    /// Create an entry
    pub fn new(name: impl Into<String>, mode: FileMode, oid: Oid) -> Self {
        Self {
            name: name.into(),
            mode,
            oid,
        }
    }

    /// Derived from the mode
    pub fn kind(&self) -> EntryKind {
        self.mode.kind()
    }

    /// Points at a subtree
    pub fn is_tree(&self) -> bool {
        self.kind() == EntryKind::Tree
    }

    /// Points at a blob
    pub fn is_blob(&self) -> bool {
        self.kind() == EntryKind::Blob
    }
}

/// Entry view carrying the derived kind, used in results returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInfo {
    /// Single path segment
    pub name: String,
    /// Blob or tree id
    pub oid: Oid,
    /// Numeric mode
    pub mode: FileMode,
    /// Blob or tree
    pub kind: EntryKind,
}

impl From<&TreeEntry> for EntryInfo {
    fn from(entry: &TreeEntry) -> Self {
        EntryInfo {
            name: entry.name.clone(),
            oid: entry.oid,
            mode: entry.mode,
            kind: entry.kind(),
        }
    }
}

/// A single directory level
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    entries: BTreeMap<String, TreeEntry>,
}

impl Tree {
    /// Empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry with the same name
    pub fn add_entry(&mut self, entry: TreeEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    /// Remove an entry by name
    pub fn remove_entry(&mut self, name: &str) -> Option<TreeEntry> {
        self.entries.remove(name)
    }

    /// Entry by name
    pub fn get_entry(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.get(name)
    }

    /// Entries in name order
    pub fn iter(&self) -> impl Iterator<Item = &TreeEntry> {
        self.entries.values()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Canonical encoding
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let entries: Vec<&TreeEntry> = self.entries.values().collect();
        postcard::to_allocvec(&entries)
            .map_err(|e| anyhow::anyhow!("Tree serialization failed: {}", e))
    }

    /// Decode a canonical encoding.
    ///
    /// Rejects listings that are unsorted or repeat a name, since those could
    /// not have been produced by [`Tree::encode`].
    pub fn decode(data: &[u8]) -> anyhow::Result<Self> {
        let entries: Vec<TreeEntry> = postcard::from_bytes(data)
            .map_err(|e| anyhow::anyhow!("Tree deserialization failed: {}", e))?;

        if entries.windows(2).any(|w| w[0].name >= w[1].name) {
            anyhow::bail!("Tree entries are not in canonical order");
        }

        Ok(Self {
            entries: entries.into_iter().map(|e| (e.name.clone(), e)).collect(),
        })
    }

    /// Store this tree and return its id
    pub async fn write(&self, odb: &ObjectDatabase) -> anyhow::Result<Oid> {
        odb.write(ObjectType::Tree, &self.encode()?).await
    }

    /// Load a tree by id
    pub async fn read(odb: &ObjectDatabase, oid: &Oid) -> anyhow::Result<Self> {
        let data = odb.read_typed(oid, ObjectType::Tree).await?;
        Self::decode(&data)
    }
}
