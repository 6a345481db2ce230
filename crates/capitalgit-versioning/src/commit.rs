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

//! Commit objects
//!
//! A commit records a root tree, its parents (order matters: the first parent
//! is the branch the commit was made on), author and committer identities,
//! and a message. The id covers every field.

use crate::{ObjectDatabase, ObjectType, Oid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who made a change, and when
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Display name
    pub name: String,

    /// Email address
    pub email: String,

    /// When the change was made
    pub time: DateTime<Utc>,
}

impl Signature {
    /// Signature at an explicit time
    ///
    /// ```
    /// use capitalgit_versioning::Signature;
    /// use chrono::{TimeZone, Utc};
    ///
    /// let when = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    /// let sig = Signature::new("Alice", "alice@example.com", when);
    /// assert_eq!(sig.to_string(), "Alice <alice@example.com> 1714564800");
    /// ```
    pub fn new(name: impl Into<String>, email: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            time,
        }
    }

    /// Signature stamped with the current time
    pub fn now(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self::new(name, email, Utc::now())
    }

    /// Same identity, new time
    pub fn at(&self, time: DateTime<Utc>) -> Self {
        Self::new(self.name.clone(), self.email.clone(), time)
    }

    /// Whether `who` names this identity (case-insensitive name or email)
    pub fn matches(&self, who: &str) -> bool {
        self.name.eq_ignore_ascii_case(who) || self.email.eq_ignore_ascii_case(who)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}> {}", self.name, self.email, self.time.timestamp())
    }
}

/// A snapshot in history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Root tree
    pub tree: Oid,

    /// Parent commits, first parent first
    pub parents: Vec<Oid>,

    /// Who wrote the change
    pub author: Signature,

    /// Who recorded it
    pub committer: Signature,

    /// Commit message
    pub message: String,
}

impl Commit {
    /// Build a commit.
    pub fn new(
        tree: Oid,
        parents: Vec<Oid>,
        author: Signature,
        committer: Signature,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tree,
            parents,
            author,
            committer,
            message: message.into(),
        }
    }

    /// Two or more parents
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// No parents
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// First line of the message
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }

    fn encode(&self) -> anyhow::Result<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|e| anyhow::anyhow!("Commit serialization failed: {}", e))
    }

    fn decode(data: &[u8]) -> anyhow::Result<Self> {
        postcard::from_bytes(data).map_err(|e| anyhow::anyhow!("Commit deserialization failed: {}", e))
    }

    /// Store the commit and return its id
    pub async fn write(&self, odb: &ObjectDatabase) -> anyhow::Result<Oid> {
        odb.write(ObjectType::Commit, &self.encode()?).await
    }

    /// Load a commit by id
    pub async fn read(odb: &ObjectDatabase, oid: &Oid) -> anyhow::Result<Self> {
        let data = odb.read_typed(oid, ObjectType::Commit).await?;
        Self::decode(&data)
    }

    /// Summary view of this commit under `oid`
    pub fn to_summary(&self, oid: Oid) -> CommitSummary {
        CommitSummary {
            commit: oid,
            tree: self.tree,
            parents: self.parents.clone(),
            message: self.message.clone(),
            author: self.author.clone(),
            committer: self.committer.clone(),
            time: self.committer.time,
        }
    }
}

impl fmt::Display for Commit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.summary())
    }
}

/// Commit description returned by `write`, `log` and merges
///
/// `time` is the committer time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    /// Commit id
    pub commit: Oid,
    /// Root tree id
    pub tree: Oid,
    /// Parent ids
    pub parents: Vec<Oid>,
    /// Full message
    pub message: String,
    /// Author
    pub author: Signature,
    /// Committer
    pub committer: Signature,
    /// Committer time
    pub time: DateTime<Utc>,
}
