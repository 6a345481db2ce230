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

//! Object kinds and their framed encoding

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of object held by the object store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    /// File content
    Blob,
    /// Directory listing
    Tree,
    /// Snapshot with history
    Commit,
}

impl ObjectType {
    /// Lowercase name used in frame headers
    ///
    /// ```
    /// use capitalgit_versioning::ObjectType;
    ///
    /// assert_eq!(ObjectType::Commit.as_str(), "commit");
    /// ```
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Blob => "blob",
            ObjectType::Tree => "tree",
            ObjectType::Commit => "commit",
        }
    }

    /// Parse a frame header name
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "blob" => Ok(ObjectType::Blob),
            "tree" => Ok(ObjectType::Tree),
            "commit" => Ok(ObjectType::Commit),
            _ => anyhow::bail!("Unknown object type: {}", s),
        }
    }

    /// Wrap `payload` as `"<type> <len>\0<payload>"`.
    ///
    /// The frame is what gets hashed and stored, so a blob and a tree with
    /// identical payload bytes still get distinct ids.
    pub fn frame(self, payload: &[u8]) -> Vec<u8> {
        let header = format!("{} {}\0", self.as_str(), payload.len());
        let mut framed = Vec::with_capacity(header.len() + payload.len());
        framed.extend_from_slice(header.as_bytes());
        framed.extend_from_slice(payload);
        framed
    }

    /// Split a frame into its type and payload, checking the declared length.
    pub fn unframe(framed: &[u8]) -> anyhow::Result<(ObjectType, &[u8])> {
        let nul = framed
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| anyhow::anyhow!("object frame has no header terminator"))?;
        let header = std::str::from_utf8(&framed[..nul])
            .map_err(|_| anyhow::anyhow!("object frame header is not UTF-8"))?;
        let (kind, len) = header
            .split_once(' ')
            .ok_or_else(|| anyhow::anyhow!("malformed object header: {:?}", header))?;

        let obj_type = ObjectType::parse(kind)?;
        let len: usize = len
            .parse()
            .map_err(|_| anyhow::anyhow!("malformed object length: {:?}", len))?;
        let payload = &framed[nul + 1..];

        if payload.len() != len {
            anyhow::bail!(
                "object length mismatch: header says {}, payload has {}",
                len,
                payload.len()
            );
        }
        Ok((obj_type, payload))
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
