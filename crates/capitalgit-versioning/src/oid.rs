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

//! Object identifiers
//!
//! An [`Oid`] is the SHA-256 digest of an object's framed encoding
//! (`"<type> <len>\0<payload>"`, see [`crate::ObjectType::frame`]). Two
//! objects with the same type and payload always share an id.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Length of the abbreviated form used in patch `index` lines.
pub const SHORT_OID_LEN: usize = 7;

/// SHA-256 object identifier
///
/// Serializes as a hex string in human-readable formats (JSON, TOML) and as
/// raw bytes in binary ones (postcard).
///
/// # Examples
///
/// ```
/// use capitalgit_versioning::Oid;
///
/// let oid = Oid::hash(b"blob 5\0hello");
/// assert_eq!(oid.to_hex().len(), 64);
/// assert_eq!(oid.short().len(), 7);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid([u8; 32]);

impl Oid {
    /// Hash `data` as-is.
    pub fn hash(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Oid(bytes)
    }

    /// Wrap raw digest bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Oid(bytes)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full 64-character lowercase hex
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First seven hex characters
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(SHORT_OID_LEN);
        hex
    }

    /// Parse a 64-character hex string.
    ///
    /// # Errors
    ///
    /// Returns an error for any other length or non-hex input.
    pub fn from_hex(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        if s.len() != 64 {
            anyhow::bail!("invalid object id length {} (expected 64 hex characters)", s.len());
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| anyhow::anyhow!("invalid object id '{}': {}", s, e))?;
        Ok(Oid(bytes))
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self.short())
    }
}

impl FromStr for Oid {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Oid::from_hex(s)
    }
}

impl Serialize for Oid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

struct OidVisitor;

impl<'de> Visitor<'de> for OidVisitor {
    type Value = Oid;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a 32-byte object id or its 64-character hex form")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Oid, E> {
        Oid::from_hex(v).map_err(E::custom)
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Oid, E> {
        let bytes: [u8; 32] = v
            .try_into()
            .map_err(|_| E::invalid_length(v.len(), &self))?;
        Ok(Oid(bytes))
    }

    fn visit_borrowed_bytes<E: de::Error>(self, v: &'de [u8]) -> Result<Oid, E> {
        self.visit_bytes(v)
    }
}

impl<'de> Deserialize<'de> for Oid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_str(OidVisitor)
        } else {
            deserializer.deserialize_bytes(OidVisitor)
        }
    }
}
