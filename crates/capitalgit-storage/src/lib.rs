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

//! Storage layer for CapitalGit
//!
//! The object store of a repository never touches the filesystem directly:
//! it writes opaque byte blobs under string keys through the
//! [`StorageBackend`] trait. Two implementations ship with this crate:
//!
//! - [`LocalBackend`]: sharded files under a repository root, atomic writes
//! - [`MockBackend`]: an in-memory map, used by tests and ephemeral repositories
//!
//! # Contract
//!
//! - keys are non-empty strings; an empty key is rejected with
//!   [`StorageError::InvalidKey`]
//! - `get` on a missing key fails with [`StorageError::NotFound`] wrapped in
//!   the returned `anyhow::Error`, so callers can recover it with
//!   [`is_not_found`]
//! - `put` replaces the value atomically: readers see the old bytes or the
//!   new bytes, never a mix
//! - `delete` of a missing key succeeds
//! - `list_objects` returns sorted keys
//!
//! # Examples
//!
//! ```no_run
//! use capitalgit_storage::{StorageBackend, MockBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let storage = MockBackend::new();
//!
//!     storage.put("3f/a1", b"blob bytes").await?;
//!     assert_eq!(storage.get("3f/a1").await?, b"blob bytes");
//!     assert!(storage.exists("3f/a1").await?);
//!
//!     storage.delete("3f/a1").await?;
//!     assert!(!storage.exists("3f/a1").await?);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod local;
pub mod mock;

use async_trait::async_trait;
use std::fmt::Debug;

pub use error::{StorageError, StorageResult};
pub use local::LocalBackend;
pub use mock::MockBackend;

/// Async key/value store holding opaque bytes.
///
/// Implementations must be `Send + Sync + Debug` so a single backend can be
/// shared behind an `Arc` by every component of a repository.
#[async_trait]
pub trait StorageBackend: Send + Sync + Debug {
    /// Read the bytes stored under `key`.
    ///
    /// # Errors
    ///
    /// [`StorageError::NotFound`] when the key is absent,
    /// [`StorageError::InvalidKey`] for an empty key, I/O errors otherwise.
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>>;

    /// Store `data` under `key`, replacing any previous value.
    async fn put(&self, key: &str, data: &[u8]) -> anyhow::Result<()>;

    /// Whether `key` is present.
    async fn exists(&self, key: &str) -> anyhow::Result<bool>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Sorted keys starting with `prefix` (all keys for an empty prefix).
    async fn list_objects(&self, prefix: &str) -> anyhow::Result<Vec<String>>;

    /// Store `data` unless `key` already exists.
    ///
    /// Returns `true` when this call stored the value. For content-addressed
    /// keys a concurrent writer of the same key stores identical bytes, so
    /// losing the race is harmless.
    async fn put_if_absent(&self, key: &str, data: &[u8]) -> anyhow::Result<bool> {
        if self.exists(key).await? {
            return Ok(false);
        }
        self.put(key, data).await?;
        Ok(true)
    }
}

/// Whether an error returned by a backend means "key not found".
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<StorageError>()
        .is_some_and(StorageError::is_not_found)
}

pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::invalid_key("key cannot be empty"));
    }
    Ok(())
}
