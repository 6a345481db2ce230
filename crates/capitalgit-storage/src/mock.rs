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

//! In-memory storage backend
//!
//! Backs ephemeral repositories and every object-store unit test. Clones
//! share the same map, so a test can hand one clone to an
//! `ObjectDatabase` and inspect the other.

use crate::error::StorageError;
use crate::{validate_key, StorageBackend};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory backend over an `Arc<RwLock<BTreeMap>>`
#[derive(Clone, Default)]
pub struct MockBackend {
    store: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
    puts: Arc<AtomicU64>,
}

impl MockBackend {
    /// Empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend pre-populated with `initial_data`
    pub fn with_data<I>(initial_data: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<u8>)>,
    {
        MockBackend {
            store: Arc::new(RwLock::new(initial_data.into_iter().collect())),
            puts: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of stored keys
    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    /// Whether nothing is stored
    pub async fn is_empty(&self) -> bool {
        self.store.read().await.is_empty()
    }

    /// Drop every key
    pub async fn clear(&self) {
        self.store.write().await.clear();
    }

    /// Sorted copy of all keys
    pub async fn keys(&self) -> Vec<String> {
        self.store.read().await.keys().cloned().collect()
    }

    /// How many values were physically written (including overwrites)
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    /// Replace the stored bytes without any validation.
    ///
    /// Tests use this to simulate on-disk corruption.
    pub async fn corrupt(&self, key: &str, data: Vec<u8>) {
        self.store.write().await.insert(key.to_string(), data);
    }
}

impl fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockBackend")
            .field("puts", &self.put_count())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        validate_key(key)?;
        self.store
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(key).into())
    }

    async fn put(&self, key: &str, data: &[u8]) -> anyhow::Result<()> {
        validate_key(key)?;
        self.store.write().await.insert(key.to_string(), data.to_vec());
        self.puts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        validate_key(key)?;
        Ok(self.store.read().await.contains_key(key))
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        validate_key(key)?;
        self.store.write().await.remove(key);
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .store
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    // Check and insert under one write lock.
    async fn put_if_absent(&self, key: &str, data: &[u8]) -> anyhow::Result<bool> {
        validate_key(key)?;
        let mut store = self.store.write().await;
        if store.contains_key(key) {
            return Ok(false);
        }
        store.insert(key.to_string(), data.to_vec());
        self.puts.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::is_not_found;

    #[tokio::test]
    async fn test_put_and_get() {
        let backend = MockBackend::new();
        backend.put("key1", b"test data").await.unwrap();
        assert_eq!(backend.len().await, 1);
        assert_eq!(backend.get("key1").await.unwrap(), b"test data");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let backend = MockBackend::new();
        let err = backend.get("nonexistent").await.unwrap_err();
        assert!(is_not_found(&err));
    }

    #[tokio::test]
    async fn test_empty_key_operations() {
        let backend = MockBackend::new();

        assert!(backend.put("", b"data").await.is_err());
        assert!(backend.get("").await.is_err());
        assert!(backend.exists("").await.is_err());
        assert!(backend.delete("").await.is_err());
    }

    #[tokio::test]
    async fn test_list_objects_by_prefix() {
        let backend = MockBackend::new();
        for key in ["proposals/b", "proposals/a", "objects/x", "proposalsX"] {
            backend.put(key, b"d").await.unwrap();
        }

        assert_eq!(
            backend.list_objects("proposals/").await.unwrap(),
            vec!["proposals/a".to_string(), "proposals/b".to_string()]
        );
        assert_eq!(backend.list_objects("").await.unwrap().len(), 4);
        assert!(backend.list_objects("zzz").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_count_tracks_physical_writes() {
        let backend = MockBackend::new();
        backend.put("a", b"1").await.unwrap();
        backend.put("a", b"2").await.unwrap();
        assert!(!backend.put_if_absent("a", b"3").await.unwrap());
        assert_eq!(backend.put_count(), 2);
        assert_eq!(backend.get("a").await.unwrap(), b"2");
    }

    #[tokio::test]
    async fn test_clone_shares_state() {
        let backend1 = MockBackend::new();
        let backend2 = backend1.clone();

        backend2.put("key2", b"data").await.unwrap();
        assert_eq!(backend1.keys().await, vec!["key2".to_string()]);

        backend1.clear().await;
        assert!(backend2.is_empty().await);
    }
}
