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

//! Object Database (ODB)
//!
//! Content-addressable storage for blobs, trees and commits:
//! - **Addressing**: an object's id is the SHA-256 of its frame
//!   (`"<type> <len>\0<payload>"`)
//! - **Deduplication**: writing existing content is a no-op returning the same id
//! - **Caching**: decoded objects are kept in a Moka LRU cache
//! - **Compression**: frames are zlib-compressed at rest (optional)
//! - **Integrity**: every storage read is re-hashed against its id
//!
//! Objects are never updated or deleted through this type.

use crate::error::VersionError;
use crate::{ObjectType, OdbMetrics, Oid};
use capitalgit_storage::{is_not_found, StorageBackend};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use moka::future::Cache;
use std::io::{Read, Write};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// First byte of a zlib stream at the default window size.
const ZLIB_MAGIC: u8 = 0x78;

type CachedObject = (ObjectType, Arc<Vec<u8>>);

/// Object Database with content-addressable storage
///
/// # Examples
///
/// ```no_run
/// use capitalgit_versioning::{ObjectDatabase, ObjectType};
/// use capitalgit_storage::MockBackend;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let odb = ObjectDatabase::new(Arc::new(MockBackend::new()), 1000);
///
///     let oid = odb.write(ObjectType::Blob, b"Top piece of bread\n").await?;
///     assert_eq!(odb.read(&oid).await?, b"Top piece of bread\n");
///
///     let again = odb.write(ObjectType::Blob, b"Top piece of bread\n").await?;
///     assert_eq!(oid, again);
///     Ok(())
/// }
/// ```
pub struct ObjectDatabase {
    storage: Arc<dyn StorageBackend>,
    cache: Cache<Oid, CachedObject>,
    metrics: Arc<RwLock<OdbMetrics>>,
    compression_enabled: bool,
}

impl ObjectDatabase {
    /// Create an object database with compression enabled.
    ///
    /// # Arguments
    ///
    /// * `storage` - Backend holding the encoded objects
    /// * `cache_capacity` - Maximum number of decoded objects kept in memory
    pub fn new(storage: Arc<dyn StorageBackend>, cache_capacity: u64) -> Self {
        Self::with_compression(storage, cache_capacity, true)
    }

    /// Create an object database, choosing whether new objects are compressed.
    ///
    /// Reads auto-detect the encoding, so a database may hold a mix of both.
    pub fn with_compression(
        storage: Arc<dyn StorageBackend>,
        cache_capacity: u64,
        compression_enabled: bool,
    ) -> Self {
        info!(
            capacity = cache_capacity,
            compression_enabled,
            "Creating ObjectDatabase with LRU cache"
        );

        Self {
            storage,
            cache: Cache::new(cache_capacity),
            metrics: Arc::new(RwLock::new(OdbMetrics::new())),
            compression_enabled,
        }
    }

    /// Store an object and return its id.
    ///
    /// Idempotent: identical `(obj_type, payload)` pairs always return the
    /// same id and are stored once. Concurrent writers of the same content
    /// converge on one stored object.
    pub async fn write(&self, obj_type: ObjectType, payload: &[u8]) -> anyhow::Result<Oid> {
        let framed = obj_type.frame(payload);
        let oid = Oid::hash(&framed);
        let key = oid.to_hex();

        if self.cache.contains_key(&oid) {
            debug!(oid = %oid, obj_type = %obj_type, "Object already cached (deduplicated)");
            self.metrics.write().await.record_write(framed.len() as u64, false);
            return Ok(oid);
        }

        let encoded = if self.compression_enabled {
            compress(&framed)?
        } else {
            framed.clone()
        };

        let stored = self.storage.put_if_absent(&key, &encoded).await?;
        if stored {
            debug!(
                oid = %oid,
                obj_type = %obj_type,
                size = payload.len(),
                storage_size = encoded.len(),
                "Stored new object"
            );
        } else {
            debug!(oid = %oid, "Object already exists (deduplicated)");
        }

        self.metrics
            .write()
            .await
            .record_write(framed.len() as u64, stored);
        self.cache
            .insert(oid, (obj_type, Arc::new(payload.to_vec())))
            .await;

        Ok(oid)
    }

    /// Read an object's payload regardless of its type.
    ///
    /// # Errors
    ///
    /// [`VersionError::NotFound`] when no object has this id; an integrity
    /// error when the stored bytes do not hash to `oid`.
    pub async fn read(&self, oid: &Oid) -> anyhow::Result<Vec<u8>> {
        let (_, payload) = self.read_object(oid).await?;
        Ok(payload)
    }

    /// Read an object along with its type.
    pub async fn read_object(&self, oid: &Oid) -> anyhow::Result<(ObjectType, Vec<u8>)> {
        let (obj_type, payload) = self.load(oid).await?;
        Ok((obj_type, (*payload).clone()))
    }

    /// Read an object that must be of `expected` type.
    pub async fn read_typed(&self, oid: &Oid, expected: ObjectType) -> anyhow::Result<Vec<u8>> {
        let (obj_type, payload) = self.load(oid).await?;
        if obj_type != expected {
            anyhow::bail!("object {} is a {}, expected a {}", oid, obj_type, expected);
        }
        Ok((*payload).clone())
    }

    async fn load(&self, oid: &Oid) -> anyhow::Result<CachedObject> {
        if let Some(cached) = self.cache.get(oid).await {
            self.metrics.write().await.record_cache_hit();
            return Ok(cached);
        }

        self.metrics.write().await.record_cache_miss();

        let stored = match self.storage.get(&oid.to_hex()).await {
            Ok(bytes) => bytes,
            Err(e) if is_not_found(&e) => {
                return Err(VersionError::not_found(format!("object {}", oid)).into())
            }
            Err(e) => return Err(e),
        };

        let framed = if stored.first() == Some(&ZLIB_MAGIC) {
            decompress(&stored)?
        } else {
            stored
        };

        let computed = Oid::hash(&framed);
        if computed != *oid {
            warn!(expected = %oid, computed = %computed, "Object integrity check failed");
            anyhow::bail!(
                "Object integrity check failed: expected {}, got {}",
                oid,
                computed
            );
        }

        let (obj_type, payload) = ObjectType::unframe(&framed)?;
        let entry = (obj_type, Arc::new(payload.to_vec()));
        self.cache.insert(*oid, entry.clone()).await;
        Ok(entry)
    }

    /// Whether an object with this id is stored
    pub async fn exists(&self, oid: &Oid) -> anyhow::Result<bool> {
        if self.cache.contains_key(oid) {
            return Ok(true);
        }
        self.storage.exists(&oid.to_hex()).await
    }

    /// Snapshot of the current metrics
    pub async fn metrics(&self) -> OdbMetrics {
        self.metrics.read().await.clone()
    }

    /// Drop every cached object
    pub async fn clear_cache(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        debug!("Cleared object cache");
    }

    /// Number of cached objects (approximate until pending tasks run)
    pub fn cache_entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl std::fmt::Debug for ObjectDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectDatabase")
            .field("storage", &self.storage)
            .field("compression_enabled", &self.compression_enabled)
            .finish_non_exhaustive()
    }
}

fn compress(data: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2 + 16), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn decompress(data: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| anyhow::anyhow!("Decompression failed: {}", e))?;
    Ok(out)
}
