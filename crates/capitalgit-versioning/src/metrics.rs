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

//! Object database counters

use serde::{Deserialize, Serialize};

/// Cache and deduplication counters of an [`ObjectDatabase`](crate::ObjectDatabase)
///
/// Byte counts are measured on framed, uncompressed objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OdbMetrics {
    /// Reads served from the cache
    pub cache_hits: u64,

    /// Reads that went to storage
    pub cache_misses: u64,

    /// Objects this handle physically stored
    pub unique_objects: u64,

    /// Write calls, duplicates included
    pub total_writes: u64,

    /// Bytes physically stored
    pub bytes_stored: u64,

    /// Bytes submitted to `write`, duplicates included
    pub bytes_written: u64,
}

impl OdbMetrics {
    /// Zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of reads served from cache
    ///
    /// ```
    /// use capitalgit_versioning::OdbMetrics;
    ///
    /// let metrics = OdbMetrics { cache_hits: 3, cache_misses: 1, ..Default::default() };
    /// assert_eq!(metrics.hit_rate(), 0.75);
    /// ```
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Fraction of written bytes that were already stored
    pub fn dedup_ratio(&self) -> f64 {
        if self.bytes_written == 0 {
            0.0
        } else {
            self.bytes_saved() as f64 / self.bytes_written as f64
        }
    }

    /// Bytes not stored thanks to deduplication
    pub fn bytes_saved(&self) -> u64 {
        self.bytes_written.saturating_sub(self.bytes_stored)
    }

    pub(crate) fn record_cache_hit(&mut self) {
        self.cache_hits += 1;
    }

    pub(crate) fn record_cache_miss(&mut self) {
        self.cache_misses += 1;
    }

    pub(crate) fn record_write(&mut self, size: u64, is_new: bool) {
        self.total_writes += 1;
        self.bytes_written += size;
        if is_new {
            self.unique_objects += 1;
            self.bytes_stored += size;
        }
    }
}
