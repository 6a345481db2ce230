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

//! Per-branch mutual exclusion
//!
//! Every read-modify-write of a branch tip runs while holding that branch's
//! guard. Different branches never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

/// Lock table keyed by branch name
#[derive(Debug, Clone, Default)]
pub struct BranchLocks {
    slots: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

/// Exclusive hold on one branch, released on drop
#[derive(Debug)]
pub struct BranchGuard {
    branch: String,
    _guard: OwnedMutexGuard<()>,
}

impl BranchGuard {
    /// Branch this guard protects
    pub fn branch(&self) -> &str {
        &self.branch
    }
}

impl BranchLocks {
    /// Empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `branch`
    pub async fn acquire(&self, branch: &str) -> BranchGuard {
        let slot = self.slot(branch);
        let guard = slot.lock_owned().await;
        trace!(branch = %branch, "Acquired branch lock");
        BranchGuard {
            branch: branch.to_string(),
            _guard: guard,
        }
    }

    fn slot(&self, branch: &str) -> Arc<AsyncMutex<()>> {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // A count of one means only the table refers to it: no holder, no waiter.
        slots.retain(|name, slot| name == branch || Arc::strong_count(slot) > 1);

        Arc::clone(
            slots
                .entry(branch.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }
}
