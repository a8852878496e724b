// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Per-repository lock registry (§4.3).
//!
//! Discovery, watcher-driven edits, removal, and metadata generation for a
//! given repository name are mutually exclusive; different names proceed in
//! parallel. The registry lazily interns one [`tokio::sync::Mutex`] per
//! name the first time it's asked for, and never evicts it — a running
//! supervisor only ever sees a small, effectively static set of repository
//! names, so the map cannot grow unbounded in practice, and the eviction
//! race that a "release drops the last reference" scheme would otherwise
//! need to guard against is avoided entirely. Because the held lock is
//! released by dropping its guard, `NoSuchLock` (a release without a
//! matching acquire) is structurally impossible rather than checked at
//! runtime.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use tokio::sync::{Mutex as TokioMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: StdMutex<HashMap<String, Arc<TokioMutex<()>>>>,
}

/// Holds exclusive access to a single repository name until dropped.
pub struct RepositoryLock {
    name: String,
    _guard: OwnedMutexGuard<()>,
}

impl RepositoryLock {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks (asynchronously) until the caller is the sole holder for `name`.
    pub async fn acquire(&self, name: &str) -> RepositoryLock {
        let entry = {
            let mut locks = self.locks.lock().expect("lock registry poisoned");
            locks
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(TokioMutex::new(())))
                .clone()
        };

        let guard = entry.lock_owned().await;

        RepositoryLock {
            name: name.to_owned(),
            _guard: guard,
        }
    }
}
