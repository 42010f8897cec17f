//! Advisory locks keyed by fingerprint value
//!
//! Two listings sharing a fingerprint must not resolve concurrently, or each
//! would miss the other as a candidate. Locks are always taken in sorted key
//! order so overlapping key sets cannot deadlock.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = HashMap<String, Arc<Mutex<()>>>;

/// In-process registry of per-fingerprint mutexes
#[derive(Debug, Clone, Default)]
pub struct FingerprintLocks {
    table: Arc<Mutex<LockTable>>,
}

/// Held locks; released on drop
#[derive(Debug)]
pub struct FingerprintGuard {
    guards: Vec<OwnedMutexGuard<()>>,
}

impl FingerprintGuard {
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

impl FingerprintLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire every key, in sorted order, waiting on any that are held
    pub async fn acquire<I, S>(&self, keys: I) -> FingerprintGuard
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: BTreeSet<String> = keys.into_iter().map(Into::into).collect();

        let mutexes: Vec<Arc<Mutex<()>>> = {
            let mut table = self.table.lock().await;
            // Drop entries nobody holds or waits on
            table.retain(|_, m| Arc::strong_count(m) > 1);
            keys.iter()
                .map(|key| table.entry(key.clone()).or_default().clone())
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }
        FingerprintGuard { guards }
    }

    /// Number of keys currently tracked
    pub async fn tracked(&self) -> usize {
        self.table.lock().await.len()
    }
}
