//! Named mutual-exclusion locks keyed by entity id.
//!
//! Every mutating operation on a twin acquires the lock for that twin's
//! key, performs its full read-modify-write sequence, and releases the
//! lock on every exit path (guards are RAII). Two operations on the same
//! key are strictly serialized; different keys proceed in parallel.
//!
//! The registry is advisory within a single process. A horizontally
//! scaled deployment needs a cross-process mutex behind the same
//! interface, since correctness depends on global exclusion per id.
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::errors::LockError;

#[derive(Debug)]
struct Slot {
    mutex: Arc<AsyncMutex<()>>,
    /// Holders plus waiters; the slot is pruned when this reaches zero.
    refs: usize,
}

type SlotMap = Arc<StdMutex<HashMap<String, Slot>>>;

/// Registry of per-key async locks with bounded acquisition.
pub struct LockRegistry {
    slots: SlotMap,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Acquires the lock for `key`, waiting at most `timeout`.
    pub async fn acquire(&self, key: &str, timeout: Duration) -> Result<LockGuard, LockError> {
        let mutex = {
            let mut slots = self.slots.lock().unwrap();
            let slot = slots.entry(key.to_string()).or_insert_with(|| Slot {
                mutex: Arc::new(AsyncMutex::new(())),
                refs: 0,
            });
            slot.refs += 1;
            Arc::clone(&slot.mutex)
        };

        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(LockGuard {
                key: key.to_string(),
                slots: Arc::clone(&self.slots),
                _guard: guard,
            }),
            Err(_) => {
                release_ref(&self.slots, key);
                Err(LockError::AcquireTimeout {
                    key: key.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Acquires several locks in sorted key order, so two callers locking
    /// overlapping sets cannot deadlock each other. Duplicate keys are
    /// collapsed. On timeout every lock taken so far is released.
    pub async fn acquire_ordered(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> Result<Vec<LockGuard>, LockError> {
        let mut sorted: Vec<&String> = keys.iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for key in sorted {
            guards.push(self.acquire(key, timeout).await?);
        }
        Ok(guards)
    }

    /// Number of live slots, for tests and diagnostics.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn release_ref(slots: &SlotMap, key: &str) {
    let mut slots = slots.lock().unwrap();
    if let Some(slot) = slots.get_mut(key) {
        slot.refs -= 1;
        if slot.refs == 0 {
            slots.remove(key);
        }
    }
}

/// RAII guard for one acquired key; dropping it releases the lock.
#[derive(Debug)]
pub struct LockGuard {
    key: String,
    slots: SlotMap,
    _guard: OwnedMutexGuard<()>,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        release_ref(&self.slots, &self.key);
    }
}
