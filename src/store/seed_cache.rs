use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tracing::debug;

/// Default bound on buffered row document seeds.
pub const MAX_ROW_DOC_SEEDS: usize = 2000;

/// Pre-fetched document bytes held until the document is actually opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocSeed {
    pub bytes: Vec<u8>,
    pub encoder_version: i32,
}

/// Bounded holding area for document bytes awaiting first open.
///
/// Insertion-ordered with pure FIFO eviction: on overflow the oldest inserted
/// entry goes, regardless of when it was last touched. Entries are consumed
/// exactly once via `take`.
pub struct SeedCache {
    capacity: usize,
    inner: Mutex<SeedCacheInner>,
}

#[derive(Default)]
struct SeedCacheInner {
    entries: HashMap<String, DocSeed>,
    // Insertion order; may hold keys already taken, skipped during eviction.
    order: VecDeque<String>,
}

impl SeedCache {
    pub fn new() -> Self {
        Self::with_capacity(MAX_ROW_DOC_SEEDS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(SeedCacheInner::default()),
        }
    }

    /// Insert a seed, evicting the oldest entry if the bound is exceeded.
    /// Re-inserting an existing key refreshes the bytes but keeps the key's
    /// original position in the eviction order.
    pub fn insert(&self, key: String, seed: DocSeed) {
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.insert(key.clone(), seed).is_none() {
            inner.order.push_back(key);
        }
        while inner.entries.len() > self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    if inner.entries.remove(&oldest).is_some() {
                        debug!("Seed cache full; evicted oldest seed '{}'", oldest);
                    }
                }
                None => break,
            }
        }
    }

    /// Consume-once read: a second `take` of the same key returns `None`.
    pub fn take(&self, key: &str) -> Option<DocSeed> {
        self.inner.lock().unwrap().entries.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().unwrap().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything, for test isolation and workspace switches.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.order.clear();
    }
}

impl Default for SeedCache {
    fn default() -> Self {
        Self::new()
    }
}
