//! Bounded cache for resources that are expensive to resolve or load.
//!
//! Callers construct one and hand it to whatever needs it; there is no
//! process-wide instance. Eviction is least-recently-used.
use anyhow::{anyhow, Result};
use lru::LruCache;
use parking_lot::Mutex;
use std::hash::Hash;
use std::num::NonZeroUsize;

pub struct ResourceCache<K: Hash + Eq, V> {
    entries: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq + Clone, V: Clone> ResourceCache<K, V> {
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity =
            NonZeroUsize::new(capacity).ok_or_else(|| anyhow!("cache capacity must be >= 1"))?;
        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Return the cached value for `key`, loading and inserting it on a miss.
    ///
    /// The loader runs without the lock held, so two workers missing on the
    /// same key may both load it; the later insert wins.
    pub fn get_or_load<F>(&self, key: &K, load: F) -> Result<V>
    where
        F: FnOnce(&K) -> Result<V>,
    {
        if let Some(value) = self.entries.lock().get(key) {
            return Ok(value.clone());
        }
        let value = load(key)?;
        self.entries.lock().put(key.clone(), value.clone());
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
