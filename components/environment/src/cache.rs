//! Least-recently-used caches
//!
//! [`LruCache`] is the plain single-owner cache. [`SharedLruCache`] wraps it
//! in a mutex so many renders can look templates up at once; the environment
//! keeps its compiled templates in one.

use std::hash::Hash;

use indexmap::IndexMap;
use parking_lot::Mutex;

/// Cache that evicts the entry accessed longest ago
///
/// Entries are kept in recency order, oldest first. Both [`LruCache::get`]
/// and [`LruCache::insert`] count as an access.
///
/// # Example
///
/// ```
/// use environment::LruCache;
///
/// let mut cache = LruCache::new(Some(2));
/// cache.insert("a", 1);
/// cache.insert("b", 2);
/// cache.get(&"a");
/// cache.insert("c", 3);
///
/// assert!(cache.contains(&"a"));
/// assert!(!cache.contains(&"b"));
/// ```
#[derive(Debug, Clone)]
pub struct LruCache<K, V> {
    capacity: Option<usize>,
    entries: IndexMap<K, V>,
}

impl<K: Hash + Eq + Clone, V: Clone> LruCache<K, V> {
    /// Create a cache holding at most `capacity` entries; `None` never evicts
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            entries: IndexMap::new(),
        }
    }

    /// Maximum number of entries, if bounded
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Look up an entry and mark it most recently used
    pub fn get(&mut self, key: &K) -> Option<V> {
        let idx = self.entries.get_index_of(key)?;
        let last = self.entries.len() - 1;
        self.entries.move_index(idx, last);
        self.entries.get_index(last).map(|(_, v)| v.clone())
    }

    /// Look up an entry without touching its recency
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// True if the key is cached
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or replace an entry, evicting the least recently used one when
    /// full. Returns the evicted entry.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if self.capacity == Some(0) {
            return None;
        }
        self.entries.shift_remove(&key);
        self.entries.insert(key, value);
        match self.capacity {
            Some(capacity) if self.entries.len() > capacity => self.entries.shift_remove_index(0),
            _ => None,
        }
    }

    /// Remove an entry
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.shift_remove(key)
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys from least to most recently used
    pub fn keys(&self) -> Vec<K> {
        self.entries.keys().cloned().collect()
    }
}

/// [`LruCache`] behind a mutex
#[derive(Debug)]
pub struct SharedLruCache<K, V> {
    inner: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq + Clone, V: Clone> SharedLruCache<K, V> {
    /// Create a cache holding at most `capacity` entries; `None` never evicts
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Maximum number of entries, if bounded
    pub fn capacity(&self) -> Option<usize> {
        self.inner.lock().capacity()
    }

    /// See [`LruCache::get`]
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().get(key)
    }

    /// See [`LruCache::insert`]
    pub fn insert(&self, key: K, value: V) -> Option<(K, V)> {
        self.inner.lock().insert(key, value)
    }

    /// See [`LruCache::remove`]
    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().remove(key)
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Keys from least to most recently used
    pub fn keys(&self) -> Vec<K> {
        self.inner.lock().keys()
    }
}
