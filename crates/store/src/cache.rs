//! LRU cache of parsed per-transaction index terms.
//!
//! A transaction can appear in more than one subtree announcement; caching
//! its extracted terms avoids re-running the extractors on every sighting.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use teraindex_core::Hash32;

/// A single `(key, value)` term extracted from a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexTerm {
    /// Term name, e.g. `protocol`.
    pub key: Vec<u8>,
    /// Term value, e.g. `bap`.
    pub value: Vec<u8>,
}

impl IndexTerm {
    /// Convenience constructor.
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Internally synchronized LRU mapping `txid -> extracted terms`.
pub struct TermCache {
    inner: Mutex<LruCache<Hash32, Vec<IndexTerm>>>,
}

impl TermCache {
    /// Create a cache holding up to `capacity` transactions (clamped to at
    /// least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up cached terms for `txid`, refreshing its recency.
    pub fn get(&self, txid: &Hash32) -> Option<Vec<IndexTerm>> {
        self.inner.lock().get(txid).cloned()
    }

    /// Cache the terms for `txid`.
    pub fn put(&self, txid: Hash32, terms: Vec<IndexTerm>) {
        self.inner.lock().put(txid, terms);
    }

    /// Drop the cached terms for `txid`.
    pub fn delete(&self, txid: &Hash32) {
        self.inner.lock().pop(txid);
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Number of cached transactions.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txid(n: u8) -> Hash32 {
        [n; 32]
    }

    #[test]
    fn test_put_get() {
        let cache = TermCache::new(4);
        let terms = vec![IndexTerm::new(&b"protocol"[..], &b"bap"[..])];

        cache.put(txid(1), terms.clone());
        assert_eq!(cache.get(&txid(1)), Some(terms));
        assert_eq!(cache.get(&txid(2)), None);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = TermCache::new(2);
        cache.put(txid(1), vec![]);
        cache.put(txid(2), vec![]);
        cache.put(txid(3), vec![]);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&txid(1)), None);
        assert!(cache.get(&txid(3)).is_some());
    }

    #[test]
    fn test_delete_and_clear() {
        let cache = TermCache::new(4);
        cache.put(txid(1), vec![]);
        cache.put(txid(2), vec![]);

        cache.delete(&txid(1));
        assert_eq!(cache.get(&txid(1)), None);
        assert!(cache.get(&txid(2)).is_some());

        cache.clear();
        assert!(cache.is_empty());
    }
}
