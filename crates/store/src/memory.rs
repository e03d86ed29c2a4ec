//! In-memory content store for tests.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::sled_store::check_key;
use crate::{ContentStore, StoreError};

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

/// An in-memory [`ContentStore`] with the same observable semantics as the
/// durable backend, minus durability.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<Vec<u8>, Entry>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|e| e.expires_at.map_or(true, |t| t > now))
            .count()
    }

    /// Whether the store holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        check_key(key)?;
        self.entries.write().insert(
            key.to_vec(),
            Entry {
                value: value.to_vec(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn put_with_ttl(
        &self,
        key: &[u8],
        value: &[u8],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        check_key(key)?;
        self.entries.write().insert(
            key.to_vec(),
            Entry {
                value: value.to_vec(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let expired = {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) => match entry.expires_at {
                    Some(t) if t <= Instant::now() => true,
                    _ => return Ok(Some(entry.value.clone())),
                },
                None => return Ok(None),
            }
        };
        if expired {
            self.entries.write().remove(key);
        }
        Ok(None)
    }

    async fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn run_gc(&self, _discard_ratio: f64) -> Result<(), StoreError> {
        let now = Instant::now();
        self.entries
            .write()
            .retain(|_, e| e.expires_at.map_or(true, |t| t > now));
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
