//! Durable content store backed by sled.
//!
//! Layout: one `content` tree holds the key-value pairs, one `expiry` tree
//! maps keys carrying a TTL to their absolute expiry time (u64 big-endian
//! unix milliseconds). Expiry is enforced lazily on `get` and swept in bulk
//! by `run_gc`.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use sled::Tree;
use tracing::{debug, info};

use crate::{ContentStore, StoreError};

const CONTENT_TREE: &str = "content";
const EXPIRY_TREE: &str = "expiry";

/// Longest key the store accepts, in bytes.
pub const MAX_KEY_LEN: usize = 64;

/// Shortest key the store accepts, in bytes.
pub const MIN_KEY_LEN: usize = 2;

/// A sled-backed [`ContentStore`].
pub struct SledStore {
    db: sled::Db,
    content: Tree,
    expiry: Tree,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub(crate) fn check_key(key: &[u8]) -> Result<(), StoreError> {
    if key.len() < MIN_KEY_LEN || key.len() > MAX_KEY_LEN {
        return Err(StoreError::Policy(format!(
            "key length {} outside {}..={}",
            key.len(),
            MIN_KEY_LEN,
            MAX_KEY_LEN
        )));
    }
    Ok(())
}

impl SledStore {
    /// Open (or create) a store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path.as_ref())?;
        let content = db.open_tree(CONTENT_TREE)?;
        let expiry = db.open_tree(EXPIRY_TREE)?;

        info!(path = %path.as_ref().display(), "content store opened");

        Ok(Self {
            db,
            content,
            expiry,
        })
    }

    fn expiry_of(&self, key: &[u8]) -> Result<Option<u64>, StoreError> {
        match self.expiry.get(key)? {
            Some(raw) if raw.len() == 8 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&raw);
                Ok(Some(u64::from_be_bytes(buf)))
            }
            Some(raw) => Err(StoreError::Corruption(format!(
                "expiry entry has {} bytes, expected 8",
                raw.len()
            ))),
            None => Ok(None),
        }
    }

    fn remove_entry(&self, key: &[u8]) -> Result<(), StoreError> {
        self.content.remove(key)?;
        self.expiry.remove(key)?;
        Ok(())
    }
}

#[async_trait]
impl ContentStore for SledStore {
    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        check_key(key)?;
        self.content.insert(key, value)?;
        // A plain put clears any TTL a previous put_with_ttl may have set.
        self.expiry.remove(key)?;
        Ok(())
    }

    async fn put_with_ttl(
        &self,
        key: &[u8],
        value: &[u8],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        check_key(key)?;
        let expires_at = now_millis().saturating_add(ttl.as_millis() as u64);
        self.content.insert(key, value)?;
        self.expiry.insert(key, &expires_at.to_be_bytes())?;
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(expires_at) = self.expiry_of(key)? {
            if expires_at <= now_millis() {
                self.remove_entry(key)?;
                return Ok(None);
            }
        }
        Ok(self.content.get(key)?.map(|v| v.to_vec()))
    }

    async fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.remove_entry(key)
    }

    async fn run_gc(&self, _discard_ratio: f64) -> Result<(), StoreError> {
        let now = now_millis();
        let mut swept = 0usize;

        for entry in self.expiry.iter() {
            let (key, raw) = entry?;
            if raw.len() != 8 {
                continue;
            }
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&raw);
            if u64::from_be_bytes(buf) <= now {
                self.content.remove(&key)?;
                self.expiry.remove(&key)?;
                swept += 1;
            }
        }

        self.db.flush_async().await?;
        debug!(swept, "content store gc pass complete");
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.db.flush_async().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, SledStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let (_dir, store) = open_temp();

        let key = [0x56u8, 0x20, 1, 2, 3];
        store.put(&key, b"value").await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(b"value".to_vec()));

        store.delete(&key).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_key_is_none_not_error() {
        let (_dir, store) = open_temp();
        assert_eq!(store.get(&[1, 2, 3]).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite_same_bytes_is_noop() {
        let (_dir, store) = open_temp();

        let key = [0x1eu8, 0x20, 9, 9];
        store.put(&key, b"content").await.unwrap();
        store.put(&key, b"content").await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(b"content".to_vec()));
    }

    #[tokio::test]
    async fn test_key_length_policy() {
        let (_dir, store) = open_temp();

        assert!(matches!(
            store.put(&[1], b"v").await,
            Err(StoreError::Policy(_))
        ));
        assert!(matches!(
            store.put(&[0u8; 65], b"v").await,
            Err(StoreError::Policy(_))
        ));
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let (_dir, store) = open_temp();

        let key = [7u8, 7, 7];
        store
            .put_with_ttl(&key, b"ephemeral", Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(b"ephemeral".to_vec()));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_plain_put_clears_ttl() {
        let (_dir, store) = open_temp();

        let key = [8u8, 8, 8];
        store
            .put_with_ttl(&key, b"short-lived", Duration::from_millis(20))
            .await
            .unwrap();
        store.put(&key, b"permanent").await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get(&key).await.unwrap(), Some(b"permanent".to_vec()));
    }

    #[tokio::test]
    async fn test_gc_sweeps_expired_entries() {
        let (_dir, store) = open_temp();

        store
            .put_with_ttl(&[1u8, 1], b"a", Duration::from_millis(10))
            .await
            .unwrap();
        store.put(&[2u8, 2], b"b").await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        store.run_gc(0.5).await.unwrap();

        assert_eq!(store.get(&[1u8, 1]).await.unwrap(), None);
        assert_eq!(store.get(&[2u8, 2]).await.unwrap(), Some(b"b".to_vec()));
    }

    #[tokio::test]
    async fn test_durability_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let key = [0x56u8, 0x20, 0xaa];

        {
            let store = SledStore::open(dir.path()).unwrap();
            store.put(&key, b"durable").await.unwrap();
            store.close().await.unwrap();
        }

        let store = SledStore::open(dir.path()).unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(b"durable".to_vec()));
    }
}
