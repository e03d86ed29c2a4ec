//! Content-addressed storage for teraindex.
//!
//! The [`ContentStore`] trait is an opaque byte-keyed store with optional
//! TTL. Keys are self-describing multihashes (34 bytes in practice, but the
//! store accepts any key between 2 and 64 bytes) and values are immutable
//! once written: overwriting a content address with identical bytes is a
//! no-op by construction, which is what makes retries of the ingestion
//! pipeline safe.
//!
//! Two backends are provided:
//!
//! - [`SledStore`] — durable, survives process restart, services the
//!   production pipeline.
//! - [`MemoryStore`] — identical semantics minus durability, for tests.
//!
//! [`TermCache`] is the in-process LRU of parsed per-transaction index
//! terms, shared between subtree processings so a transaction appearing in
//! several subtrees is only run through the extractors once.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod error;
pub mod memory;
pub mod sled_store;

use std::time::Duration;

use async_trait::async_trait;

pub use cache::{IndexTerm, TermCache};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use sled_store::SledStore;

/// A generic content-addressed key-value store.
///
/// Safe for arbitrarily many concurrent readers and writers; writes to the
/// same key serialize inside the backend. A missing key is `Ok(None)`,
/// never an error.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store a key-value pair.
    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Store a key-value pair that expires after `ttl`.
    ///
    /// Expired entries stop being visible to [`get`](Self::get) immediately
    /// and are physically reclaimed by [`run_gc`](Self::run_gc).
    async fn put_with_ttl(&self, key: &[u8], value: &[u8], ttl: Duration)
        -> Result<(), StoreError>;

    /// Retrieve a value by key. Returns `None` if the key does not exist.
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Remove a key-value pair. Removing a missing key is not an error.
    async fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// Reclaim space: sweep expired TTL entries and let the backend compact.
    ///
    /// `discard_ratio` is a hint in `(0, 1]` for how aggressively the
    /// backend should rewrite its storage; backends without that notion
    /// ignore it.
    async fn run_gc(&self, discard_ratio: f64) -> Result<(), StoreError>;

    /// Flush and release resources.
    async fn close(&self) -> Result<(), StoreError>;
}
