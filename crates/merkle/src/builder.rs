//! Level-by-level Bitcoin merkle tree construction.

use std::sync::Arc;

use teraindex_core::{double_sha256, Hash32, MerkleHash};
use teraindex_store::ContentStore;
use tracing::debug;

use crate::error::{MerkleError, Result};

/// Compute the Bitcoin merkle parent of two child digests.
pub fn hash_pair(left: &Hash32, right: &Hash32) -> Hash32 {
    let mut combined = [0u8; 64];
    combined[..32].copy_from_slice(left);
    combined[32..].copy_from_slice(right);
    double_sha256(&combined)
}

/// Compute a Bitcoin merkle root in memory, with odd-duplication at every
/// level. Nothing is stored; used to check a block header's merkle root
/// against its subtree roots before committing metadata.
pub fn compute_root(hashes: &[Hash32]) -> Result<Hash32> {
    if hashes.is_empty() {
        return Err(MerkleError::EmptyTree);
    }

    let mut level = hashes.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            next.push(hash_pair(left, right));
        }
        level = next;
    }

    Ok(level[0])
}

/// Builds Bitcoin merkle trees over transaction IDs and persists the
/// internal nodes in IPLD form.
pub struct MerkleBuilder {
    store: Arc<dyn ContentStore>,
}

impl MerkleBuilder {
    /// Create a builder over the given content store.
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    /// Access the underlying store (shared with the proof walker).
    pub(crate) fn store(&self) -> &dyn ContentStore {
        self.store.as_ref()
    }

    /// Build the merkle tree over `txids` in order, storing every internal
    /// node as 64 bytes under the multihash of its own double-SHA256.
    /// Returns the root as a wrapped multihash.
    ///
    /// A single-transaction tree stores nothing: its root is the txid.
    pub async fn build_tree(&self, txids: &[Hash32]) -> Result<MerkleHash> {
        if txids.is_empty() {
            return Err(MerkleError::EmptyTree);
        }
        if txids.len() == 1 {
            return Ok(MerkleHash::wrap(txids[0]));
        }

        let mut level = txids.to_vec();
        let mut stored = 0usize;

        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));

            for pair in level.chunks(2) {
                let left = &pair[0];
                // Bitcoin's odd-duplication rule: a trailing element pairs
                // with itself.
                let right = pair.get(1).unwrap_or(left);

                let mut node = [0u8; 64];
                node[..32].copy_from_slice(left);
                node[32..].copy_from_slice(right);

                let parent = double_sha256(&node);
                self.store
                    .put(MerkleHash::wrap(parent).as_bytes(), &node)
                    .await?;
                stored += 1;

                next.push(parent);
            }

            level = next;
        }

        debug!(leaves = txids.len(), nodes = stored, "merkle tree stored");
        Ok(MerkleHash::wrap(level[0]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};
    use teraindex_store::MemoryStore;

    fn sha(data: &[u8]) -> Hash32 {
        Sha256::digest(data).into()
    }

    fn builder() -> MerkleBuilder {
        MerkleBuilder::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_build_four_leaves() {
        let b = builder();
        let txids = vec![sha(b"tx1"), sha(b"tx2"), sha(b"tx3"), sha(b"tx4")];

        let root = b.build_tree(&txids).await.unwrap();
        assert_eq!(root.as_bytes().len(), 34);

        let h01 = hash_pair(&txids[0], &txids[1]);
        let h23 = hash_pair(&txids[2], &txids[3]);
        assert_eq!(root.raw(), hash_pair(&h01, &h23));
    }

    #[tokio::test]
    async fn test_build_single_leaf_stores_nothing() {
        let store = Arc::new(MemoryStore::new());
        let b = MerkleBuilder::new(store.clone());

        let txid = sha(b"single-tx");
        let root = b.build_tree(&[txid]).await.unwrap();

        assert_eq!(root.raw(), txid);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_build_odd_count_duplicates_last() {
        let b = builder();
        let txids = vec![sha(b"tx1"), sha(b"tx2"), sha(b"tx3")];

        let root = b.build_tree(&txids).await.unwrap();

        let h01 = hash_pair(&txids[0], &txids[1]);
        let h22 = hash_pair(&txids[2], &txids[2]);
        assert_eq!(root.raw(), hash_pair(&h01, &h22));
    }

    #[tokio::test]
    async fn test_build_empty_fails() {
        let b = builder();
        assert!(matches!(
            b.build_tree(&[]).await,
            Err(MerkleError::EmptyTree)
        ));
    }

    #[tokio::test]
    async fn test_stored_tree_matches_in_memory_root() {
        let b = builder();
        for n in 1..=9usize {
            let txids: Vec<Hash32> = (0..n).map(|i| sha(format!("tx{i}").as_bytes())).collect();
            let stored = b.build_tree(&txids).await.unwrap();
            let in_memory = compute_root(&txids).unwrap();
            assert_eq!(stored.raw(), in_memory, "mismatch at {n} leaves");
        }
    }

    #[test]
    fn test_compute_root_empty_fails() {
        assert!(matches!(compute_root(&[]), Err(MerkleError::EmptyTree)));
    }

    #[test]
    fn test_hash_pair_is_double_sha256_of_concat() {
        let left = sha(b"left");
        let right = sha(b"right");

        let mut combined = [0u8; 64];
        combined[..32].copy_from_slice(&left);
        combined[32..].copy_from_slice(&right);

        assert_eq!(hash_pair(&left, &right), double_sha256(&combined));
    }
}
