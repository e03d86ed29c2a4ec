//! Per-subtree search-index construction.
//!
//! For one subtree the builder produces a two-level tree:
//!
//! ```text
//! root IndexNode:  term key   -> leaf node IndexHash
//! leaf IndexNode:  term value -> TxidList IndexHash
//! TxidList:        u32 count || sorted txids
//! ```
//!
//! Every object is stored under its BLAKE3 multihash, so identical txid
//! sets, leaves, or roots produced by different subtrees collapse to one
//! stored copy.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use teraindex_core::{Hash32, IndexHash, MULTIHASH_LEN};
use teraindex_store::{ContentStore, IndexTerm};
use tracing::debug;

use crate::error::IndexError;
use crate::node::IndexNode;

/// A transaction and its extracted index terms, as fed by the processor.
#[derive(Debug, Clone)]
pub struct TransactionTerms {
    /// Transaction ID (wire order).
    pub txid: Hash32,
    /// Terms extracted for this transaction.
    pub terms: Vec<IndexTerm>,
}

/// Summary of a processed subtree, input to the block→subtree mapping node.
#[derive(Debug, Clone)]
pub struct SubtreeInfo {
    /// Merkle root of the subtree.
    pub subtree_merkle_root: Hash32,
    /// Number of transactions in the subtree.
    pub tx_count: u32,
    /// Root of the subtree's search index.
    pub index_root: IndexHash,
}

/// Content address standing in for the index root of a subtree whose
/// transactions produced no terms at all.
///
/// An index node cannot be empty, so nothing is stored under this hash;
/// lookups recognize it and report no matches.
pub fn empty_index_root() -> IndexHash {
    IndexHash::hash(&[])
}

/// Decode a stored TxidList back into its sorted txids.
pub fn decode_txid_list(bytes: &[u8]) -> Result<Vec<Hash32>, IndexError> {
    if bytes.len() < 4 {
        return Err(IndexError::BadTxidList(format!(
            "{} bytes is too short for a count prefix",
            bytes.len()
        )));
    }
    let count = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if bytes.len() != 4 + count * 32 {
        return Err(IndexError::BadTxidList(format!(
            "count {count} does not match {} payload bytes",
            bytes.len() - 4
        )));
    }

    let mut txids = Vec::with_capacity(count);
    for chunk in bytes[4..].chunks_exact(32) {
        let mut txid = [0u8; 32];
        txid.copy_from_slice(chunk);
        txids.push(txid);
    }
    Ok(txids)
}

/// Builds search-index trees for subtrees and the block→subtree mapping.
pub struct TreeBuilder {
    store: Arc<dyn ContentStore>,
}

impl TreeBuilder {
    /// Create a builder over the given content store.
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    /// Build and persist the search index for one subtree, returning the
    /// root node's hash.
    ///
    /// Fails on an empty transaction list. On any store failure the error
    /// propagates before the caller commits subtree metadata, so a partial
    /// index is never referenced.
    pub async fn build_subtree_index(
        &self,
        txs: &[TransactionTerms],
    ) -> Result<IndexHash, IndexError> {
        if txs.is_empty() {
            return Err(IndexError::EmptyInput);
        }

        // Group as term key -> term value -> txid set. BTree ordering gives
        // the deterministic sort the node format requires, and the sets
        // deduplicate txids that carry the same term twice.
        let mut terms: BTreeMap<Vec<u8>, BTreeMap<Vec<u8>, BTreeSet<Hash32>>> = BTreeMap::new();
        for tx in txs {
            for term in &tx.terms {
                terms
                    .entry(term.key.clone())
                    .or_default()
                    .entry(term.value.clone())
                    .or_default()
                    .insert(tx.txid);
            }
        }

        let mut root = new_term_node();

        for (key, values) in &terms {
            let mut leaf = new_term_node();

            for (value, txids) in values {
                let list_hash = self.store_txid_list(txids).await?;
                leaf.add_entry_with_data(b"", list_hash.as_bytes(), value)?;
            }

            let leaf_bytes = leaf.encode()?;
            let leaf_hash = IndexHash::hash(&leaf_bytes);
            self.store.put(leaf_hash.as_bytes(), &leaf_bytes).await?;

            root.add_entry_with_data(b"", leaf_hash.as_bytes(), key)?;
        }

        if root.is_empty() {
            // Transactions present but no extractor produced any terms.
            return Err(IndexError::EmptyInput);
        }

        let root_bytes = root.encode()?;
        let root_hash = IndexHash::hash(&root_bytes);
        self.store.put(root_hash.as_bytes(), &root_bytes).await?;

        debug!(
            keys = terms.len(),
            root = %root_hash,
            "subtree index stored"
        );

        Ok(root_hash)
    }

    /// Build the block→subtree mapping node: fixed 32-byte subtree merkle
    /// root keys, 34-byte index-root multihash values, per-entry tx count in
    /// the data section. Returned serialized; the caller decides where to
    /// store it.
    pub fn build_block_subtree_node(
        &self,
        subtrees: &[SubtreeInfo],
    ) -> Result<Vec<u8>, IndexError> {
        if subtrees.is_empty() {
            return Err(IndexError::EmptyInput);
        }

        let mut node = IndexNode::new(32, MULTIHASH_LEN as u8, true, false, false);
        for subtree in subtrees {
            node.add_entry_with_data(
                &subtree.subtree_merkle_root,
                subtree.index_root.as_bytes(),
                &subtree.tx_count.to_be_bytes(),
            )?;
        }
        node.sort()?;

        Ok(node.encode()?)
    }

    /// Look up the txids recorded for `(term key, term value)` under a
    /// stored index root. Returns `None` when the key or value is not
    /// indexed.
    pub async fn find_txids(
        &self,
        index_root: IndexHash,
        key: &[u8],
        value: &[u8],
    ) -> Result<Option<Vec<Hash32>>, IndexError> {
        if index_root == empty_index_root() {
            return Ok(None);
        }

        let root_bytes = self
            .store
            .get(index_root.as_bytes())
            .await?
            .ok_or(IndexError::Missing(index_root))?;
        let root = IndexNode::decode(&root_bytes)?;

        let leaf_hash = match root.find_by_data(key) {
            Some(v) => IndexHash::from_bytes(v)
                .map_err(|e| IndexError::BadPointer(format!("leaf pointer: {e}")))?,
            None => return Ok(None),
        };

        let leaf_bytes = self
            .store
            .get(leaf_hash.as_bytes())
            .await?
            .ok_or(IndexError::Missing(leaf_hash))?;
        let leaf = IndexNode::decode(&leaf_bytes)?;

        let list_hash = match leaf.find_by_data(value) {
            Some(v) => IndexHash::from_bytes(v)
                .map_err(|e| IndexError::BadPointer(format!("list pointer: {e}")))?,
            None => return Ok(None),
        };

        let list_bytes = self
            .store
            .get(list_hash.as_bytes())
            .await?
            .ok_or(IndexError::Missing(list_hash))?;
        Ok(Some(decode_txid_list(&list_bytes)?))
    }

    /// Serialize, hash, and store a sorted txid list; returns its hash.
    async fn store_txid_list(&self, txids: &BTreeSet<Hash32>) -> Result<IndexHash, IndexError> {
        let mut buf = Vec::with_capacity(4 + txids.len() * 32);
        buf.extend_from_slice(&(txids.len() as u32).to_be_bytes());
        for txid in txids {
            buf.extend_from_slice(txid);
        }

        let hash = IndexHash::hash(&buf);
        self.store.put(hash.as_bytes(), &buf).await?;
        Ok(hash)
    }
}

/// The node shape shared by term roots and leaves: keyless entries holding a
/// 34-byte multihash value, sorted by the variable-length term bytes in the
/// data section.
fn new_term_node() -> IndexNode {
    IndexNode::new(0, MULTIHASH_LEN as u8, true, true, false)
}
