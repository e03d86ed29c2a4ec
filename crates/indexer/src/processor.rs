//! Per-subtree ingestion pipeline.
//!
//! For each announced subtree, in order: fetch the txid listing, diff it
//! against the content store, fetch missing transaction bodies (bulk or
//! scattered depending on the miss rate), verify every body against its
//! txid, persist, extract index terms (through the cache), build the search
//! index and the merkle tree, and hand the result to the assembler via the
//! pending map.
//!
//! Any step failing aborts the subtree with no metadata written; because
//! every write so far was content-addressed, a re-announcement simply
//! retries.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use teraindex_core::{display_hex, double_sha256, Hash32, IndexHash, MerkleHash};
use teraindex_index::{empty_index_root, TransactionTerms, TreeBuilder};
use teraindex_merkle::MerkleBuilder;
use teraindex_store::{ContentStore, TermCache};
use tracing::{debug, info, warn};

use crate::extract::{TermExtractor, TransactionContext};
use crate::fetcher::TransactionSource;
use crate::messages::SubtreeMessage;

/// Everything the assembler needs to join a processed subtree into a block.
#[derive(Debug, Clone)]
pub struct SubtreeBuildResult {
    /// The subtree's merkle root (also the pending-map key).
    pub subtree_merkle_root: Hash32,
    /// Root of the stored search index.
    pub index_root: IndexHash,
    /// Root of the stored transaction merkle tree.
    pub tx_tree_root: MerkleHash,
    /// Number of transactions.
    pub tx_count: u32,
    /// The txids in tree order.
    pub txids: Vec<Hash32>,
}

/// Drives the per-subtree pipeline.
pub struct SubtreeProcessor {
    store: Arc<dyn ContentStore>,
    source: Arc<dyn TransactionSource>,
    extractor: Arc<dyn TermExtractor>,
    cache: Arc<TermCache>,
    tree_builder: TreeBuilder,
    merkle_builder: MerkleBuilder,
}

impl SubtreeProcessor {
    /// Wire up the pipeline over shared stores.
    pub fn new(
        store: Arc<dyn ContentStore>,
        source: Arc<dyn TransactionSource>,
        extractor: Arc<dyn TermExtractor>,
        cache: Arc<TermCache>,
    ) -> Self {
        Self {
            tree_builder: TreeBuilder::new(store.clone()),
            merkle_builder: MerkleBuilder::new(store.clone()),
            store,
            source,
            extractor,
            cache,
        }
    }

    /// Process one subtree announcement to completion.
    pub async fn process_subtree(&self, msg: &SubtreeMessage) -> Result<SubtreeBuildResult> {
        let subtree = display_hex(&msg.merkle_root);

        let txids = self
            .source
            .fetch_txids(&msg.base_url, &msg.merkle_root)
            .await
            .with_context(|| format!("fetching txids for subtree {subtree}"))?;

        // Diff against already-stored transactions.
        let mut missing = Vec::new();
        for txid in &txids {
            if self
                .store
                .get(MerkleHash::wrap(*txid).as_bytes())
                .await?
                .is_none()
            {
                missing.push(*txid);
            }
        }

        debug!(
            subtree = %subtree,
            total = txids.len(),
            missing = missing.len(),
            "subtree txid listing fetched"
        );

        let fetched = self
            .source
            .fetch_missing(&msg.base_url, &msg.merkle_root, &txids, &missing)
            .await
            .with_context(|| format!("fetching transactions for subtree {subtree}"))?;
        anyhow::ensure!(
            fetched.len() == missing.len(),
            "source returned {} transactions for {} requested",
            fetched.len(),
            missing.len()
        );

        // Trust nothing from the network: every body must hash to the txid
        // it was requested for.
        for (txid, raw) in missing.iter().zip(&fetched) {
            let got = double_sha256(raw);
            anyhow::ensure!(
                got == *txid,
                "fetched transaction hashes to {} but {} was requested",
                display_hex(&got),
                display_hex(txid)
            );
        }

        let mut raw_by_txid: HashMap<Hash32, Vec<u8>> = HashMap::with_capacity(missing.len());
        for (txid, raw) in missing.iter().zip(fetched) {
            self.store
                .put(MerkleHash::wrap(*txid).as_bytes(), &raw)
                .await?;
            raw_by_txid.insert(*txid, raw);
        }

        // Extract terms, consulting the cache first.
        let mut txs = Vec::with_capacity(txids.len());
        for txid in &txids {
            let terms = match self.cache.get(txid) {
                Some(terms) => terms,
                None => {
                    let raw = match raw_by_txid.get(txid) {
                        Some(raw) => raw.clone(),
                        None => self
                            .store
                            .get(MerkleHash::wrap(*txid).as_bytes())
                            .await?
                            .with_context(|| {
                                format!("transaction {} vanished from store", display_hex(txid))
                            })?,
                    };

                    let ctx = TransactionContext {
                        txid: *txid,
                        raw_tx: raw,
                        block_height: None,
                        subtree_root: Some(msg.merkle_root),
                        subtree_index: None,
                    };
                    let terms = match self.extractor.extract(&ctx) {
                        Ok(terms) => terms,
                        Err(e) => {
                            warn!(
                                extractor = self.extractor.name(),
                                txid = %display_hex(txid),
                                error = %format!("{e:#}"),
                                "extraction failed, indexing transaction without terms"
                            );
                            Vec::new()
                        }
                    };
                    self.cache.put(*txid, terms.clone());
                    terms
                }
            };
            txs.push(TransactionTerms {
                txid: *txid,
                terms,
            });
        }

        let index_root = if txs.iter().any(|t| !t.terms.is_empty()) {
            self.tree_builder
                .build_subtree_index(&txs)
                .await
                .with_context(|| format!("building search index for subtree {subtree}"))?
        } else {
            empty_index_root()
        };

        let tx_tree_root = self
            .merkle_builder
            .build_tree(&txids)
            .await
            .with_context(|| format!("building merkle tree for subtree {subtree}"))?;
        anyhow::ensure!(
            tx_tree_root.raw() == msg.merkle_root,
            "computed merkle root {} does not match announced subtree root {}",
            tx_tree_root.display_hex(),
            subtree
        );

        info!(
            subtree = %subtree,
            txs = txids.len(),
            fetched = missing.len(),
            "subtree processed"
        );

        Ok(SubtreeBuildResult {
            subtree_merkle_root: msg.merkle_root,
            index_root,
            tx_tree_root,
            tx_count: txids.len() as u32,
            txids,
        })
    }
}
