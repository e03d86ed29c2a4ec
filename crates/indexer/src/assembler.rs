//! Block assembly: join pending subtrees into committed block metadata.
//!
//! The metadata commit is the single linearization point. Everything a
//! block row transitively references — transaction bodies, merkle nodes,
//! index nodes, the header itself — is durably in the content store before
//! `put_block` runs, so a reader that observes a main-chain row can resolve
//! every hash it leads to.

use std::collections::HashMap;

use anyhow::{Context, Result};
use std::sync::Arc;
use teraindex_core::{display_hex, double_sha256, Hash32, MerkleHash};
use teraindex_index::{SubtreeInfo, TreeBuilder};
use teraindex_merkle::compute_root;
use teraindex_store::ContentStore;
use tracing::{info, warn};

use crate::chain::{ChainEntry, HeaderChain};
use crate::messages::BlockMessage;
use crate::processor::SubtreeBuildResult;
use crate::storage::{BlockMeta, BlockStatus, MetadataStore, SubtreeMeta};

/// What happened to a block announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Block and subtrees committed to metadata.
    Committed {
        /// Total transactions across the block.
        tx_count: u32,
    },
    /// One or more announced subtrees have not been processed yet. The
    /// block is dropped; a re-announcement retries once the subtrees have
    /// arrived.
    Deferred {
        /// The subtree roots without a pending entry.
        missing: Vec<Hash32>,
    },
}

/// Joins pending subtrees into blocks and owns the reorg lifecycle.
pub struct BlockAssembler {
    store: Arc<dyn ContentStore>,
    metadata: MetadataStore,
    tree_builder: TreeBuilder,
    chain: Arc<HeaderChain>,
    finality_depth: u64,
}

impl BlockAssembler {
    /// Wire up the assembler.
    pub fn new(
        store: Arc<dyn ContentStore>,
        metadata: MetadataStore,
        chain: Arc<HeaderChain>,
        finality_depth: u64,
    ) -> Self {
        Self {
            tree_builder: TreeBuilder::new(store.clone()),
            store,
            metadata,
            chain,
            finality_depth,
        }
    }

    /// Handle one block announcement against the pending-subtree map.
    ///
    /// On commit the consumed pending entries are removed; on deferral the
    /// map is left untouched.
    pub async fn handle_block(
        &self,
        msg: &BlockMessage,
        pending: &mut HashMap<Hash32, SubtreeBuildResult>,
    ) -> Result<BlockOutcome> {
        let block_hash_hex = display_hex(&msg.hash);

        // The announced hash must be the hash of the announced header.
        let computed_hash = double_sha256(&msg.header_bytes);
        anyhow::ensure!(
            computed_hash == msg.hash,
            "announced block hash {} does not match header hash {}",
            block_hash_hex,
            display_hex(&computed_hash)
        );
        anyhow::ensure!(
            !msg.subtree_roots.is_empty(),
            "block {} announces no subtrees",
            block_hash_hex
        );

        // Partial commit is forbidden: either every announced subtree is
        // pending, or the block waits for a re-announcement.
        let mut results = Vec::with_capacity(msg.subtree_roots.len());
        let mut missing = Vec::new();
        for root in &msg.subtree_roots {
            match pending.get(root) {
                Some(result) => results.push(result),
                None => missing.push(*root),
            }
        }
        if !missing.is_empty() {
            return Ok(BlockOutcome::Deferred { missing });
        }

        // The subtree roots must fold to the header's merkle root.
        let roots: Vec<Hash32> = results.iter().map(|r| r.tx_tree_root.raw()).collect();
        let folded = compute_root(&roots)?;
        anyhow::ensure!(
            folded == msg.header.merkle_root,
            "subtree roots fold to {} but header commits to {}",
            display_hex(&folded),
            display_hex(&msg.header.merkle_root)
        );

        // Reorg check: a different main-chain block at this height loses.
        if let Some(existing) = self.metadata.get_block_by_height(msg.height).await? {
            if existing.merkle_root != msg.header.merkle_root {
                warn!(
                    height = msg.height,
                    old = %display_hex(&existing.block_hash),
                    new = %block_hash_hex,
                    "reorg detected, orphaning previous block"
                );
                self.metadata.mark_orphan(msg.height).await?;
                self.chain.reorg(msg.height.saturating_sub(1));
            }
        }

        // Content-address first: header, coinbase, block→subtree node.
        self.store
            .put(MerkleHash::wrap(msg.hash).as_bytes(), &msg.header_bytes)
            .await?;
        if !msg.coinbase.is_empty() {
            let coinbase_txid = double_sha256(&msg.coinbase);
            self.store
                .put(MerkleHash::wrap(coinbase_txid).as_bytes(), &msg.coinbase)
                .await?;
        }

        let infos: Vec<SubtreeInfo> = results
            .iter()
            .map(|r| SubtreeInfo {
                subtree_merkle_root: r.subtree_merkle_root,
                tx_count: r.tx_count,
                index_root: r.index_root,
            })
            .collect();
        let subtree_node = self.tree_builder.build_block_subtree_node(&infos)?;
        self.store
            .put(
                MerkleHash::wrap(msg.header.merkle_root).as_bytes(),
                &subtree_node,
            )
            .await?;

        // Metadata last: the one atomic commit point.
        let tx_count: u32 = results.iter().map(|r| r.tx_count).sum();
        let block = BlockMeta {
            height: msg.height,
            block_hash: msg.hash,
            merkle_root: msg.header.merkle_root,
            tx_count,
            status: BlockStatus::Main,
            timestamp: msg.header.timestamp as i64,
        };
        let subtree_meta: Vec<SubtreeMeta> = results
            .iter()
            .enumerate()
            .map(|(i, r)| SubtreeMeta {
                merkle_root: msg.header.merkle_root,
                subtree_index: i as u32,
                subtree_merkle_root: r.subtree_merkle_root,
                tx_count: r.tx_count,
                index_root: r.index_root,
                tx_tree_root: r.tx_tree_root,
            })
            .collect();

        self.metadata
            .put_block(&block, &subtree_meta)
            .await
            .with_context(|| format!("committing block {block_hash_hex}"))?;

        let retired = self
            .metadata
            .cleanup_orphans(msg.height, self.finality_depth)
            .await?;
        if retired > 0 {
            info!(retired, "orphaned blocks retired past finality depth");
        }

        self.chain.add(ChainEntry {
            height: msg.height,
            hash: msg.hash,
            header: msg.header,
        });

        for root in &msg.subtree_roots {
            pending.remove(root);
        }

        info!(
            height = msg.height,
            block = %block_hash_hex,
            subtrees = subtree_meta.len(),
            txs = tx_count,
            "block committed"
        );

        Ok(BlockOutcome::Committed { tx_count })
    }
}
