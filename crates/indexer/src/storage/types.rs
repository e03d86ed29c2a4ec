//! Row types for the metadata store.

use teraindex_core::{Hash32, IndexHash, MerkleHash};

/// Lifecycle status of a block row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    /// On the current main chain.
    Main,
    /// Replaced by a reorg; retained until finality depth.
    Orphan,
    /// Announced but not yet confirmed.
    Pending,
}

impl BlockStatus {
    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockStatus::Main => "main",
            BlockStatus::Orphan => "orphan",
            BlockStatus::Pending => "pending",
        }
    }

    /// Parse the database representation.
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "main" => Ok(BlockStatus::Main),
            "orphan" => Ok(BlockStatus::Orphan),
            "pending" => Ok(BlockStatus::Pending),
            other => anyhow::bail!("unknown block status '{other}'"),
        }
    }
}

/// A block row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMeta {
    /// Block height.
    pub height: u64,
    /// Block hash (wire order). Unique.
    pub block_hash: Hash32,
    /// Merkle root (wire order). Primary key.
    pub merkle_root: Hash32,
    /// Total transactions across the block's subtrees.
    pub tx_count: u32,
    /// Lifecycle status.
    pub status: BlockStatus,
    /// Header timestamp, unix seconds.
    pub timestamp: i64,
}

/// A subtree row, keyed by `(merkle_root, subtree_index)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtreeMeta {
    /// Merkle root of the owning block.
    pub merkle_root: Hash32,
    /// Position of the subtree within the block, contiguous from 0.
    pub subtree_index: u32,
    /// The subtree's own merkle root.
    pub subtree_merkle_root: Hash32,
    /// Transactions in the subtree.
    pub tx_count: u32,
    /// Root of the subtree's search index.
    pub index_root: IndexHash,
    /// Root of the subtree's stored transaction merkle tree.
    pub tx_tree_root: MerkleHash,
}

/// Aggregate counts for the status display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Total block rows (all statuses).
    pub block_count: u64,
    /// Total subtree rows.
    pub subtree_count: u64,
    /// Orphaned block rows awaiting cleanup.
    pub orphan_count: u64,
    /// Height of the latest main-chain block, if any.
    pub latest_height: Option<u64>,
}
