//! Error types for the merkle crate.

use teraindex_core::MerkleHash;
use teraindex_store::StoreError;
use thiserror::Error;

/// Merkle build and proof errors.
#[derive(Error, Debug)]
pub enum MerkleError {
    /// Tree build or proof requested over zero leaves.
    #[error("cannot build a merkle tree with zero transactions")]
    EmptyTree,

    /// Requested leaf position is outside the tree.
    #[error("position {position} exceeds leaf count {count}")]
    BadPosition {
        /// Requested position.
        position: u32,
        /// Number of leaves under the tree.
        count: u32,
    },

    /// An internal node referenced by the walk is not in the store.
    #[error("merkle node {0} not found in store")]
    MissingNode(MerkleHash),

    /// A stored internal node is not exactly 64 bytes.
    #[error("merkle node {hash} has {got} bytes, expected 64")]
    CorruptNode {
        /// Content address of the bad node.
        hash: MerkleHash,
        /// Observed size.
        got: usize,
    },

    /// Underlying content store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type alias for [`MerkleError`].
pub type Result<T> = std::result::Result<T, MerkleError>;
