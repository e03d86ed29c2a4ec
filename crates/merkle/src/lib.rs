//! Bitcoin merkle trees in IPLD form.
//!
//! Internal nodes are exactly 64 bytes (`left_digest || right_digest`, raw
//! Bitcoin digests) stored under the multihash of their own double-SHA256,
//! so any stored tree can be walked from its root multihash alone. Leaves
//! are transaction IDs and are never stored as nodes; a one-transaction
//! tree's root *is* the txid.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use teraindex_merkle::MerkleBuilder;
//! # use teraindex_store::MemoryStore;
//! # async fn example() -> Result<(), teraindex_merkle::MerkleError> {
//! let store = Arc::new(MemoryStore::new());
//! let builder = MerkleBuilder::new(store);
//!
//! let txids = vec![[0x11; 32], [0x22; 32], [0x33; 32]];
//! let root = builder.build_tree(&txids).await?;
//!
//! let proof = builder.build_merkle_proof(root, 1, 3).await?;
//! assert!(proof.verify(&root.raw()));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod error;
pub mod proof;

pub use builder::{compute_root, hash_pair, MerkleBuilder};
pub use error::{MerkleError, Result};
pub use proof::{MerkleProof, ProofNode};
