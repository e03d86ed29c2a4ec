//! Hierarchical content-addressed search index for teraindex.
//!
//! One physical node format ([`IndexNode`]) serves five access patterns:
//!
//! 1. `key_size > 0`, no data section — binary search by key → value.
//! 2. `key_size > 0`, data section, sorted by key — search by key → value + data.
//! 3. `key_size > 0`, data section, sorted by data — search by data → value.
//! 4. `key_size == 0`, data section, sorted by data — search by data → value.
//! 5. `key_size == 0`, no data section — array access by index → value.
//!
//! The entry array is fixed-stride, so binary search needs no offset table;
//! variable-length bytes live in an optional trailing data section that
//! entries reference by 4-byte offset.
//!
//! [`TreeBuilder`] assembles the two-level per-subtree search index
//! (`term key → term value → txid list`) out of these nodes, with every
//! object content-addressed by its BLAKE3 multihash so identical structures
//! across subtrees collapse to a single stored copy.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod error;
pub mod node;

pub use builder::{
    decode_txid_list, empty_index_root, SubtreeInfo, TransactionTerms, TreeBuilder,
};
pub use error::{IndexError, NodeError};
pub use node::{Entry, IndexNode};
