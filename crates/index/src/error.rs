//! Error types for the index crate.

use teraindex_core::IndexHash;
use teraindex_store::StoreError;
use thiserror::Error;

/// IndexNode codec errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Encoding an empty node is forbidden.
    #[error("cannot encode empty index node")]
    Empty,

    /// Entry count exceeds the u16 header field.
    #[error("too many entries: {0} (max 65535)")]
    TooManyEntries(usize),

    /// Entry key does not match the node's fixed key size.
    #[error("key size mismatch: expected {expected}, got {got}")]
    KeySizeMismatch {
        /// Size declared in the header.
        expected: u16,
        /// Size of the offered key.
        got: usize,
    },

    /// Entry value does not match the node's fixed value size.
    #[error("value size mismatch: expected {expected}, got {got}")]
    ValueSizeMismatch {
        /// Size declared in the header.
        expected: u8,
        /// Size of the offered value.
        got: usize,
    },

    /// A key was supplied to a keyless node.
    #[error("key must be empty when key_size is 0")]
    UnexpectedKey,

    /// A data offset was supplied but the node has no data section.
    #[error("offset must be 0 when the node has no data section")]
    OffsetWithoutData,

    /// Data was pushed into a node without a data section.
    #[error("node has no data section")]
    NoDataSection,

    /// Sorting by data requested on a node without a data section.
    #[error("cannot sort by data without a data section")]
    SortWithoutData,

    /// Sorting by key requested on a keyless node.
    #[error("cannot sort by key when key_size is 0")]
    SortWithoutKeys,

    /// Two entries share a sort key; callers must deduplicate.
    #[error("duplicate sort key at entry {0}")]
    DuplicateSortKey(usize),

    /// Buffer is too short for the declared layout.
    #[error("index node truncated: need {need} bytes, got {got}")]
    Truncated {
        /// Minimum length the header implies.
        need: usize,
        /// Actual buffer length.
        got: usize,
    },

    /// Version byte is not supported.
    #[error("unsupported index node version: {0}")]
    BadVersion(u8),

    /// Header declares zero entries.
    #[error("index node entry count is zero")]
    ZeroEntries,

    /// The data section grew past what a 4-byte offset can address.
    #[error("data section overflow")]
    DataOverflow,
}

/// Tree building and lookup errors.
#[derive(Error, Debug)]
pub enum IndexError {
    /// No transactions were offered to the builder.
    #[error("no transactions to index")]
    EmptyInput,

    /// A referenced index object is not in the store.
    #[error("index object {0} not found in store")]
    Missing(IndexHash),

    /// A stored txid list does not match its declared layout.
    #[error("malformed txid list: {0}")]
    BadTxidList(String),

    /// A node entry that should hold a multihash pointer does not.
    #[error("malformed index pointer: {0}")]
    BadPointer(String),

    /// Node codec failure.
    #[error(transparent)]
    Node(#[from] NodeError),

    /// Underlying content store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}
