//! Error types for the core crate.

use thiserror::Error;

/// Multihash decoding and verification errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MultihashError {
    /// The byte sequence is not a well-formed 34-byte multihash.
    #[error("malformed multihash: expected {expected} bytes, got {got}")]
    Malformed {
        /// Expected serialized length.
        expected: usize,
        /// Actual length observed.
        got: usize,
    },

    /// The algorithm code byte is not one of the supported algorithms.
    #[error("unknown multihash algorithm: 0x{0:02x}")]
    UnknownAlgorithm(u8),

    /// The declared digest length is not 32 bytes.
    #[error("unsupported digest length: {0}")]
    BadDigestLength(u8),

    /// The hash does not match the provided data.
    #[error("hash verification failed")]
    Mismatch,
}
