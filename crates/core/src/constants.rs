//! Shared constants.

/// Multihash algorithm code for BLAKE3-256 (index-side hashes).
pub const BLAKE3_CODE: u8 = 0x1e;

/// Multihash algorithm code for dbl-sha2-256 (Bitcoin-side hashes).
pub const DBL_SHA2_256_CODE: u8 = 0x56;

/// Digest length shared by both algorithms, in bytes.
pub const DIGEST_LEN: usize = 32;

/// Total serialized length of a multihash: code byte + length byte + digest.
pub const MULTIHASH_LEN: usize = 34;

/// Number of blocks below the tip after which orphaned blocks are
/// permanently deleted.
pub const DEFAULT_FINALITY_DEPTH: u64 = 100;
