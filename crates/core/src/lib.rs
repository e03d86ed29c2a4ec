//! Core types for teraindex.
//!
//! This crate defines the two self-describing hash domains that share the
//! content-addressed key space:
//!
//! - [`MerkleHash`] — dbl-sha2-256 (`0x56`) over Bitcoin data: raw
//!   transactions, block headers, merkle tree nodes.
//! - [`IndexHash`] — BLAKE3-256 (`0x1e`) over index data: index nodes and
//!   txid lists.
//!
//! Both render as exactly 34 bytes (`<code><0x20><digest32>`), so a key read
//! back from storage always identifies its own verification algorithm. Raw
//! 32-byte digests are never used as storage keys; builders that receive a
//! raw Bitcoin digest convert through [`MerkleHash::wrap`] at the boundary.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod constants;
pub mod error;
pub mod multihash;

pub use constants::*;
pub use error::MultihashError;
pub use multihash::{
    display_hex, double_sha256, from_display_hex, Hash32, IndexHash, MerkleHash,
};
