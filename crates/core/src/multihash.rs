//! Self-describing hash wrappers for the dual content-address domains.
//!
//! Every content-addressed key in the system is a 34-byte multihash
//! `<algorithm><length><digest>`. For the two algorithms in use here both
//! prefix varints fit in a single byte, so the wrapper overhead is always
//! exactly 2 bytes.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::constants::{BLAKE3_CODE, DBL_SHA2_256_CODE, DIGEST_LEN, MULTIHASH_LEN};
use crate::error::MultihashError;

/// A raw 32-byte digest in wire byte order.
pub type Hash32 = [u8; 32];

/// Compute SHA256(SHA256(data)).
pub fn double_sha256(data: &[u8]) -> Hash32 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

/// Render a 32-byte hash in Bitcoin display order (byte-reversed hex).
///
/// Internally all hashes are kept in wire order; display order only appears
/// at the HTTP/overlay boundary.
pub fn display_hex(hash: &Hash32) -> String {
    let mut reversed = *hash;
    reversed.reverse();
    hex::encode(reversed)
}

/// Parse a display-order (byte-reversed) hex string into a wire-order hash.
pub fn from_display_hex(s: &str) -> Result<Hash32, hex::FromHexError> {
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(s, &mut bytes)?;
    bytes.reverse();
    Ok(bytes)
}

fn compose(code: u8, digest: Hash32) -> [u8; MULTIHASH_LEN] {
    let mut out = [0u8; MULTIHASH_LEN];
    out[0] = code;
    out[1] = DIGEST_LEN as u8;
    out[2..].copy_from_slice(&digest);
    out
}

fn check_prefix(bytes: &[u8], expected_code: u8) -> Result<(), MultihashError> {
    if bytes.len() != MULTIHASH_LEN {
        return Err(MultihashError::Malformed {
            expected: MULTIHASH_LEN,
            got: bytes.len(),
        });
    }
    if bytes[0] != BLAKE3_CODE && bytes[0] != DBL_SHA2_256_CODE {
        return Err(MultihashError::UnknownAlgorithm(bytes[0]));
    }
    if bytes[0] != expected_code {
        return Err(MultihashError::UnknownAlgorithm(bytes[0]));
    }
    if bytes[1] != DIGEST_LEN as u8 {
        return Err(MultihashError::BadDigestLength(bytes[1]));
    }
    Ok(())
}

/// A BLAKE3-256 multihash identifying index-side content.
///
/// Layout: `0x1e 0x20 <digest[32]>`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexHash([u8; MULTIHASH_LEN]);

impl IndexHash {
    /// Hash `data` with BLAKE3-256 and wrap the digest.
    pub fn hash(data: &[u8]) -> Self {
        IndexHash(compose(BLAKE3_CODE, *blake3::hash(data).as_bytes()))
    }

    /// Decode a serialized multihash, rejecting anything that is not a
    /// well-formed BLAKE3-256 wrapper.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MultihashError> {
        check_prefix(bytes, BLAKE3_CODE)?;
        let mut out = [0u8; MULTIHASH_LEN];
        out.copy_from_slice(bytes);
        Ok(IndexHash(out))
    }

    /// Verify that this hash matches `data`.
    pub fn verify(&self, data: &[u8]) -> Result<(), MultihashError> {
        if *blake3::hash(data).as_bytes() == self.raw() {
            Ok(())
        } else {
            Err(MultihashError::Mismatch)
        }
    }

    /// Extract the raw 32-byte digest.
    pub fn raw(&self) -> Hash32 {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.0[2..]);
        out
    }

    /// The serialized multihash bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Hex-encode the serialized multihash (storage byte order).
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for IndexHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}

impl fmt::Debug for IndexHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IndexHash({})", self.hex())
    }
}

/// A dbl-sha2-256 multihash identifying Bitcoin-side content.
///
/// Layout: `0x56 0x20 <digest[32]>`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MerkleHash([u8; MULTIHASH_LEN]);

impl MerkleHash {
    /// Hash `data` with double SHA256 and wrap the digest.
    pub fn hash(data: &[u8]) -> Self {
        MerkleHash(compose(DBL_SHA2_256_CODE, double_sha256(data)))
    }

    /// Wrap an existing Bitcoin digest without re-hashing.
    ///
    /// Used whenever a txid or merkle root is already known.
    pub fn wrap(raw: Hash32) -> Self {
        MerkleHash(compose(DBL_SHA2_256_CODE, raw))
    }

    /// Decode a serialized multihash, rejecting anything that is not a
    /// well-formed dbl-sha2-256 wrapper.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MultihashError> {
        check_prefix(bytes, DBL_SHA2_256_CODE)?;
        let mut out = [0u8; MULTIHASH_LEN];
        out.copy_from_slice(bytes);
        Ok(MerkleHash(out))
    }

    /// Verify that this hash matches `data`.
    pub fn verify(&self, data: &[u8]) -> Result<(), MultihashError> {
        if double_sha256(data) == self.raw() {
            Ok(())
        } else {
            Err(MultihashError::Mismatch)
        }
    }

    /// Extract the raw 32-byte digest.
    pub fn raw(&self) -> Hash32 {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.0[2..]);
        out
    }

    /// The serialized multihash bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Hex-encode the serialized multihash (storage byte order).
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Hex-encode the raw digest in Bitcoin display order.
    pub fn display_hex(&self) -> String {
        display_hex(&self.raw())
    }
}

impl fmt::Display for MerkleHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}

impl fmt::Debug for MerkleHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MerkleHash({})", self.hex())
    }
}
