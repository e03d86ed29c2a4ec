//! Header-chain tip tracking.
//!
//! Process-wide tip state: constructed empty at startup, mutated only by
//! the block assembler, read by diagnostics under a read lock.

use std::collections::HashMap;

use parking_lot::RwLock;
use teraindex_core::Hash32;

use crate::messages::BlockHeader;

/// A committed header at a height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainEntry {
    /// Block height.
    pub height: u64,
    /// Block hash (wire order).
    pub hash: Hash32,
    /// Parsed header fields.
    pub header: BlockHeader,
}

#[derive(Default)]
struct Inner {
    headers: HashMap<u64, ChainEntry>,
    tip: Option<u64>,
}

/// Tracks committed headers and the current chain tip.
#[derive(Default)]
pub struct HeaderChain {
    inner: RwLock<Inner>,
}

impl HeaderChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a header; becomes the tip if it is the highest seen.
    pub fn add(&self, entry: ChainEntry) {
        let mut inner = self.inner.write();
        let height = entry.height;
        inner.headers.insert(height, entry);
        if inner.tip.map_or(true, |t| height > t) {
            inner.tip = Some(height);
        }
    }

    /// Header at a height, if recorded.
    pub fn get(&self, height: u64) -> Option<ChainEntry> {
        self.inner.read().headers.get(&height).copied()
    }

    /// The current tip entry.
    pub fn tip(&self) -> Option<ChainEntry> {
        let inner = self.inner.read();
        inner.tip.and_then(|h| inner.headers.get(&h).copied())
    }

    /// Current tip height, 0 when empty.
    pub fn height(&self) -> u64 {
        self.inner.read().tip.unwrap_or(0)
    }

    /// Drop all headers above `height` after a reorg; the tip falls back to
    /// `height`.
    pub fn reorg(&self, height: u64) {
        let mut inner = self.inner.write();
        inner.headers.retain(|h, _| *h <= height);
        if inner.tip.map_or(false, |t| t > height) {
            inner.tip = if inner.headers.contains_key(&height) {
                Some(height)
            } else {
                inner.headers.keys().max().copied()
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(height: u64, seed: u8) -> ChainEntry {
        ChainEntry {
            height,
            hash: [seed; 32],
            header: BlockHeader {
                version: 1,
                prev_hash: [0; 32],
                merkle_root: [seed; 32],
                timestamp: 0,
                bits: 0,
                nonce: 0,
            },
        }
    }

    #[test]
    fn test_tip_follows_highest() {
        let chain = HeaderChain::new();
        assert_eq!(chain.height(), 0);
        assert!(chain.tip().is_none());

        chain.add(entry(10, 1));
        chain.add(entry(12, 2));
        chain.add(entry(11, 3));

        assert_eq!(chain.height(), 12);
        assert_eq!(chain.tip().unwrap().hash, [2; 32]);
        assert_eq!(chain.get(11).unwrap().hash, [3; 32]);
    }

    #[test]
    fn test_reorg_drops_headers_above() {
        let chain = HeaderChain::new();
        chain.add(entry(10, 1));
        chain.add(entry(11, 2));
        chain.add(entry(12, 3));

        chain.reorg(10);

        assert_eq!(chain.height(), 10);
        assert!(chain.get(11).is_none());
        assert!(chain.get(12).is_none());
        assert_eq!(chain.tip().unwrap().hash, [1; 32]);
    }

    #[test]
    fn test_replacement_at_same_height() {
        let chain = HeaderChain::new();
        chain.add(entry(10, 1));
        chain.add(entry(10, 9));
        assert_eq!(chain.tip().unwrap().hash, [9; 32]);
    }
}
