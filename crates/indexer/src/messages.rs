//! Overlay announcement formats and the Bitcoin block header.
//!
//! The overlay publishes JSON messages on three topics named
//! `teranode/bitcoin/1.0.0/<network>-<type>`. The transport that delivers
//! them is external; announcements reach the pipeline through the
//! [`OverlayChannels`] seam.

use serde::{Deserialize, Serialize};
use teraindex_core::{from_display_hex, Hash32};
use thiserror::Error;
use tokio::sync::mpsc;

/// Protocol prefix shared by all overlay topics.
pub const TOPIC_PROTOCOL: &str = "teranode/bitcoin/1.0.0";

/// Default capacity of the overlay channels.
pub const CHANNEL_CAPACITY: usize = 100;

/// The three overlay topic kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    /// Finalized block announcements.
    Block,
    /// Subtree availability announcements.
    Subtree,
    /// Peer status beacons (ignored by the pipeline).
    NodeStatus,
}

impl TopicKind {
    fn as_str(&self) -> &'static str {
        match self {
            TopicKind::Block => "block",
            TopicKind::Subtree => "subtree",
            TopicKind::NodeStatus => "node_status",
        }
    }
}

/// Compose the full topic name for a network and message kind.
pub fn topic(network: &str, kind: TopicKind) -> String {
    format!("{TOPIC_PROTOCOL}/{network}-{}", kind.as_str())
}

/// Announcement parsing errors.
#[derive(Error, Debug)]
pub enum MessageError {
    /// Block header is not exactly 80 bytes.
    #[error("invalid block header length: got {0}, expected 80")]
    BadHeaderLength(usize),

    /// A hex field failed to decode.
    #[error("invalid hex in field {field}: {source}")]
    BadHex {
        /// Which announcement field was malformed.
        field: &'static str,
        /// Underlying decode failure.
        source: hex::FromHexError,
    },

    /// The announcement carries no hash.
    #[error("announcement hash is empty")]
    EmptyHash,

    /// The announcement carries no fetch URL.
    #[error("announcement data hub URL is empty")]
    EmptyUrl,
}

/// A block announcement as received from the overlay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockAnnouncement {
    /// Announcing peer.
    #[serde(rename = "PeerID")]
    pub peer_id: String,
    /// Peer software name.
    #[serde(rename = "ClientName", default)]
    pub client_name: String,
    /// Base URL for fetching block data.
    #[serde(rename = "DataHubURL")]
    pub data_hub_url: String,
    /// Block hash, display-order hex.
    #[serde(rename = "Hash")]
    pub hash: String,
    /// Block height.
    #[serde(rename = "Height")]
    pub height: u32,
    /// 80-byte block header, hex.
    #[serde(rename = "Header")]
    pub header: String,
    /// Coinbase transaction, hex.
    #[serde(rename = "Coinbase", default)]
    pub coinbase: String,
    /// Merkle roots of the block's subtrees, display-order hex, in order.
    #[serde(rename = "SubtreeHashes", default)]
    pub subtree_hashes: Vec<String>,
}

/// A subtree announcement as received from the overlay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtreeAnnouncement {
    /// Announcing peer.
    #[serde(rename = "PeerID")]
    pub peer_id: String,
    /// Peer software name.
    #[serde(rename = "ClientName", default)]
    pub client_name: String,
    /// Base URL for fetching the subtree's transactions.
    #[serde(rename = "DataHubURL")]
    pub data_hub_url: String,
    /// Subtree merkle root, display-order hex.
    #[serde(rename = "Hash")]
    pub hash: String,
}

/// Parsed fields of an 80-byte Bitcoin block header.
///
/// All integers are little-endian on the wire; hashes keep wire byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block version.
    pub version: i32,
    /// Previous block hash.
    pub prev_hash: Hash32,
    /// Merkle root over the block's transactions.
    pub merkle_root: Hash32,
    /// Block timestamp (unix seconds).
    pub timestamp: u32,
    /// Difficulty target in compact form.
    pub bits: u32,
    /// Proof-of-work nonce.
    pub nonce: u32,
}

/// Parse an 80-byte block header.
pub fn parse_block_header(header: &[u8]) -> Result<BlockHeader, MessageError> {
    if header.len() != 80 {
        return Err(MessageError::BadHeaderLength(header.len()));
    }

    let mut prev_hash = [0u8; 32];
    prev_hash.copy_from_slice(&header[4..36]);
    let mut merkle_root = [0u8; 32];
    merkle_root.copy_from_slice(&header[36..68]);

    Ok(BlockHeader {
        version: i32::from_le_bytes([header[0], header[1], header[2], header[3]]),
        prev_hash,
        merkle_root,
        timestamp: u32::from_le_bytes([header[68], header[69], header[70], header[71]]),
        bits: u32::from_le_bytes([header[72], header[73], header[74], header[75]]),
        nonce: u32::from_le_bytes([header[76], header[77], header[78], header[79]]),
    })
}

/// A fully parsed block announcement, ready for the assembler.
#[derive(Debug, Clone)]
pub struct BlockMessage {
    /// Block height.
    pub height: u64,
    /// Announced block hash (wire order).
    pub hash: Hash32,
    /// The raw 80-byte header.
    pub header_bytes: [u8; 80],
    /// Parsed header fields.
    pub header: BlockHeader,
    /// Raw coinbase transaction bytes (may be empty).
    pub coinbase: Vec<u8>,
    /// Ordered subtree merkle roots (wire order).
    pub subtree_roots: Vec<Hash32>,
}

impl BlockAnnouncement {
    /// Decode the hex fields into a [`BlockMessage`].
    pub fn parse(&self) -> Result<BlockMessage, MessageError> {
        if self.hash.is_empty() {
            return Err(MessageError::EmptyHash);
        }

        let hash = from_display_hex(&self.hash).map_err(|source| MessageError::BadHex {
            field: "Hash",
            source,
        })?;

        let header_raw = hex::decode(&self.header).map_err(|source| MessageError::BadHex {
            field: "Header",
            source,
        })?;
        if header_raw.len() != 80 {
            return Err(MessageError::BadHeaderLength(header_raw.len()));
        }
        let mut header_bytes = [0u8; 80];
        header_bytes.copy_from_slice(&header_raw);
        let header = parse_block_header(&header_bytes)?;

        let coinbase = if self.coinbase.is_empty() {
            Vec::new()
        } else {
            hex::decode(&self.coinbase).map_err(|source| MessageError::BadHex {
                field: "Coinbase",
                source,
            })?
        };

        let mut subtree_roots = Vec::with_capacity(self.subtree_hashes.len());
        for sh in &self.subtree_hashes {
            subtree_roots.push(from_display_hex(sh).map_err(|source| MessageError::BadHex {
                field: "SubtreeHashes",
                source,
            })?);
        }

        Ok(BlockMessage {
            height: self.height as u64,
            hash,
            header_bytes,
            header,
            coinbase,
            subtree_roots,
        })
    }
}

/// A fully parsed subtree announcement, ready for the processor.
#[derive(Debug, Clone)]
pub struct SubtreeMessage {
    /// Subtree merkle root (wire order).
    pub merkle_root: Hash32,
    /// Base URL for the fetch endpoints.
    pub base_url: String,
    /// Announcing peer.
    pub peer_id: String,
}

impl SubtreeAnnouncement {
    /// Decode the hex fields into a [`SubtreeMessage`].
    pub fn parse(&self) -> Result<SubtreeMessage, MessageError> {
        if self.hash.is_empty() {
            return Err(MessageError::EmptyHash);
        }
        if self.data_hub_url.is_empty() {
            return Err(MessageError::EmptyUrl);
        }

        let merkle_root = from_display_hex(&self.hash).map_err(|source| MessageError::BadHex {
            field: "Hash",
            source,
        })?;

        Ok(SubtreeMessage {
            merkle_root,
            base_url: self.data_hub_url.trim_end_matches('/').to_string(),
            peer_id: self.peer_id.clone(),
        })
    }
}

/// Receiving ends of the overlay subscription, consumed by the event loop.
pub struct OverlayChannels {
    /// Block announcements.
    pub blocks: mpsc::Receiver<BlockAnnouncement>,
    /// Subtree announcements.
    pub subtrees: mpsc::Receiver<SubtreeAnnouncement>,
    /// Node status beacons (drained and ignored).
    pub status: mpsc::Receiver<serde_json::Value>,
}

/// Sending ends of the overlay subscription, held by the transport.
#[derive(Clone)]
pub struct OverlaySenders {
    /// Block announcements.
    pub blocks: mpsc::Sender<BlockAnnouncement>,
    /// Subtree announcements.
    pub subtrees: mpsc::Sender<SubtreeAnnouncement>,
    /// Node status beacons.
    pub status: mpsc::Sender<serde_json::Value>,
}

/// Create the overlay channel pair.
pub fn overlay_channels(capacity: usize) -> (OverlaySenders, OverlayChannels) {
    let (blocks_tx, blocks_rx) = mpsc::channel(capacity);
    let (subtrees_tx, subtrees_rx) = mpsc::channel(capacity);
    let (status_tx, status_rx) = mpsc::channel(capacity);

    (
        OverlaySenders {
            blocks: blocks_tx,
            subtrees: subtrees_tx,
            status: status_tx,
        },
        OverlayChannels {
            blocks: blocks_rx,
            subtrees: subtrees_rx,
            status: status_rx,
        },
    )
}
