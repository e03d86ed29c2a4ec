//! Transaction fetching over the data hub HTTP surface.
//!
//! Three endpoints:
//!
//! - `GET {base}/api/v1/subtree/{hash}` — concatenated 32-byte txids in
//!   tree order.
//! - `POST {base}/api/v1/txs` — body is concatenated txids; response is the
//!   matching transactions, self-delimiting, in request order.
//! - `POST {base}/api/v1/subtree/{hash}/txs` — same shape, optimized for
//!   bulk fetches out of a single subtree.
//!
//! Hashes in URLs are rendered in Bitcoin display order.

use async_trait::async_trait;
use bitcoin::consensus::encode::deserialize_partial;
use bitcoin::Transaction;
use reqwest::StatusCode;
use teraindex_core::{display_hex, Hash32};
use thiserror::Error;
use tracing::debug;

use crate::config::FetchConfig;

/// Share of missing transactions above which the subtree-optimized bulk
/// endpoint is used instead of scattered txid fetches.
pub const BULK_THRESHOLD: f64 = 0.70;

/// Fetch errors.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Transport-level HTTP failure (connect, timeout, body read).
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status.
    #[error("unexpected http status {status} from {url}")]
    Status {
        /// Response status code.
        status: StatusCode,
        /// Request URL.
        url: String,
    },

    /// The subtree is unknown to the peer (HTTP 404).
    #[error("subtree {0} not found on peer")]
    SubtreeNotFound(String),

    /// Response body violates the wire format.
    #[error("malformed fetch response: {0}")]
    Malformed(String),

    /// The peer returned a different number of transactions than requested.
    #[error("transaction count mismatch: requested {requested}, received {received}")]
    CountMismatch {
        /// Number of txids in the request.
        requested: usize,
        /// Number of transactions in the response.
        received: usize,
    },

    /// The subtree listing was empty.
    #[error("no transaction ids found in subtree")]
    EmptySubtree,
}

/// Which fetch path to take for a subtree's missing transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    /// Subtree-optimized bulk POST; the peer can stream the whole chunk.
    Bulk,
    /// Scattered POST by txid list.
    Scatter,
}

impl FetchStrategy {
    /// Pick the strategy from the miss rate: above [`BULK_THRESHOLD`] the
    /// bulk endpoint wins, otherwise scattered fetches are cheaper for the
    /// peer.
    pub fn select(total: usize, missing: usize) -> Self {
        if total == 0 {
            return FetchStrategy::Scatter;
        }
        if missing as f64 / total as f64 > BULK_THRESHOLD {
            FetchStrategy::Bulk
        } else {
            FetchStrategy::Scatter
        }
    }
}

/// Split a response body of concatenated self-delimiting Bitcoin
/// transactions into raw per-transaction byte vectors.
pub fn split_transactions(body: &[u8]) -> Result<Vec<Vec<u8>>, FetchError> {
    let mut txs = Vec::new();
    let mut rest = body;

    while !rest.is_empty() {
        let (_, consumed) = deserialize_partial::<Transaction>(rest)
            .map_err(|e| FetchError::Malformed(format!("transaction parse: {e}")))?;
        txs.push(rest[..consumed].to_vec());
        rest = &rest[consumed..];
    }

    Ok(txs)
}

/// Source of subtree listings and transaction bodies.
///
/// The production implementation is [`HttpFetcher`]; tests substitute a
/// stub.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    /// Fetch the ordered txid listing of a subtree.
    async fn fetch_txids(
        &self,
        base_url: &str,
        subtree_root: &Hash32,
    ) -> Result<Vec<Hash32>, FetchError>;

    /// Fetch the raw bodies of `missing`, choosing bulk or scattered mode
    /// from the miss rate against `all`. Bodies come back in `missing`
    /// order.
    async fn fetch_missing(
        &self,
        base_url: &str,
        subtree_root: &Hash32,
        all: &[Hash32],
        missing: &[Hash32],
    ) -> Result<Vec<Vec<u8>>, FetchError>;
}

/// reqwest-backed [`TransactionSource`].
pub struct HttpFetcher {
    discovery: reqwest::Client,
    bulk: reqwest::Client,
}

impl HttpFetcher {
    /// Build the two HTTP clients (short timeout for discovery, long for
    /// bulk transfers).
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let discovery = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.discovery_timeout_secs))
            .build()?;
        let bulk = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.bulk_timeout_secs))
            .build()?;
        Ok(Self { discovery, bulk })
    }

    fn concat_txids(txids: &[Hash32]) -> Vec<u8> {
        let mut body = Vec::with_capacity(txids.len() * 32);
        for txid in txids {
            body.extend_from_slice(txid);
        }
        body
    }

    async fn post_txs(
        &self,
        url: String,
        txids: &[Hash32],
    ) -> Result<Vec<Vec<u8>>, FetchError> {
        let response = self
            .bulk
            .post(&url)
            .header("Content-Type", "application/octet-stream")
            .body(Self::concat_txids(txids))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                status: response.status(),
                url,
            });
        }

        let body = response.bytes().await?;
        let txs = split_transactions(&body)?;

        if txs.len() != txids.len() {
            return Err(FetchError::CountMismatch {
                requested: txids.len(),
                received: txs.len(),
            });
        }

        Ok(txs)
    }

    /// POST `{base}/api/v1/txs` — scattered fetch by txid list.
    async fn fetch_by_txid(
        &self,
        base_url: &str,
        txids: &[Hash32],
    ) -> Result<Vec<Vec<u8>>, FetchError> {
        self.post_txs(format!("{base_url}/api/v1/txs"), txids).await
    }

    /// POST `{base}/api/v1/subtree/{hash}/txs` — subtree-optimized bulk
    /// fetch.
    async fn fetch_subtree_txs(
        &self,
        base_url: &str,
        subtree_root: &Hash32,
        txids: &[Hash32],
    ) -> Result<Vec<Vec<u8>>, FetchError> {
        let url = format!(
            "{base_url}/api/v1/subtree/{}/txs",
            display_hex(subtree_root)
        );
        self.post_txs(url, txids).await
    }
}

#[async_trait]
impl TransactionSource for HttpFetcher {
    async fn fetch_txids(
        &self,
        base_url: &str,
        subtree_root: &Hash32,
    ) -> Result<Vec<Hash32>, FetchError> {
        let url = format!("{base_url}/api/v1/subtree/{}", display_hex(subtree_root));
        let response = self.discovery.get(&url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(FetchError::SubtreeNotFound(display_hex(subtree_root)));
        }
        if !response.status().is_success() {
            return Err(FetchError::Status {
                status: response.status(),
                url,
            });
        }

        let body = response.bytes().await?;
        if body.len() % 32 != 0 {
            return Err(FetchError::Malformed(format!(
                "txid listing of {} bytes is not a multiple of 32",
                body.len()
            )));
        }

        let txids: Vec<Hash32> = body
            .chunks_exact(32)
            .map(|chunk| {
                let mut txid = [0u8; 32];
                txid.copy_from_slice(chunk);
                txid
            })
            .collect();

        if txids.is_empty() {
            return Err(FetchError::EmptySubtree);
        }

        Ok(txids)
    }

    async fn fetch_missing(
        &self,
        base_url: &str,
        subtree_root: &Hash32,
        all: &[Hash32],
        missing: &[Hash32],
    ) -> Result<Vec<Vec<u8>>, FetchError> {
        if missing.is_empty() {
            return Ok(Vec::new());
        }

        let strategy = FetchStrategy::select(all.len(), missing.len());
        debug!(
            total = all.len(),
            missing = missing.len(),
            ?strategy,
            "fetching missing transactions"
        );

        match strategy {
            FetchStrategy::Bulk => self.fetch_subtree_txs(base_url, subtree_root, missing).await,
            FetchStrategy::Scatter => self.fetch_by_txid(base_url, missing).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_switches_at_seventy_percent() {
        // 8 of 10 missing: 80% > 70% -> bulk
        assert_eq!(FetchStrategy::select(10, 8), FetchStrategy::Bulk);
        // 2 of 10 missing: scatter
        assert_eq!(FetchStrategy::select(10, 2), FetchStrategy::Scatter);
        // exactly 70% is not above the threshold
        assert_eq!(FetchStrategy::select(10, 7), FetchStrategy::Scatter);
        assert_eq!(FetchStrategy::select(10, 10), FetchStrategy::Bulk);
        assert_eq!(FetchStrategy::select(0, 0), FetchStrategy::Scatter);
    }

    /// Minimal legacy transaction: one empty-script input, one empty-script
    /// output.
    fn minimal_tx() -> Vec<u8> {
        let mut tx = Vec::new();
        tx.extend_from_slice(&1u32.to_le_bytes()); // version
        tx.push(1); // input count
        tx.extend_from_slice(&[0x11; 32]); // prev txid
        tx.extend_from_slice(&0u32.to_le_bytes()); // prev vout
        tx.push(0); // script_sig length
        tx.extend_from_slice(&0xffffffffu32.to_le_bytes()); // sequence
        tx.push(1); // output count
        tx.extend_from_slice(&5000u64.to_le_bytes()); // value
        tx.push(0); // script_pubkey length
        tx.extend_from_slice(&0u32.to_le_bytes()); // locktime
        tx
    }

    #[test]
    fn test_split_transactions() {
        let tx = minimal_tx();
        let mut body = tx.clone();
        body.extend_from_slice(&tx);

        let txs = split_transactions(&body).unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0], tx);
        assert_eq!(txs[1], tx);
    }

    #[test]
    fn test_split_transactions_empty_body() {
        assert!(split_transactions(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_split_transactions_rejects_garbage() {
        let mut body = minimal_tx();
        body.extend_from_slice(&[0xde, 0xad]); // trailing partial bytes
        assert!(matches!(
            split_transactions(&body),
            Err(FetchError::Malformed(_))
        ));
    }
}
