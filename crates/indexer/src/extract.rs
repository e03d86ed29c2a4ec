//! Term extractor plugin interface.
//!
//! Extractors turn a raw transaction into `(key, value)` index terms; the
//! concrete extraction logic (addresses, OP_RETURN protocols, ...) plugs in
//! behind [`TermExtractor`]. A failing extractor inside a composite never
//! aborts the pipeline: it is logged and skipped.

use teraindex_core::Hash32;
use teraindex_store::IndexTerm;
use tracing::warn;

/// Transaction data and placement handed to extractors.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    /// Transaction ID (wire order).
    pub txid: Hash32,
    /// Raw transaction bytes.
    pub raw_tx: Vec<u8>,
    /// Confirming block height, if known at extraction time.
    pub block_height: Option<u64>,
    /// Merkle root of the containing subtree, if known.
    pub subtree_root: Option<Hash32>,
    /// Index of the subtree within its block, if known.
    pub subtree_index: Option<u32>,
}

/// Extracts index terms from a transaction.
pub trait TermExtractor: Send + Sync {
    /// Extract `(key, value)` terms. Multiple terms per transaction are
    /// expected; an empty result means the transaction is not indexed.
    fn extract(&self, tx: &TransactionContext) -> anyhow::Result<Vec<IndexTerm>>;

    /// Human-readable extractor name, used in logs.
    fn name(&self) -> &str;
}

/// Runs several extractors and concatenates their terms.
///
/// A child returning an error contributes nothing; the others still run.
#[derive(Default)]
pub struct MultiExtractor {
    extractors: Vec<Box<dyn TermExtractor>>,
}

impl MultiExtractor {
    /// Create an empty composite.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a child extractor.
    pub fn push(&mut self, extractor: Box<dyn TermExtractor>) {
        self.extractors.push(extractor);
    }
}

impl TermExtractor for MultiExtractor {
    fn extract(&self, tx: &TransactionContext) -> anyhow::Result<Vec<IndexTerm>> {
        let mut all = Vec::new();

        for extractor in &self.extractors {
            match extractor.extract(tx) {
                Ok(terms) => all.extend(terms),
                Err(e) => {
                    warn!(
                        extractor = extractor.name(),
                        txid = %teraindex_core::display_hex(&tx.txid),
                        error = %format!("{e:#}"),
                        "extractor failed, skipping"
                    );
                }
            }
        }

        Ok(all)
    }

    fn name(&self) -> &str {
        "multi"
    }
}

/// Extractor that indexes nothing.
pub struct NoopExtractor;

impl TermExtractor for NoopExtractor {
    fn extract(&self, _tx: &TransactionContext) -> anyhow::Result<Vec<IndexTerm>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "noop"
    }
}
