//! End-to-end pipeline tests: subtree processing through block commit,
//! driven by a stubbed transaction source against in-memory and tempfile
//! stores.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::NamedTempFile;

use teraindex_core::{display_hex, double_sha256, Hash32, MerkleHash};
use teraindex_index::TreeBuilder;
use teraindex_indexer::assembler::{BlockAssembler, BlockOutcome};
use teraindex_indexer::chain::HeaderChain;
use teraindex_indexer::extract::{TermExtractor, TransactionContext};
use teraindex_indexer::fetcher::{FetchError, TransactionSource};
use teraindex_indexer::messages::{BlockAnnouncement, SubtreeMessage};
use teraindex_indexer::processor::{SubtreeBuildResult, SubtreeProcessor};
use teraindex_indexer::storage::{BlockStatus, MetadataStore};
use teraindex_merkle::{compute_root, MerkleBuilder};
use teraindex_store::{ContentStore, IndexTerm, MemoryStore, TermCache};

/// In-test transaction source: serves subtree listings and bodies from
/// maps, counting fetch calls.
#[derive(Default)]
struct StubSource {
    subtrees: HashMap<Hash32, Vec<Hash32>>,
    bodies: HashMap<Hash32, Vec<u8>>,
    fetch_calls: AtomicUsize,
}

impl StubSource {
    fn add_subtree(&mut self, txs: &[Vec<u8>]) -> Hash32 {
        let txids: Vec<Hash32> = txs.iter().map(|raw| double_sha256(raw)).collect();
        let root = compute_root(&txids).unwrap();
        for (txid, raw) in txids.iter().zip(txs) {
            self.bodies.insert(*txid, raw.clone());
        }
        self.subtrees.insert(root, txids);
        root
    }
}

#[async_trait]
impl TransactionSource for StubSource {
    async fn fetch_txids(
        &self,
        _base_url: &str,
        subtree_root: &Hash32,
    ) -> Result<Vec<Hash32>, FetchError> {
        self.subtrees
            .get(subtree_root)
            .cloned()
            .ok_or_else(|| FetchError::SubtreeNotFound(display_hex(subtree_root)))
    }

    async fn fetch_missing(
        &self,
        _base_url: &str,
        _subtree_root: &Hash32,
        _all: &[Hash32],
        missing: &[Hash32],
    ) -> Result<Vec<Vec<u8>>, FetchError> {
        self.fetch_calls.fetch_add(missing.len(), Ordering::SeqCst);
        missing
            .iter()
            .map(|txid| {
                self.bodies
                    .get(txid)
                    .cloned()
                    .ok_or_else(|| FetchError::Malformed(format!("no body for {txid:02x?}")))
            })
            .collect()
    }
}

/// Source that serves a wrong body for every transaction.
struct CorruptSource {
    inner: StubSource,
}

#[async_trait]
impl TransactionSource for CorruptSource {
    async fn fetch_txids(
        &self,
        base_url: &str,
        subtree_root: &Hash32,
    ) -> Result<Vec<Hash32>, FetchError> {
        self.inner.fetch_txids(base_url, subtree_root).await
    }

    async fn fetch_missing(
        &self,
        _base_url: &str,
        _subtree_root: &Hash32,
        _all: &[Hash32],
        missing: &[Hash32],
    ) -> Result<Vec<Vec<u8>>, FetchError> {
        Ok(missing.iter().map(|_| b"tampered".to_vec()).collect())
    }
}

/// Extractor with a fixed txid -> terms table.
struct TableExtractor {
    table: HashMap<Hash32, Vec<IndexTerm>>,
}

impl TermExtractor for TableExtractor {
    fn extract(&self, tx: &TransactionContext) -> anyhow::Result<Vec<IndexTerm>> {
        Ok(self.table.get(&tx.txid).cloned().unwrap_or_default())
    }

    fn name(&self) -> &str {
        "table"
    }
}

fn subtree_msg(root: Hash32) -> SubtreeMessage {
    SubtreeMessage {
        merkle_root: root,
        base_url: "http://hub.test".to_string(),
        peer_id: "peer-test".to_string(),
    }
}

fn block_announcement(height: u32, subtree_roots: &[Hash32]) -> BlockAnnouncement {
    let merkle_root = compute_root(subtree_roots).unwrap();

    let mut header = [0u8; 80];
    header[0..4].copy_from_slice(&1i32.to_le_bytes());
    header[36..68].copy_from_slice(&merkle_root);
    header[68..72].copy_from_slice(&1_700_000_000u32.to_le_bytes());
    let block_hash = double_sha256(&header);

    BlockAnnouncement {
        peer_id: "peer-test".into(),
        client_name: "stub".into(),
        data_hub_url: "http://hub.test".into(),
        hash: display_hex(&block_hash),
        height,
        header: hex::encode(header),
        coinbase: hex::encode(b"coinbase-bytes"),
        subtree_hashes: subtree_roots.iter().map(display_hex).collect(),
    }
}

struct Pipeline {
    store: Arc<MemoryStore>,
    processor: SubtreeProcessor,
    assembler: BlockAssembler,
    metadata: MetadataStore,
    chain: Arc<HeaderChain>,
    _db_file: NamedTempFile,
}

async fn pipeline(
    source: Arc<dyn TransactionSource>,
    extractor: Arc<dyn TermExtractor>,
) -> Pipeline {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(TermCache::new(1000));

    let db_file = NamedTempFile::new().unwrap();
    let metadata = MetadataStore::new_with_path(db_file.path()).await.unwrap();
    metadata.run_migrations().await.unwrap();

    let chain = Arc::new(HeaderChain::new());
    let processor = SubtreeProcessor::new(store.clone(), source, extractor, cache);
    let assembler = BlockAssembler::new(store.clone(), metadata.clone(), chain.clone(), 100);

    Pipeline {
        store,
        processor,
        assembler,
        metadata,
        chain,
        _db_file: db_file,
    }
}

fn tx_bytes(n: usize) -> Vec<Vec<u8>> {
    (0..n).map(|i| format!("raw-tx-{i}").into_bytes()).collect()
}

#[tokio::test]
async fn test_subtree_then_block_commit() {
    let mut source = StubSource::default();
    let txs_a = tx_bytes(4);
    let txs_b: Vec<Vec<u8>> = (10..13).map(|i| format!("raw-tx-{i}").into_bytes()).collect();
    let root_a = source.add_subtree(&txs_a);
    let root_b = source.add_subtree(&txs_b);

    // Index the first transaction of subtree A under protocol=bap.
    let indexed_txid = double_sha256(&txs_a[0]);
    let mut table = HashMap::new();
    table.insert(
        indexed_txid,
        vec![IndexTerm::new(&b"protocol"[..], &b"bap"[..])],
    );

    let p = pipeline(
        Arc::new(source),
        Arc::new(TableExtractor { table }),
    )
    .await;

    // Process both subtrees.
    let result_a = p.processor.process_subtree(&subtree_msg(root_a)).await.unwrap();
    let result_b = p.processor.process_subtree(&subtree_msg(root_b)).await.unwrap();

    assert_eq!(result_a.tx_count, 4);
    assert_eq!(result_a.tx_tree_root.raw(), root_a);
    assert_eq!(result_b.tx_count, 3);

    // Every transaction body is stored under its wrapped txid.
    for raw in txs_a.iter().chain(&txs_b) {
        let key = MerkleHash::wrap(double_sha256(raw));
        assert_eq!(
            p.store.get(key.as_bytes()).await.unwrap(),
            Some(raw.clone())
        );
    }

    // The search index resolves the indexed term.
    let tree_builder = TreeBuilder::new(p.store.clone());
    let found = tree_builder
        .find_txids(result_a.index_root, b"protocol", b"bap")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found, vec![indexed_txid]);

    // Commit the block.
    let mut pending = HashMap::new();
    pending.insert(root_a, result_a.clone());
    pending.insert(root_b, result_b.clone());

    let announcement = block_announcement(800_000, &[root_a, root_b]);
    let msg = announcement.parse().unwrap();
    let outcome = p.assembler.handle_block(&msg, &mut pending).await.unwrap();

    assert_eq!(outcome, BlockOutcome::Committed { tx_count: 7 });
    assert!(pending.is_empty());
    assert_eq!(p.chain.height(), 800_000);

    // Metadata rows are visible and ordered.
    let block = p
        .metadata
        .get_block_by_height(800_000)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(block.status, BlockStatus::Main);
    assert_eq!(block.tx_count, 7);
    assert_eq!(block.merkle_root, msg.header.merkle_root);

    let subtrees = p.metadata.get_subtrees(&block.merkle_root).await.unwrap();
    assert_eq!(subtrees.len(), 2);
    assert_eq!(subtrees[0].subtree_index, 0);
    assert_eq!(subtrees[0].subtree_merkle_root, root_a);
    assert_eq!(subtrees[1].subtree_merkle_root, root_b);

    // The header and the block→subtree node are content-addressed.
    assert!(p
        .store
        .get(MerkleHash::wrap(msg.hash).as_bytes())
        .await
        .unwrap()
        .is_some());
    assert!(p
        .store
        .get(MerkleHash::wrap(block.merkle_root).as_bytes())
        .await
        .unwrap()
        .is_some());

    // Full inclusion proof: txid -> subtree root -> block merkle root.
    let merkle = MerkleBuilder::new(p.store.clone());
    for pos in 0..4u32 {
        let tx_proof = merkle
            .build_merkle_proof(result_a.tx_tree_root, pos, 4)
            .await
            .unwrap();
        assert_eq!(tx_proof.txid, result_a.txids[pos as usize]);
        assert!(tx_proof.verify(&root_a));
    }
    let block_proof = merkle.build_block_proof(&[root_a, root_b], 0).unwrap();
    assert!(block_proof.verify(&msg.header.merkle_root));
}

#[tokio::test]
async fn test_reprocessing_is_idempotent() {
    let mut source = StubSource::default();
    let txs = tx_bytes(3);
    let root = source.add_subtree(&txs);
    let source = Arc::new(source);

    let mut table = HashMap::new();
    table.insert(
        double_sha256(&txs[0]),
        vec![IndexTerm::new(&b"k"[..], &b"v"[..])],
    );

    let p = pipeline(source.clone(), Arc::new(TableExtractor { table })).await;

    let first = p.processor.process_subtree(&subtree_msg(root)).await.unwrap();
    let objects_after_first = p.store.len();
    let fetches_after_first = source.fetch_calls.load(Ordering::SeqCst);

    let second = p.processor.process_subtree(&subtree_msg(root)).await.unwrap();

    // Identical results, no new objects, no refetch of stored bodies.
    assert_eq!(first.index_root, second.index_root);
    assert_eq!(first.tx_tree_root, second.tx_tree_root);
    assert_eq!(p.store.len(), objects_after_first);
    assert_eq!(source.fetch_calls.load(Ordering::SeqCst), fetches_after_first);

    // Re-committing the same block leaves one set of rows.
    let announcement = block_announcement(1, &[root]);
    let msg = announcement.parse().unwrap();

    let mut pending = HashMap::new();
    pending.insert(root, first.clone());
    p.assembler.handle_block(&msg, &mut pending).await.unwrap();

    let mut pending = HashMap::new();
    pending.insert(root, second);
    p.assembler.handle_block(&msg, &mut pending).await.unwrap();

    let subtrees = p.metadata.get_subtrees(&msg.header.merkle_root).await.unwrap();
    assert_eq!(subtrees.len(), 1);
}

#[tokio::test]
async fn test_block_deferred_until_subtrees_arrive() {
    let mut source = StubSource::default();
    let txs = tx_bytes(2);
    let root = source.add_subtree(&txs);

    let p = pipeline(
        Arc::new(source),
        Arc::new(teraindex_indexer::extract::NoopExtractor),
    )
    .await;

    let announcement = block_announcement(5, &[root]);
    let msg = announcement.parse().unwrap();

    // No subtree processed yet: the block defers and nothing is committed.
    let mut pending = HashMap::new();
    let outcome = p.assembler.handle_block(&msg, &mut pending).await.unwrap();
    assert_eq!(
        outcome,
        BlockOutcome::Deferred {
            missing: vec![root]
        }
    );
    assert!(p.metadata.get_block_by_height(5).await.unwrap().is_none());

    // After processing, the re-announced block commits.
    let result = p.processor.process_subtree(&subtree_msg(root)).await.unwrap();
    pending.insert(root, result);
    let outcome = p.assembler.handle_block(&msg, &mut pending).await.unwrap();
    assert!(matches!(outcome, BlockOutcome::Committed { .. }));
}

#[tokio::test]
async fn test_reorg_replaces_main_block() {
    let mut source = StubSource::default();
    let txs_a = tx_bytes(2);
    let txs_b: Vec<Vec<u8>> = (20..22).map(|i| format!("raw-tx-{i}").into_bytes()).collect();
    let root_a = source.add_subtree(&txs_a);
    let root_b = source.add_subtree(&txs_b);

    let p = pipeline(
        Arc::new(source),
        Arc::new(teraindex_indexer::extract::NoopExtractor),
    )
    .await;

    let result_a = p.processor.process_subtree(&subtree_msg(root_a)).await.unwrap();
    let result_b = p.processor.process_subtree(&subtree_msg(root_b)).await.unwrap();

    // First block at height 100.
    let msg_a = block_announcement(100, &[root_a]).parse().unwrap();
    let mut pending = HashMap::new();
    pending.insert(root_a, result_a);
    p.assembler.handle_block(&msg_a, &mut pending).await.unwrap();

    // Competing block at the same height.
    let msg_b = block_announcement(100, &[root_b]).parse().unwrap();
    let mut pending = HashMap::new();
    pending.insert(root_b, result_b);
    p.assembler.handle_block(&msg_b, &mut pending).await.unwrap();

    // The new block is main; the old one is an orphan but still reachable.
    let main = p.metadata.get_block_by_height(100).await.unwrap().unwrap();
    assert_eq!(main.merkle_root, msg_b.header.merkle_root);

    let orphan = p
        .metadata
        .get_block_by_hash(&msg_a.hash)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(orphan.status, BlockStatus::Orphan);
    assert_eq!(
        p.metadata
            .get_subtrees(&msg_a.header.merkle_root)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_corrupt_transaction_fails_subtree() {
    let mut inner = StubSource::default();
    let txs = tx_bytes(2);
    let root = inner.add_subtree(&txs);

    let p = pipeline(
        Arc::new(CorruptSource { inner }),
        Arc::new(teraindex_indexer::extract::NoopExtractor),
    )
    .await;

    let err = p
        .processor
        .process_subtree(&subtree_msg(root))
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("hashes to"));

    // Nothing was persisted for the failed subtree.
    for raw in &txs {
        let key = MerkleHash::wrap(double_sha256(raw));
        assert_eq!(p.store.get(key.as_bytes()).await.unwrap(), None);
    }
}

#[tokio::test]
async fn test_block_with_wrong_merkle_root_fails() {
    let mut source = StubSource::default();
    let txs = tx_bytes(2);
    let root = source.add_subtree(&txs);
    let other_root = double_sha256(b"someone-elses-subtree");

    let p = pipeline(
        Arc::new(source),
        Arc::new(teraindex_indexer::extract::NoopExtractor),
    )
    .await;

    let result = p.processor.process_subtree(&subtree_msg(root)).await.unwrap();

    // Header commits to a different subtree set than the one announced.
    let mut announcement = block_announcement(7, &[other_root]);
    announcement.subtree_hashes = vec![display_hex(&root)];
    let msg = announcement.parse().unwrap();

    let mut pending = HashMap::new();
    pending.insert(root, result);

    let err = p.assembler.handle_block(&msg, &mut pending).await.unwrap_err();
    assert!(format!("{err:#}").contains("fold"));

    // The failed block never reached metadata, and the pending entry
    // survives for the next announcement.
    assert!(p.metadata.get_block_by_height(7).await.unwrap().is_none());
    assert!(pending.contains_key(&root));
}
