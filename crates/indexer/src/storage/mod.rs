//! Relational metadata store for blocks and subtrees.
//!
//! SQLite via sqlx. Two tables: `blocks` (PK merkle_root, unique
//! block_hash) and `subtrees` (PK `(merkle_root, subtree_index)`, cascading
//! FK to blocks). All writes are transactional; a block and its subtree
//! rows become visible atomically or not at all.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use teraindex_core::{Hash32, IndexHash, MerkleHash};
use tracing::info;

pub mod types;

pub use types::{BlockMeta, BlockStatus, StorageStats, SubtreeMeta};

/// Metadata store over a SQLite connection pool.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

fn hash32_from_column(bytes: &[u8], column: &str) -> Result<Hash32> {
    let mut out = [0u8; 32];
    if bytes.len() != 32 {
        anyhow::bail!("column {column} holds {} bytes, expected 32", bytes.len());
    }
    out.copy_from_slice(bytes);
    Ok(out)
}

fn row_to_block(row: &SqliteRow) -> Result<BlockMeta> {
    let block_hash: Vec<u8> = row.get("block_hash");
    let merkle_root: Vec<u8> = row.get("merkle_root");
    let status: String = row.get("status");
    let timestamp: Option<i64> = row.get("timestamp");

    Ok(BlockMeta {
        height: row.get::<i64, _>("height") as u64,
        block_hash: hash32_from_column(&block_hash, "block_hash")?,
        merkle_root: hash32_from_column(&merkle_root, "merkle_root")?,
        tx_count: row.get::<i64, _>("tx_count") as u32,
        status: BlockStatus::parse(&status)?,
        timestamp: timestamp.unwrap_or(0),
    })
}

fn row_to_subtree(row: &SqliteRow) -> Result<SubtreeMeta> {
    let merkle_root: Vec<u8> = row.get("merkle_root");
    let subtree_merkle_root: Vec<u8> = row.get("subtree_merkle_root");
    let index_root: Vec<u8> = row.get("index_root");
    let tx_tree_root: Vec<u8> = row.get("tx_tree_root");

    Ok(SubtreeMeta {
        merkle_root: hash32_from_column(&merkle_root, "merkle_root")?,
        subtree_index: row.get::<i64, _>("subtree_index") as u32,
        subtree_merkle_root: hash32_from_column(&subtree_merkle_root, "subtree_merkle_root")?,
        tx_count: row.get::<i64, _>("tx_count") as u32,
        index_root: IndexHash::from_bytes(&index_root).context("column index_root")?,
        tx_tree_root: MerkleHash::from_bytes(&tx_tree_root).context("column tx_tree_root")?,
    })
}

impl MetadataStore {
    /// Connect to `database_url` (e.g. `sqlite://teraindex.db`), creating
    /// the file if needed. Foreign keys are enabled on every connection:
    /// orphan cleanup relies on cascade.
    pub async fn new(
        database_url: &str,
        max_connections: Option<u32>,
        min_connections: Option<u32>,
    ) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.unwrap_or(5))
            .min_connections(min_connections.unwrap_or(1))
            .connect_with(options)
            .await
            .context("Failed to connect to metadata database")?;

        info!(url = database_url, "metadata store connected");

        Ok(Self { pool })
    }

    /// Connect using a filesystem path.
    pub async fn new_with_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let database_url = format!("sqlite://{}", path.as_ref().display());
        Self::new(&database_url, None, None).await
    }

    /// Apply schema migrations. Call once at startup.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;
        Ok(())
    }

    /// Check that the database answers queries.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Metadata store health check failed")?;
        Ok(())
    }

    /// Insert or replace a block row together with all its subtree rows in
    /// one transaction. Replacing an existing merkle_root cascades away the
    /// old subtree rows first, so re-committing a block is idempotent.
    pub async fn put_block(&self, block: &BlockMeta, subtrees: &[SubtreeMeta]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO blocks (height, block_hash, merkle_root, tx_count, status, timestamp)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(block.height as i64)
        .bind(&block.block_hash[..])
        .bind(&block.merkle_root[..])
        .bind(block.tx_count as i64)
        .bind(block.status.as_str())
        .bind(block.timestamp)
        .execute(&mut *tx)
        .await
        .context("Failed to insert block")?;

        for subtree in subtrees {
            sqlx::query(
                r#"
                INSERT INTO subtrees (merkle_root, subtree_index, subtree_merkle_root, tx_count, index_root, tx_tree_root)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&subtree.merkle_root[..])
            .bind(subtree.subtree_index as i64)
            .bind(&subtree.subtree_merkle_root[..])
            .bind(subtree.tx_count as i64)
            .bind(subtree.index_root.as_bytes())
            .bind(subtree.tx_tree_root.as_bytes())
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert subtree {}", subtree.subtree_index))?;
        }

        tx.commit().await.context("Failed to commit block")?;
        Ok(())
    }

    /// The main-chain block at `height`, if any.
    pub async fn get_block_by_height(&self, height: u64) -> Result<Option<BlockMeta>> {
        let row = sqlx::query(
            r#"
            SELECT height, block_hash, merkle_root, tx_count, status, timestamp
            FROM blocks WHERE height = ? AND status = 'main'
            "#,
        )
        .bind(height as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_block).transpose()
    }

    /// The block with `block_hash`, any status.
    pub async fn get_block_by_hash(&self, block_hash: &Hash32) -> Result<Option<BlockMeta>> {
        let row = sqlx::query(
            r#"
            SELECT height, block_hash, merkle_root, tx_count, status, timestamp
            FROM blocks WHERE block_hash = ?
            "#,
        )
        .bind(&block_hash[..])
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_block).transpose()
    }

    /// The block with `merkle_root`, any status.
    pub async fn get_block_by_merkle_root(
        &self,
        merkle_root: &Hash32,
    ) -> Result<Option<BlockMeta>> {
        let row = sqlx::query(
            r#"
            SELECT height, block_hash, merkle_root, tx_count, status, timestamp
            FROM blocks WHERE merkle_root = ?
            "#,
        )
        .bind(&merkle_root[..])
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_block).transpose()
    }

    /// All subtrees of a block, ordered by subtree_index.
    pub async fn get_subtrees(&self, merkle_root: &Hash32) -> Result<Vec<SubtreeMeta>> {
        let rows = sqlx::query(
            r#"
            SELECT merkle_root, subtree_index, subtree_merkle_root, tx_count, index_root, tx_tree_root
            FROM subtrees WHERE merkle_root = ? ORDER BY subtree_index
            "#,
        )
        .bind(&merkle_root[..])
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_subtree).collect()
    }

    /// Flip every main-chain block at `height` to orphan.
    pub async fn mark_orphan(&self, height: u64) -> Result<()> {
        sqlx::query("UPDATE blocks SET status = 'orphan' WHERE height = ? AND status = 'main'")
            .bind(height as i64)
            .execute(&self.pool)
            .await
            .context("Failed to mark blocks as orphan")?;
        Ok(())
    }

    /// Delete orphaned blocks at or below `current_tip - depth`; subtree
    /// rows cascade.
    pub async fn cleanup_orphans(&self, current_tip: u64, depth: u64) -> Result<u64> {
        if current_tip < depth {
            return Ok(0);
        }
        let cutoff = current_tip - depth;

        let result = sqlx::query("DELETE FROM blocks WHERE status = 'orphan' AND height <= ?")
            .bind(cutoff as i64)
            .execute(&self.pool)
            .await
            .context("Failed to cleanup orphans")?;

        Ok(result.rows_affected())
    }

    /// The highest main-chain block, if any.
    pub async fn latest_main(&self) -> Result<Option<BlockMeta>> {
        let row = sqlx::query(
            r#"
            SELECT height, block_hash, merkle_root, tx_count, status, timestamp
            FROM blocks WHERE status = 'main' ORDER BY height DESC LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_block).transpose()
    }

    /// Aggregate counts for the status display.
    pub async fn stats(&self) -> Result<StorageStats> {
        let block_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blocks")
            .fetch_one(&self.pool)
            .await?;
        let subtree_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subtrees")
            .fetch_one(&self.pool)
            .await?;
        let orphan_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM blocks WHERE status = 'orphan'")
                .fetch_one(&self.pool)
                .await?;
        let latest = self.latest_main().await?;

        Ok(StorageStats {
            block_count: block_count as u64,
            subtree_count: subtree_count as u64,
            orphan_count: orphan_count as u64,
            latest_height: latest.map(|b| b.height),
        })
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
