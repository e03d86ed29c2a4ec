//! Subtree and block ingestion for teraindex.
//!
//! This crate wires the storage, index, and merkle layers into the live
//! pipeline:
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ teraindex (this binary)              │
//! │                                      │
//! │  overlay channels  ← P2P transport   │
//! │   block / subtree / node_status      │
//! │        │                             │
//! │  ┌─────▼──────────┐                  │
//! │  │ SubtreeProcessor│ ← HTTP fetcher  │
//! │  │  fetch, verify, │                 │
//! │  │  index, merkle  │                 │
//! │  └─────┬──────────┘                  │
//! │        │ pending subtrees            │
//! │  ┌─────▼──────────┐                  │
//! │  │ BlockAssembler │                  │
//! │  │  join, verify, │ → MetadataStore  │
//! │  │  commit, reorg │   (SQLite)       │
//! │  └────────────────┘                  │
//! │        │                             │
//! │  ContentStore (sled)                 │
//! │   txs, merkle nodes, index nodes     │
//! └──────────────────────────────────────┘
//! ```
//!
//! The event loop is single-threaded: one announcement is processed to
//! completion before the next is taken. Every content-addressed write is
//! idempotent and metadata commits last, so a failed or interrupted message
//! can simply be re-announced.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assembler;
pub mod chain;
pub mod config;
pub mod extract;
pub mod fetcher;
pub mod messages;
pub mod processor;
pub mod storage;
