//! Read-side liquidity index over escrow deposits
//!
//! Enumerates active deposits from an engine's read API, prunes the ones
//! that can never serve another intent, and selects the best deposit for a
//! requested fiat amount. Pruned ids persist in a caller-local cache so
//! repeated scans stay bounded. The index is eventually consistent and
//! never touches the engine's authoritative accounting.

pub mod cache;
pub mod indexer;

pub use cache::{CacheKey, JsonFileStore, MemoryStore, PruneStore};
pub use indexer::{IndexerConfig, LiquidityIndexer, Quote};

use thiserror::Error;

/// Errors surfaced by the index and its prune cache.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("prune cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("prune cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;
