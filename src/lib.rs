//! # Rowpress
//!
//! Row compaction engine for wide-column time-series storage.
//!
//! Stores that key cells per timestamp repeat the row key on every cell and
//! offer no in-place append, so a row written datapoint-by-datapoint costs
//! far more to keep and to scan than it needs to. Rowpress watches the rows
//! writers touch and, once a row has aged out of its live window, collapses
//! all of its cells into a single canonical cell.
//!
//! ## Features
//!
//! - **Background compaction**: a dedicated worker drains a time-ordered
//!   queue of dirty rows at a rate proportional to the backlog
//! - **Faithful merging**: annotations survive out-of-band, append-style
//!   rows pass through, duplicates collapse, corruption fails loudly
//! - **Mixed resolutions**: seconds and millisecond datapoints interleave
//!   correctly, flagged in the canonical cell's meta byte
//! - **Backpressure aware**: a throttling store re-enqueues rows instead of
//!   erroring the pipeline
//!
//! ## Modules
//!
//! - [`compaction`]: codec, merger, queue, and the engine itself
//! - [`store`]: the client trait the engine drives, plus an in-memory store
//! - [`annotation`]: the JSON annotation codec
//! - [`stats`]: the collector seam for the engine's counters
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rowpress::{CompactionConfig, CompactionEngine, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let engine = CompactionEngine::new(store, CompactionConfig::default())?;
//!
//!     // Launch the background flush worker.
//!     engine.start();
//!
//!     // Writers mark rows dirty as they go.
//!     engine.enqueue(&[0x00, 0x00, 0x01, 0x50, 0x00, 0x00, 0x00, 0x00, 0x01]);
//!
//!     // Force out everything old enough, e.g. on shutdown.
//!     engine.shutdown().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod annotation;
pub mod compaction;
pub mod config;
pub mod stats;
pub mod store;

// Re-export top-level types for convenience
pub use annotation::Annotation;
pub use compaction::{
    merge, CompactionEngine, CompactionError, CompactionResult, DirtyRowQueue, MergeOutcome,
    RowMerge,
};
pub use config::{CompactionConfig, ConfigError};
pub use stats::{Sample, StatsCollector, VecCollector};
pub use store::{Cell, MemoryStore, StoreClient, StoreError};
