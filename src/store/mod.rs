//! Backing store client seam
//!
//! The compaction engine talks to the wide-column store through the narrow
//! [`StoreClient`] trait: row reads, cell puts, qualifier deletes, and a
//! flush hint that asks the client to push batched writes immediately.
//! The real store client lives outside this crate; [`MemoryStore`] provides
//! a qualifier-ordered in-memory implementation for tests and embedders.

mod error;
mod memory;
mod types;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use types::{base_time_from_key, pretty_key, Cell, TIMESTAMP_BYTES};

use async_trait::async_trait;

/// Client contract consumed by the compaction engine.
///
/// Implementations must return a row's cells in ascending qualifier byte
/// order (the natural scan order of a wide-column store); the merger relies
/// on that ordering for uniform-resolution rows.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Read all cells of a row
    async fn get(&self, key: &[u8]) -> Result<Vec<Cell>, StoreError>;

    /// Write one cell of a row
    async fn put(&self, key: &[u8], qualifier: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Delete the given qualifiers from a row
    async fn delete(&self, key: &[u8], qualifiers: &[Vec<u8>]) -> Result<(), StoreError>;

    /// Ask the client to push any batched writes immediately
    fn flush_hint(&self);
}
