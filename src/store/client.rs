use async_trait::async_trait;

use crate::store::error::StoreResult;
use crate::store::{Cell, RowKey};

/// Provides the row operations the engine needs from the backing store.
///
/// Implementations own batching, timeouts and low-level retries; the engine
/// only reacts to the distinguished `Throttle` error (see
/// [`crate::store::StoreError`]).
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Read every cell of the row.
    async fn get(&self, row_key: &RowKey) -> StoreResult<Vec<Cell>>;

    /// Write one cell into the row.
    async fn put(&self, row_key: &RowKey, cell: Cell) -> StoreResult<()>;

    /// Delete the given qualifiers from the row.
    async fn delete(&self, row_key: &RowKey, qualifiers: &[Vec<u8>]) -> StoreResult<()>;

    /// Ask the client to push any batched edits out now. Used when a flush
    /// batch is blocked on the concurrency cap and more work is waiting.
    fn flush_hint(&self);

    fn box_clone(&self) -> Box<dyn StoreClient>;
}

impl Clone for Box<dyn StoreClient> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}
