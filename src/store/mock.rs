// mockall::mock currently generates these warnings
#![allow(clippy::unused_unit)]
#![allow(clippy::ptr_arg)]

use std::sync::Arc;

use async_trait::async_trait;

use crate::store::client::StoreClient;
use crate::store::error::StoreResult;
use crate::store::{Cell, RowKey};

// mockall currently has issues mocking async traits with #[automock], so we use
// this workaround. See https://github.com/asomers/mockall/issues/75
mockall::mock! {
    pub StoreClient {
        pub fn get(&self, row_key: &RowKey) -> StoreResult<Vec<Cell>>;

        pub fn put(&self, row_key: &RowKey, cell: Cell) -> StoreResult<()>;

        pub fn delete(&self, row_key: &RowKey, qualifiers: &[Vec<u8>]) -> StoreResult<()>;

        pub fn flush_hint(&self);

        pub fn box_clone(&self) -> Box<dyn StoreClient>;
    }
}

#[async_trait]
impl StoreClient for Arc<MockStoreClient> {
    async fn get(&self, row_key: &RowKey) -> StoreResult<Vec<Cell>> {
        Arc::as_ref(self).get(row_key)
    }

    async fn put(&self, row_key: &RowKey, cell: Cell) -> StoreResult<()> {
        Arc::as_ref(self).put(row_key, cell)
    }

    async fn delete(&self, row_key: &RowKey, qualifiers: &[Vec<u8>]) -> StoreResult<()> {
        Arc::as_ref(self).delete(row_key, qualifiers)
    }

    fn flush_hint(&self) {
        Arc::as_ref(self).flush_hint()
    }

    fn box_clone(&self) -> Box<dyn StoreClient> {
        Box::new(Arc::clone(self))
    }
}

impl MockStoreClient {
    /// Convert into a type which can be used in place of `Box<dyn StoreClient>`.
    /// Arc is used so that the mock can be cloned. Box is used so it can be
    /// easily cast to `Box<dyn StoreClient>`.
    #[allow(clippy::redundant_allocation)]
    pub fn into_boxed_arc(self) -> Box<Arc<Self>> {
        Box::new(Arc::new(self))
    }
}
