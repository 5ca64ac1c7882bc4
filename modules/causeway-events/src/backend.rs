//! The storage contract every backend implements.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::types::{Cursor, PersistedEvent};

/// Append-only storage for persisted events.
///
/// Implemented by `PostgresBackend` (production) and `MemoryBackend` (tests,
/// embedded use). Every read that returns more than one row orders it by
/// `(created, id)`.
#[async_trait]
pub trait EventBackend: Send + Sync {
    /// Append the batch in one transaction: all rows become visible or none do.
    /// Expected stream sequences are checked inside that transaction.
    async fn append(&self, batch: &[PersistedEvent]) -> StoreResult<()>;

    /// Up to `limit` rows strictly after `after` (from the start when `None`).
    async fn fetch_page(
        &self,
        after: Option<&Cursor>,
        limit: usize,
    ) -> StoreResult<Vec<PersistedEvent>>;

    async fn get(&self, id: &str) -> StoreResult<Option<PersistedEvent>>;

    async fn query_by_causation(&self, causation_id: &str) -> StoreResult<Vec<PersistedEvent>>;

    /// Drop and recreate the underlying storage. Destructive.
    async fn reset(&self) -> StoreResult<()>;

    /// Number of committed rows whose `identifier` is `identifier`.
    async fn stream_len(&self, identifier: &str) -> StoreResult<i64>;

    async fn count(&self) -> StoreResult<i64>;

    /// The last row in replay order.
    async fn latest(&self) -> StoreResult<Option<PersistedEvent>>;
}

// ---------------------------------------------------------------------------
// Arc<B> blanket: lets callers share one backend between stores
// ---------------------------------------------------------------------------

#[async_trait]
impl<B: EventBackend + ?Sized> EventBackend for Arc<B> {
    async fn append(&self, batch: &[PersistedEvent]) -> StoreResult<()> {
        (**self).append(batch).await
    }

    async fn fetch_page(
        &self,
        after: Option<&Cursor>,
        limit: usize,
    ) -> StoreResult<Vec<PersistedEvent>> {
        (**self).fetch_page(after, limit).await
    }

    async fn get(&self, id: &str) -> StoreResult<Option<PersistedEvent>> {
        (**self).get(id).await
    }

    async fn query_by_causation(&self, causation_id: &str) -> StoreResult<Vec<PersistedEvent>> {
        (**self).query_by_causation(causation_id).await
    }

    async fn reset(&self) -> StoreResult<()> {
        (**self).reset().await
    }

    async fn stream_len(&self, identifier: &str) -> StoreResult<i64> {
        (**self).stream_len(identifier).await
    }

    async fn count(&self) -> StoreResult<i64> {
        (**self).count().await
    }

    async fn latest(&self) -> StoreResult<Option<PersistedEvent>> {
        (**self).latest().await
    }
}
