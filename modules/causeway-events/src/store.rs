//! The repository over an append-only backend.
//!
//! Converts between [`Event`] and its persisted form, validates batches, and
//! hands out replay streams. Ordering, atomicity and the concurrency check
//! live in the backend.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::EventBackend;
use crate::error::{StoreError, StoreResult};
use crate::replay::{self, EventPages};
use crate::types::{Event, PersistedEvent};

/// Append-only event repository. The single source of truth.
pub struct EventStore<B: ?Sized> {
    backend: Arc<B>,
}

impl<B: ?Sized> Clone for EventStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
        }
    }
}

impl<B: EventBackend + 'static> EventStore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }
}

impl<B: EventBackend + ?Sized + 'static> EventStore<B> {
    pub fn from_arc(backend: Arc<B>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Append `events` atomically. An empty batch is a no-op.
    pub async fn store_events(&self, events: &[Event]) -> StoreResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        let batch = events
            .iter()
            .map(|event| {
                if event.expected_sequence.is_some() && event.identifier.is_none() {
                    return Err(StoreError::MissingStreamKey(event.id.clone()));
                }
                Ok(PersistedEvent::from_event(event)?)
            })
            .collect::<StoreResult<Vec<_>>>()?;

        if let Err(e) = self.backend.append(&batch).await {
            match &e {
                StoreError::Concurrency(conflict) => debug!(
                    stream = %conflict.stream_key,
                    expected = conflict.expected_sequence,
                    actual = conflict.actual_sequence,
                    "Append rejected by concurrency check"
                ),
                other => warn!(error = %other, count = batch.len(), "Append failed"),
            }
            return Err(e);
        }

        debug!(count = batch.len(), "Stored event batch");
        Ok(())
    }

    pub async fn get_event_by_id(&self, id: &str) -> StoreResult<Option<Event>> {
        match self.backend.get(id).await? {
            Some(row) => Ok(Some(row.into_event()?)),
            None => Ok(None),
        }
    }

    /// Events caused by `causation_id`, in `(created, id)` order.
    pub async fn find_by_causation_id(&self, causation_id: &str) -> StoreResult<Vec<Event>> {
        self.backend
            .query_by_causation(causation_id)
            .await?
            .into_iter()
            .map(|row| row.into_event().map_err(StoreError::from))
            .collect()
    }

    /// Replay the full log in pages of `page_size`, optionally resuming after
    /// the event with id `start_from_id`.
    pub fn get_all_events(&self, page_size: usize, start_from_id: Option<&str>) -> EventPages {
        replay::pages(
            self.backend.clone(),
            page_size,
            start_from_id.map(str::to_string),
        )
    }

    /// Drop and recreate the underlying storage. Administrative use only.
    pub async fn reset_store(&self) -> StoreResult<()> {
        warn!("Resetting event store");
        self.backend.reset().await
    }

    /// Current sequence of a stream: the number of events stored for `identifier`.
    /// Pass it to [`Event::expecting`] on the next write.
    pub async fn stream_sequence(&self, identifier: &str) -> StoreResult<i64> {
        self.backend.stream_len(identifier).await
    }

    pub async fn latest_event(&self) -> StoreResult<Option<Event>> {
        match self.backend.latest().await? {
            Some(row) => Ok(Some(row.into_event()?)),
            None => Ok(None),
        }
    }

    pub async fn count_events(&self) -> StoreResult<i64> {
        self.backend.count().await
    }
}
