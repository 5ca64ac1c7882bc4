//! Ordered, paginated, resumable replay of the full log.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;

use crate::backend::EventBackend;
use crate::error::{StoreError, StoreResult};
use crate::types::{Cursor, Event, PersistedEvent};

/// A forward-only stream of pages in `(created, id)` order.
///
/// Dropping it early is fine; nothing is held open between page fetches.
pub type EventPages = Pin<Box<dyn Stream<Item = StoreResult<Vec<Event>>> + Send>>;

enum ReplayState {
    /// Not started. Holds the id to resume after, if any.
    Start(Option<String>),
    After(Cursor),
    Done,
}

pub(crate) fn pages<B>(backend: Arc<B>, page_size: usize, start_from_id: Option<String>) -> EventPages
where
    B: EventBackend + ?Sized + 'static,
{
    let stream = futures::stream::try_unfold(
        ReplayState::Start(start_from_id),
        move |state| {
            let backend = backend.clone();
            async move {
                let after = match state {
                    ReplayState::Done => return Ok(None),
                    ReplayState::Start(_) if page_size == 0 => {
                        return Err(StoreError::InvalidPageSize)
                    }
                    ReplayState::Start(None) => None,
                    // Resolve the id to its full sort key; ids alone are not an order.
                    ReplayState::Start(Some(id)) => match backend.get(&id).await? {
                        Some(row) => Some(row.cursor()),
                        None => return Err(StoreError::UnknownCursor(id)),
                    },
                    ReplayState::After(cursor) => Some(cursor),
                };

                let rows = backend.fetch_page(after.as_ref(), page_size).await?;
                if rows.is_empty() {
                    return Ok(None);
                }

                // A short page is the end of the log; don't probe for an empty one.
                let next = match rows.last() {
                    Some(last) if rows.len() == page_size => ReplayState::After(last.cursor()),
                    _ => ReplayState::Done,
                };

                let page = rows
                    .into_iter()
                    .map(PersistedEvent::into_event)
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(Some((page, next)))
            }
        },
    );

    Box::pin(stream)
}
