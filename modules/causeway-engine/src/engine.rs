//! Store plus queues behind one handle.

use std::sync::Arc;

use causeway_events::{Event, EventBackend, EventStore};
use futures::TryStreamExt;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::dispatch::DispatchQueue;
use crate::drain::{wait_until_idle, SideEffectSource};
use crate::error::DispatchError;
use crate::flow::FlowTable;
use crate::side_effect::{SideEffectQueue, SideEffectTable};
use crate::signal::{QueueSize, SignalError};

/// Counts from one [`Engine::replay`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub pushed: usize,
    /// Events in the log that no registered flow handles.
    pub skipped: usize,
}

/// Event store wired to a dispatch queue and an optional side-effect queue.
///
/// Append happens before dispatch: a handler only ever sees events that are
/// already durable.
pub struct Engine<B: ?Sized> {
    store: EventStore<B>,
    dispatch: DispatchQueue,
}

impl<B: EventBackend + ?Sized + 'static> Engine<B> {
    /// Must be called inside a Tokio runtime; queue workers are spawned here.
    pub fn new(
        store: EventStore<B>,
        flows: FlowTable,
        side_effects: Option<SideEffectTable>,
        config: &EngineConfig,
    ) -> Self {
        let side_effects = side_effects.map(|table| SideEffectQueue::new(table, config));
        let dispatch = DispatchQueue::new(flows, config, side_effects);

        info!(
            flows = dispatch.flows().len(),
            dispatch_shards = dispatch.shard_count(),
            side_effects = dispatch.side_effects().is_some(),
            "Engine started"
        );

        Self { store, dispatch }
    }

    pub fn store(&self) -> &EventStore<B> {
        &self.store
    }

    pub fn dispatch(&self) -> &DispatchQueue {
        &self.dispatch
    }

    /// Append `events` as one batch, then push each one that has a flow.
    ///
    /// A failed append dispatches nothing. Returns how many events were pushed.
    pub async fn publish(&self, events: Vec<Event>) -> Result<usize, DispatchError> {
        self.store.store_events(&events).await?;

        let mut pushed = 0;
        for event in events {
            if self.dispatch.handles(&event) {
                self.dispatch.push(event, None);
                pushed += 1;
            } else {
                debug!(
                    event_id = %event.id,
                    domain = %event.domain,
                    event_type = %event.event_type,
                    "No flow for published event"
                );
            }
        }
        Ok(pushed)
    }

    /// Stream the log through the dispatch queue in replay order, starting
    /// after `start_from_id` when given.
    ///
    /// Returns once every page has been pushed; call [`Engine::drained`] to
    /// wait for the handlers.
    pub async fn replay(
        &self,
        page_size: usize,
        start_from_id: Option<&str>,
    ) -> Result<ReplayStats, DispatchError> {
        let mut stats = ReplayStats::default();
        let mut pages = self.store.get_all_events(page_size, start_from_id);

        while let Some(page) = pages.try_next().await? {
            debug!(events = page.len(), "Replaying page");
            for event in page {
                if self.dispatch.handles(&event) {
                    self.dispatch.push(Arc::new(event), None);
                    stats.pushed += 1;
                } else {
                    stats.skipped += 1;
                }
            }
        }

        info!(pushed = stats.pushed, skipped = stats.skipped, "Replay pushed");
        Ok(stats)
    }

    /// Wait until the dispatch queue and then the side-effect queue have
    /// settled at zero.
    pub async fn drained(&self) -> Result<(), SignalError> {
        self.dispatch.queue_size().drained().await?;
        wait_until_idle(self).await?;
        Ok(())
    }

    /// Drain and stop both queues: dispatch first, since its handlers feed
    /// the side-effect queue.
    pub async fn shutdown(&self) {
        self.dispatch.shutdown().await;
        if let Some(side_effects) = self.dispatch.side_effects() {
            side_effects.shutdown().await;
        }
        info!("Engine stopped");
    }
}

impl<B: ?Sized> SideEffectSource for Engine<B> {
    fn side_effect_queue_size(&self) -> Option<QueueSize> {
        self.dispatch.side_effect_queue_size()
    }
}
