//! The main dispatch queue: events in, flow handlers out.
//!
//! Events are routed to a shard by their stream key, upcast against their
//! flow, then handed to the flow's handler. Order is kept per shard only.

use std::borrow::Cow;
use std::sync::Arc;

use async_trait::async_trait;
use causeway_events::Event;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::drain::SideEffectSource;
use crate::error::DispatchError;
use crate::flow::{EventFlow, FlowContext, FlowTable};
use crate::partition::partition;
use crate::shard::{guarded, notify, JobRunner, ShardedQueue};
use crate::side_effect::SideEffectQueue;
use crate::signal::QueueSize;
use crate::upcast::upcast;

/// A successfully handled event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub event_id: String,
    pub shard: usize,
    /// Whether the handler saw an upcast copy rather than the pushed event.
    pub upcasted: bool,
}

pub type DispatchCallback = Box<dyn FnOnce(Result<Delivery, DispatchError>) + Send>;

/// The key that picks an event's shard: `identifier`, else `"{domain}/{type}"`.
pub fn routing_key(event: &Event) -> Cow<'_, str> {
    match &event.identifier {
        Some(identifier) => Cow::Borrowed(identifier.as_str()),
        None => Cow::Owned(format!("{}/{}", event.domain, event.event_type)),
    }
}

struct DispatchJob {
    event: Arc<Event>,
    flow: Arc<EventFlow>,
    callback: Option<DispatchCallback>,
}

struct FlowRunner {
    side_effects: Option<SideEffectQueue>,
}

#[async_trait]
impl JobRunner<DispatchJob> for FlowRunner {
    async fn run(&self, shard: usize, job: DispatchJob) {
        let DispatchJob {
            event,
            flow,
            callback,
        } = job;

        let received = upcast(&flow, event.clone());
        let upcasted = !Arc::ptr_eq(&received, &event);
        let ctx = FlowContext::new(received.clone(), shard, self.side_effects.clone());

        debug!(
            event_id = %event.id,
            domain = %event.domain,
            event_type = %event.event_type,
            shard,
            upcasted,
            "Dispatching event"
        );

        let outcome = match guarded(flow.receive.receive(received, &ctx)).await {
            Ok(Ok(())) => Ok(Delivery {
                event_id: event.id.clone(),
                shard,
                upcasted,
            }),
            Ok(Err(source)) => {
                warn!(
                    event_id = %event.id,
                    domain = %event.domain,
                    event_type = %event.event_type,
                    shard,
                    error = %source,
                    "Flow handler failed"
                );
                Err(DispatchError::Handler {
                    domain: event.domain.clone(),
                    event_type: event.event_type.clone(),
                    event_id: event.id.clone(),
                    source,
                })
            }
            Err(message) => {
                warn!(
                    event_id = %event.id,
                    domain = %event.domain,
                    event_type = %event.event_type,
                    shard,
                    panic = %message,
                    "Flow handler panicked"
                );
                Err(DispatchError::HandlerPanicked {
                    target: format!("flow {}/{}", event.domain, event.event_type),
                    message,
                })
            }
        };

        notify(callback, outcome);
    }
}

/// Sharded event dispatch.
pub struct DispatchQueue {
    flows: Arc<FlowTable>,
    queue: ShardedQueue<DispatchJob>,
    side_effects: Option<SideEffectQueue>,
}

impl DispatchQueue {
    /// Spawns one worker per shard, so this must run inside a Tokio runtime.
    /// `side_effects` is what flow handlers reach through
    /// [`FlowContext::side_effect`].
    pub fn new(flows: FlowTable, config: &EngineConfig, side_effects: Option<SideEffectQueue>) -> Self {
        let size = QueueSize::new(config.queue_signal_capacity, config.queue_heartbeat);
        let runner = Arc::new(FlowRunner {
            side_effects: side_effects.clone(),
        });
        let queue = ShardedQueue::start("dispatch", config.dispatch_shards, size, runner);

        Self {
            flows: Arc::new(flows),
            queue,
            side_effects,
        }
    }

    /// Enqueue `event` and return immediately.
    ///
    /// `callback` runs once the handler finishes, or right away with
    /// [`DispatchError::UnknownFlow`] if nothing handles the event.
    pub fn push(&self, event: impl Into<Arc<Event>>, callback: Option<DispatchCallback>) {
        let event = event.into();
        let Some(flow) = self.flows.get(&event.domain, &event.event_type) else {
            warn!(
                event_id = %event.id,
                domain = %event.domain,
                event_type = %event.event_type,
                "No flow registered for event"
            );
            notify(
                callback,
                Err(DispatchError::UnknownFlow {
                    domain: event.domain.clone(),
                    event_type: event.event_type.clone(),
                }),
            );
            return;
        };

        let shard = self.shard_for(&event);
        let job = DispatchJob {
            event,
            flow,
            callback,
        };
        if let Err(job) = self.queue.enqueue(shard, job) {
            warn!(event_id = %job.event.id, "Dispatch queue is shut down");
            notify(job.callback, Err(DispatchError::QueueClosed));
        }
    }

    /// Push and wait for the handler's outcome.
    pub async fn push_and_wait(&self, event: impl Into<Arc<Event>>) -> Result<Delivery, DispatchError> {
        let (tx, rx) = oneshot::channel();
        self.push(
            event,
            Some(Box::new(move |outcome| {
                let _ = tx.send(outcome);
            })),
        );
        rx.await.map_err(|_| DispatchError::QueueClosed)?
    }

    pub fn handles(&self, event: &Event) -> bool {
        self.flows.handles(event)
    }

    pub fn flows(&self) -> &FlowTable {
        &self.flows
    }

    pub fn shard_for(&self, event: &Event) -> usize {
        partition(&routing_key(event), self.queue.shard_count())
    }

    pub fn shard_count(&self) -> usize {
        self.queue.shard_count()
    }

    pub fn queue_size(&self) -> QueueSize {
        self.queue.size().clone()
    }

    pub fn side_effects(&self) -> Option<&SideEffectQueue> {
        self.side_effects.as_ref()
    }

    /// Stop accepting events and wait for every shard to finish its backlog.
    /// The side-effect queue is left running.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }
}

impl SideEffectSource for DispatchQueue {
    fn side_effect_queue_size(&self) -> Option<QueueSize> {
        self.side_effects.as_ref().map(SideEffectQueue::queue_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn routing_key_prefers_identifier() {
        let event = Event::new("orders", "placed", json!({}));
        assert_eq!(routing_key(&event), "orders/placed");

        let event = event.with_identifier("order-7");
        assert_eq!(routing_key(&event), "order-7");
    }
}
