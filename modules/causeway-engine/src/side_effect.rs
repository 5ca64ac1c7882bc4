//! Side-effect queue: work that flows hand off, run by kind-registered handlers.
//!
//! Same contract as the dispatch queue. A failing side effect is logged and
//! reported to its callback; it never reaches back into the event that
//! caused it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::drain::SideEffectSource;
use crate::error::DispatchError;
use crate::partition::partition;
use crate::shard::{guarded, notify, JobRunner, ShardedQueue};
use crate::signal::QueueSize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideEffect {
    pub kind: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub causation_id: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
}

impl SideEffect {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            causation_id: None,
            identifier: None,
        }
    }

    pub fn with_causation_id(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// `identifier` when set, otherwise `kind`.
    pub fn routing_key(&self) -> &str {
        self.identifier.as_deref().unwrap_or(&self.kind)
    }
}

#[async_trait]
pub trait SideEffectHandler: Send + Sync {
    async fn handle(&self, effect: &SideEffect) -> anyhow::Result<()>;
}

/// Closure adapter for [`SideEffectHandler`].
pub struct FnSideEffect<F>(F);

pub fn side_effect_fn<F, Fut>(f: F) -> FnSideEffect<F>
where
    F: Fn(SideEffect) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnSideEffect(f)
}

#[async_trait]
impl<F, Fut> SideEffectHandler for FnSideEffect<F>
where
    F: Fn(SideEffect) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, effect: &SideEffect) -> anyhow::Result<()> {
        (self.0)(effect.clone()).await
    }
}

/// Handlers keyed by side-effect kind. Built once at startup.
#[derive(Default, Clone)]
pub struct SideEffectTable {
    handlers: HashMap<String, Arc<dyn SideEffectHandler>>,
}

impl SideEffectTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        kind: impl Into<String>,
        handler: impl SideEffectHandler + 'static,
    ) -> Result<(), DispatchError> {
        let kind = kind.into();
        if self.handlers.contains_key(&kind) {
            return Err(DispatchError::DuplicateSideEffect { kind });
        }
        self.handlers.insert(kind, Arc::new(handler));
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn SideEffectHandler>> {
        self.handlers.get(kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Where a side effect ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideEffectDelivery {
    pub kind: String,
    pub shard: usize,
}

pub type SideEffectCallback = Box<dyn FnOnce(Result<SideEffectDelivery, DispatchError>) + Send>;

struct SideEffectJob {
    effect: SideEffect,
    handler: Arc<dyn SideEffectHandler>,
    callback: Option<SideEffectCallback>,
}

struct SideEffectRunner;

#[async_trait]
impl JobRunner<SideEffectJob> for SideEffectRunner {
    async fn run(&self, shard: usize, job: SideEffectJob) {
        let SideEffectJob {
            effect,
            handler,
            callback,
        } = job;
        let kind = effect.kind.clone();
        debug!(kind = %kind, shard, "Running side effect");

        let outcome = match guarded(handler.handle(&effect)).await {
            Ok(Ok(())) => Ok(SideEffectDelivery { kind, shard }),
            Ok(Err(source)) => {
                warn!(kind = %kind, shard, error = %source, "Side effect failed");
                Err(DispatchError::SideEffect { kind, source })
            }
            Err(message) => {
                warn!(kind = %kind, shard, panic = %message, "Side effect panicked");
                Err(DispatchError::HandlerPanicked {
                    target: format!("side effect {kind}"),
                    message,
                })
            }
        };

        notify(callback, outcome);
    }
}

/// Sharded side-effect queue. Cheap to clone; clones share the workers.
#[derive(Clone)]
pub struct SideEffectQueue {
    inner: Arc<Inner>,
}

struct Inner {
    handlers: SideEffectTable,
    queue: ShardedQueue<SideEffectJob>,
}

impl SideEffectQueue {
    /// Spawns the shard workers, so this must run inside a Tokio runtime.
    pub fn new(handlers: SideEffectTable, config: &EngineConfig) -> Self {
        let size = QueueSize::new(config.queue_signal_capacity, config.queue_heartbeat);
        let queue = ShardedQueue::start(
            "side_effect",
            config.side_effect_shards,
            size,
            Arc::new(SideEffectRunner),
        );
        Self {
            inner: Arc::new(Inner { handlers, queue }),
        }
    }

    /// Enqueue `effect` and return immediately. The outcome, including an
    /// unknown kind, goes to `callback`.
    pub fn push(&self, effect: SideEffect, callback: Option<SideEffectCallback>) {
        let kind = effect.kind.clone();
        if let Err((err, callback)) = self.enqueue(effect, callback) {
            warn!(kind = %kind, error = %err, "Side effect not enqueued");
            notify(callback, Err(err));
        }
    }

    pub async fn push_and_wait(&self, effect: SideEffect) -> Result<SideEffectDelivery, DispatchError> {
        let (tx, rx) = oneshot::channel();
        self.push(
            effect,
            Some(Box::new(move |outcome| {
                let _ = tx.send(outcome);
            })),
        );
        rx.await.map_err(|_| DispatchError::QueueClosed)?
    }

    /// Enqueue, handing the callback back with the error if that fails.
    pub(crate) fn enqueue(
        &self,
        effect: SideEffect,
        callback: Option<SideEffectCallback>,
    ) -> Result<(), (DispatchError, Option<SideEffectCallback>)> {
        let Some(handler) = self.inner.handlers.get(&effect.kind) else {
            let kind = effect.kind;
            return Err((DispatchError::UnknownSideEffect { kind }, callback));
        };

        let shard = self.shard_for(&effect);
        let job = SideEffectJob {
            effect,
            handler,
            callback,
        };
        self.inner
            .queue
            .enqueue(shard, job)
            .map_err(|job| (DispatchError::QueueClosed, job.callback))
    }

    pub fn shard_for(&self, effect: &SideEffect) -> usize {
        partition(effect.routing_key(), self.inner.queue.shard_count())
    }

    pub fn shard_count(&self) -> usize {
        self.inner.queue.shard_count()
    }

    pub fn queue_size(&self) -> QueueSize {
        self.inner.queue.size().clone()
    }

    /// Stop accepting side effects and wait for queued ones to finish.
    pub async fn shutdown(&self) {
        self.inner.queue.shutdown().await;
    }
}

impl SideEffectSource for SideEffectQueue {
    fn side_effect_queue_size(&self) -> Option<QueueSize> {
        Some(self.queue_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn routing_key_prefers_identifier() {
        let effect = SideEffect::new("email", json!({}));
        assert_eq!(effect.routing_key(), "email");
        assert_eq!(effect.with_identifier("user-1").routing_key(), "user-1");
    }

    #[test]
    fn duplicate_kind_is_rejected() {
        let mut table = SideEffectTable::new();
        table
            .register("email", side_effect_fn(|_| async { anyhow::Ok(()) }))
            .unwrap();
        let err = table
            .register("email", side_effect_fn(|_| async { anyhow::Ok(()) }))
            .unwrap_err();
        assert!(matches!(err, DispatchError::DuplicateSideEffect { kind } if kind == "email"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn wire_names_are_camel_case() {
        let effect = SideEffect::new("email", json!({"to": "a@b.c"})).with_causation_id("evt-1");
        let value = serde_json::to_value(&effect).unwrap();
        assert_eq!(value["causationId"], "evt-1");
        assert_eq!(value["kind"], "email");
    }
}
