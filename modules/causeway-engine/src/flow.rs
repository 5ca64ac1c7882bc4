//! Flow registration: which handler receives which `(domain, type)`.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use causeway_events::Event;

use crate::error::DispatchError;
use crate::side_effect::{SideEffect, SideEffectQueue};

/// Receives events of one `(domain, type)`.
///
/// Returning an error fails that one delivery; the shard moves on to the
/// next event.
#[async_trait]
pub trait FlowHandler: Send + Sync {
    async fn receive(&self, event: Arc<Event>, ctx: &FlowContext) -> anyhow::Result<()>;
}

/// Closure adapter for [`FlowHandler`].
pub struct FnFlow<F>(F);

pub fn from_fn<F, Fut>(f: F) -> FnFlow<F>
where
    F: Fn(Arc<Event>, FlowContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnFlow(f)
}

#[async_trait]
impl<F, Fut> FlowHandler for FnFlow<F>
where
    F: Fn(Arc<Event>, FlowContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn receive(&self, event: Arc<Event>, ctx: &FlowContext) -> anyhow::Result<()> {
        (self.0)(event, ctx.clone()).await
    }
}

/// Rewrites an event written at `from_version` into the shape the flow
/// expects. `None` means "nothing to do".
pub type Upcaster = Arc<dyn Fn(&Event, u32) -> Option<Event> + Send + Sync>;

/// A registered handler plus its schema policy.
#[derive(Clone)]
pub struct EventFlow {
    pub domain: String,
    pub event_type: String,
    pub receive: Arc<dyn FlowHandler>,
    pub schema_version: Option<u32>,
    pub upcast: Option<Upcaster>,
}

impl EventFlow {
    pub fn new(
        domain: impl Into<String>,
        event_type: impl Into<String>,
        receive: impl FlowHandler + 'static,
    ) -> Self {
        Self {
            domain: domain.into(),
            event_type: event_type.into(),
            receive: Arc::new(receive),
            schema_version: None,
            upcast: None,
        }
    }

    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = Some(version);
        self
    }

    pub fn with_upcast<F>(mut self, upcast: F) -> Self
    where
        F: Fn(&Event, u32) -> Option<Event> + Send + Sync + 'static,
    {
        self.upcast = Some(Arc::new(upcast));
        self
    }
}

impl fmt::Debug for EventFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventFlow")
            .field("domain", &self.domain)
            .field("event_type", &self.event_type)
            .field("schema_version", &self.schema_version)
            .field("upcast", &self.upcast.is_some())
            .finish()
    }
}

/// Static `(domain, type) -> flow` routing table.
#[derive(Debug, Default, Clone)]
pub struct FlowTable {
    flows: HashMap<String, HashMap<String, Arc<EventFlow>>>,
    len: usize,
}

impl FlowTable {
    /// Build the table. Registering the same `(domain, type)` twice is an error.
    pub fn new(flows: impl IntoIterator<Item = EventFlow>) -> Result<Self, DispatchError> {
        let mut table = Self::default();
        for flow in flows {
            let by_type = table.flows.entry(flow.domain.clone()).or_default();
            if by_type.contains_key(&flow.event_type) {
                return Err(DispatchError::DuplicateFlow {
                    domain: flow.domain,
                    event_type: flow.event_type,
                });
            }
            by_type.insert(flow.event_type.clone(), Arc::new(flow));
            table.len += 1;
        }
        Ok(table)
    }

    pub fn get(&self, domain: &str, event_type: &str) -> Option<Arc<EventFlow>> {
        self.flows.get(domain)?.get(event_type).cloned()
    }

    pub fn handles(&self, event: &Event) -> bool {
        self.get(&event.domain, &event.event_type).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// What a flow handler gets alongside the event.
#[derive(Clone)]
pub struct FlowContext {
    event: Arc<Event>,
    shard: usize,
    side_effects: Option<SideEffectQueue>,
}

impl FlowContext {
    pub(crate) fn new(event: Arc<Event>, shard: usize, side_effects: Option<SideEffectQueue>) -> Self {
        Self {
            event,
            shard,
            side_effects,
        }
    }

    /// The event being handled, after upcasting.
    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn shard(&self) -> usize {
        self.shard
    }

    /// Queue a side effect caused by the current event.
    ///
    /// Unset `causation_id` defaults to the event's id and unset
    /// `identifier` to the event's identifier, so effects for one stream
    /// stay on one shard.
    pub fn side_effect(&self, effect: SideEffect) -> Result<(), DispatchError> {
        let queue = self
            .side_effects
            .as_ref()
            .ok_or(DispatchError::NoSideEffectQueue)?;

        let effect = SideEffect {
            causation_id: effect.causation_id.or_else(|| Some(self.event.id.clone())),
            identifier: effect.identifier.or_else(|| self.event.identifier.clone()),
            ..effect
        };
        queue.enqueue(effect, None).map_err(|(err, _)| err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Noop;

    #[async_trait]
    impl FlowHandler for Noop {
        async fn receive(&self, _event: Arc<Event>, _ctx: &FlowContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn noop() -> Noop {
        Noop
    }

    #[test]
    fn lookup_by_domain_and_type() {
        let table = FlowTable::new([
            EventFlow::new("orders", "placed", noop()),
            EventFlow::new("orders", "paid", noop()).with_schema_version(2),
        ])
        .unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.get("orders", "paid").unwrap().schema_version, Some(2));
        assert!(table.get("orders", "shipped").is_none());
        assert!(table.get("billing", "placed").is_none());
        assert!(table.handles(&Event::new("orders", "placed", json!({}))));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let err = FlowTable::new([
            EventFlow::new("orders", "placed", noop()),
            EventFlow::new("orders", "placed", noop()),
        ])
        .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::DuplicateFlow { domain, event_type } if domain == "orders" && event_type == "placed"
        ));
    }

    #[test]
    fn side_effect_without_a_queue_is_an_error() {
        let event = Arc::new(Event::new("orders", "placed", json!({})));
        let ctx = FlowContext::new(event, 0, None);
        let err = ctx.side_effect(SideEffect::new("email", json!({}))).unwrap_err();
        assert!(matches!(err, DispatchError::NoSideEffectQueue));
    }
}
