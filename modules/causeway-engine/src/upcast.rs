//! Bring old events up to the schema version their flow expects.

use std::sync::Arc;

use causeway_events::Event;
use tracing::debug;

use crate::flow::EventFlow;

/// Upcast `event` for `flow`. Never fails.
///
/// The input comes back untouched (same `Arc`) when the flow has no
/// upcaster or no schema version, when the event is already at or past that
/// version, or when the upcaster returns `None`. Otherwise the upcaster's
/// result is returned with `meta.schemaVersion` set to the flow's version.
/// Events without a recorded version count as version 0.
pub fn upcast(flow: &EventFlow, event: Arc<Event>) -> Arc<Event> {
    let (Some(upcaster), Some(target)) = (&flow.upcast, flow.schema_version) else {
        return event;
    };

    let from = event.schema_version().unwrap_or(0);
    if from >= target {
        return event;
    }

    match upcaster(&event, from) {
        Some(upcasted) => {
            debug!(
                event_id = %event.id,
                domain = %flow.domain,
                event_type = %flow.event_type,
                from,
                to = target,
                "Upcasted event"
            );
            Arc::new(upcasted.with_schema_version(target))
        }
        None => event,
    }
}
