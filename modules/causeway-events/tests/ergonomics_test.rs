//! Ergonomics and usage pattern tests.
//! These don't need Postgres. They test the API surface and developer experience.

use causeway_events::{Event, StoreConfig};
use serde_json::json;

// =========================================================================
// Event builder ergonomics
// =========================================================================

#[test]
fn event_minimal_construction() {
    let event = Event::new("orders", "placed", json!({"total": 10}));
    assert_eq!(event.domain, "orders");
    assert_eq!(event.event_type, "placed");
    assert!(event.meta.is_none());
    assert!(event.identifier.is_none());
    assert!(event.correlation_id.is_none());
    assert!(event.causation_id.is_none());
    assert!(event.expected_sequence.is_none());
}

#[test]
fn event_full_builder_chain() {
    let event = Event::new("orders", "placed", json!({}))
        .with_identifier("order-1")
        .with_correlation_id("corr-1")
        .with_causation_id("cause-1")
        .with_meta(json!({"schemaVersion": 2}))
        .expecting(4);

    assert_eq!(event.identifier.as_deref(), Some("order-1"));
    assert_eq!(event.correlation_id.as_deref(), Some("corr-1"));
    assert_eq!(event.causation_id.as_deref(), Some("cause-1"));
    assert_eq!(event.schema_version(), Some(2));
    assert_eq!(event.expected_sequence, Some(4));
}

#[test]
fn event_ids_are_unique_uuid_v7() {
    let a = Event::new("orders", "placed", json!({}));
    let b = Event::new("orders", "placed", json!({}));
    assert_ne!(a.id, b.id);

    let parsed = uuid::Uuid::parse_str(&a.id).unwrap();
    assert_eq!(parsed.get_version_num(), 7);
}

#[test]
fn event_serializes_with_wire_field_names() {
    let event = Event::new("orders", "placed", json!({"title": "Test"}))
        .with_identifier("order-1")
        .expecting(3);

    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], "placed");
    assert_eq!(value["identifier"], "order-1");
    assert!(value.get("correlationId").is_some());
    // The append-time assertion is never part of the event's shape.
    assert!(value.get("expectedSequence").is_none());

    let roundtripped: Event = serde_json::from_value(value).unwrap();
    assert_eq!(roundtripped.id, event.id);
    assert_eq!(roundtripped.expected_sequence, None);
}

#[test]
fn store_config_defaults() {
    let config = StoreConfig::new("postgres://localhost/causeway");
    assert_eq!(config.max_connections, StoreConfig::DEFAULT_MAX_CONNECTIONS);
    assert_eq!(config.replay_page_size, 100);
}
