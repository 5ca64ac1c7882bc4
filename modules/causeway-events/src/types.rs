//! Core types for the event store. Backend-agnostic.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Key inside `meta` that carries the schema version an event was written at.
pub const SCHEMA_VERSION_KEY: &str = "schemaVersion";

/// A domain event. Built by producers, never by the store.
///
/// `id` is a UUIDv7, so ids sort with creation time, but replay ordering is
/// always `(created, id)` and never relies on that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub domain: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub causation_id: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
    /// Append-time assertion: how many events the producer believes already
    /// exist for `identifier`. Checked at commit, never persisted.
    #[serde(skip)]
    pub expected_sequence: Option<i64>,
}

impl Event {
    pub fn new(
        domain: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            domain: domain.into(),
            event_type: event_type.into(),
            payload,
            meta: None,
            // Postgres keeps microseconds; truncate so a stored event reads back equal.
            created: Utc::now().trunc_subsecs(6),
            correlation_id: None,
            causation_id: None,
            identifier: None,
            expected_sequence: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        self
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_causation_id(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }

    /// Assert that `identifier`'s stream holds exactly `sequence` events at append time.
    pub fn expecting(mut self, sequence: i64) -> Self {
        self.expected_sequence = Some(sequence);
        self
    }

    /// Chain this event off `parent`: causation points at the parent, and the
    /// correlation is inherited (or started at the parent when it has none).
    pub fn caused_by(mut self, parent: &Event) -> Self {
        self.causation_id = Some(parent.id.clone());
        self.correlation_id = parent
            .correlation_id
            .clone()
            .or_else(|| Some(parent.id.clone()));
        self
    }

    /// `meta.schemaVersion`, if present and a non-negative integer.
    pub fn schema_version(&self) -> Option<u32> {
        self.meta
            .as_ref()?
            .get(SCHEMA_VERSION_KEY)?
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
    }

    /// A copy of this event with `meta.schemaVersion` set to `version`.
    /// Non-object meta is replaced by an object holding only the version.
    pub fn with_schema_version(mut self, version: u32) -> Self {
        let mut meta = match self.meta.take() {
            Some(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        meta.insert(SCHEMA_VERSION_KEY.to_string(), version.into());
        self.meta = Some(serde_json::Value::Object(meta));
        self
    }

    /// This event's position in replay order.
    pub fn cursor(&self) -> Cursor {
        Cursor {
            created: self.created,
            id: self.id.clone(),
        }
    }
}

/// A position in the log. Field order matters: the derived `Ord` compares
/// `created` first and breaks ties on `id`, which is replay order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cursor {
    pub created: DateTime<Utc>,
    pub id: String,
}

/// The storage-side shape of an [`Event`]: `payload` and `meta` are JSON text.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedEvent {
    pub id: String,
    pub domain: String,
    pub event_type: String,
    pub payload: String,
    pub meta: Option<String>,
    pub identifier: Option<String>,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    pub created: DateTime<Utc>,
    pub expected_sequence: Option<i64>,
}

impl PersistedEvent {
    pub fn from_event(event: &Event) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: event.id.clone(),
            domain: event.domain.clone(),
            event_type: event.event_type.clone(),
            payload: serde_json::to_string(&event.payload)?,
            meta: event.meta.as_ref().map(serde_json::to_string).transpose()?,
            identifier: event.identifier.clone(),
            correlation_id: event.correlation_id.clone(),
            causation_id: event.causation_id.clone(),
            created: event.created,
            expected_sequence: event.expected_sequence,
        })
    }

    pub fn into_event(self) -> Result<Event, serde_json::Error> {
        Ok(Event {
            payload: serde_json::from_str(&self.payload)?,
            meta: self.meta.as_deref().map(serde_json::from_str).transpose()?,
            id: self.id,
            domain: self.domain,
            event_type: self.event_type,
            created: self.created,
            correlation_id: self.correlation_id,
            causation_id: self.causation_id,
            identifier: self.identifier,
            expected_sequence: None,
        })
    }

    pub fn cursor(&self) -> Cursor {
        Cursor {
            created: self.created,
            id: self.id.clone(),
        }
    }
}
