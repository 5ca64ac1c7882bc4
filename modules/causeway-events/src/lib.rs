//! Append-only event store with ordered, resumable replay.
//!
//! Events carry opaque JSON `payload`/`meta` plus causal links
//! (`causation_id`, `correlation_id`) and an optional stream key
//! (`identifier`). Writes are atomic batches guarded by optimistic
//! concurrency; reads replay in `(created, id)` order.
//!
//! Storage is pluggable behind [`EventBackend`]: [`PostgresBackend`] for
//! production, [`MemoryBackend`] for tests and embedded use.

pub mod backend;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod registry;
pub mod replay;
pub mod store;
pub mod types;

pub use backend::EventBackend;
pub use concurrency::{check_sequence, ConcurrencyError, StreamSequences};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryBackend;
pub use postgres::PostgresBackend;
pub use registry::{ConnectionRegistry, DEFAULT_CONNECTION};
pub use replay::EventPages;
pub use store::EventStore;
pub use types::{Cursor, Event, PersistedEvent, SCHEMA_VERSION_KEY};
