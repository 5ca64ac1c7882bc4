//! In-memory backend. Same ordering and atomicity rules as Postgres, no database.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::backend::EventBackend;
use crate::concurrency::StreamSequences;
use crate::error::{StoreError, StoreResult};
use crate::types::{Cursor, PersistedEvent};

#[derive(Default)]
struct Log {
    rows: BTreeMap<Cursor, PersistedEvent>,
    by_id: HashMap<String, Cursor>,
}

impl Log {
    fn stream_len(&self, identifier: &str) -> i64 {
        self.rows
            .values()
            .filter(|row| row.identifier.as_deref() == Some(identifier))
            .count() as i64
    }
}

/// Thread-safe in-memory event log, keyed by replay position.
#[derive(Default)]
pub struct MemoryBackend {
    log: RwLock<Log>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventBackend for MemoryBackend {
    async fn append(&self, batch: &[PersistedEvent]) -> StoreResult<()> {
        let mut log = self.log.write().await;

        // Validate the whole batch before touching the log.
        let mut seen = HashSet::new();
        let mut seqs = StreamSequences::new();
        for row in batch {
            if log.by_id.contains_key(&row.id) || !seen.insert(row.id.as_str()) {
                return Err(StoreError::DuplicateId(row.id.clone()));
            }
            if let Some(identifier) = &row.identifier {
                if !seqs.is_loaded(identifier) {
                    let len = log.stream_len(identifier);
                    seqs.load(identifier, len);
                }
                seqs.admit(identifier, row.expected_sequence)?;
            }
        }

        for row in batch {
            let cursor = row.cursor();
            log.by_id.insert(row.id.clone(), cursor.clone());
            log.rows.insert(cursor, row.clone());
        }
        Ok(())
    }

    async fn fetch_page(
        &self,
        after: Option<&Cursor>,
        limit: usize,
    ) -> StoreResult<Vec<PersistedEvent>> {
        let log = self.log.read().await;
        let lower = match after {
            Some(cursor) => Bound::Excluded(cursor.clone()),
            None => Bound::Unbounded,
        };
        Ok(log
            .rows
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<PersistedEvent>> {
        let log = self.log.read().await;
        Ok(log
            .by_id
            .get(id)
            .and_then(|cursor| log.rows.get(cursor))
            .cloned())
    }

    async fn query_by_causation(&self, causation_id: &str) -> StoreResult<Vec<PersistedEvent>> {
        let log = self.log.read().await;
        Ok(log
            .rows
            .values()
            .filter(|row| row.causation_id.as_deref() == Some(causation_id))
            .cloned()
            .collect())
    }

    async fn reset(&self) -> StoreResult<()> {
        let mut log = self.log.write().await;
        *log = Log::default();
        Ok(())
    }

    async fn stream_len(&self, identifier: &str) -> StoreResult<i64> {
        Ok(self.log.read().await.stream_len(identifier))
    }

    async fn count(&self) -> StoreResult<i64> {
        Ok(self.log.read().await.rows.len() as i64)
    }

    async fn latest(&self) -> StoreResult<Option<PersistedEvent>> {
        let log = self.log.read().await;
        Ok(log.rows.values().next_back().cloned())
    }
}
