//! The event log as a Postgres table.
//!
//! `payload` and `meta` are stored as JSON text. Pages are keyed on the
//! `(created, id)` row value, so resumption never depends on ids sorting with
//! time.

use std::collections::BTreeSet;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::backend::EventBackend;
use crate::concurrency::StreamSequences;
use crate::error::StoreResult;
use crate::types::{Cursor, PersistedEvent};

/// Schema for the `events` table. Idempotent.
pub const SCHEMA_SQL: &str = include_str!("../../../migrations/0001_events.sql");

#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `events` table and its indexes if they are missing.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        info!("Event schema is up to date");
        Ok(())
    }
}

#[async_trait]
impl EventBackend for PostgresBackend {
    async fn append(&self, batch: &[PersistedEvent]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        // Every stream the batch writes is locked, asserted or not, so an
        // unasserted writer cannot slip in between a count and its commit.
        // Locked in a stable order so two batches cannot deadlock.
        let touched: BTreeSet<&str> = batch
            .iter()
            .filter_map(|row| row.identifier.as_deref())
            .collect();
        let checked: BTreeSet<&str> = batch
            .iter()
            .filter(|row| row.expected_sequence.is_some())
            .filter_map(|row| row.identifier.as_deref())
            .collect();

        let mut seqs = StreamSequences::new();
        for identifier in touched {
            sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .bind(identifier)
                .execute(&mut *tx)
                .await?;

            if !checked.contains(identifier) {
                continue;
            }

            let (len,) = sqlx::query_as::<_, (i64,)>(
                "SELECT COUNT(*) FROM events WHERE identifier = $1",
            )
            .bind(identifier)
            .fetch_one(&mut *tx)
            .await?;

            seqs.load(identifier, len);
        }

        for row in batch {
            if let Some(identifier) = row.identifier.as_deref() {
                if seqs.is_loaded(identifier) {
                    // Dropping `tx` on the error path rolls the batch back.
                    seqs.admit(identifier, row.expected_sequence)?;
                }
            }

            sqlx::query(
                r#"
                INSERT INTO events (id, domain, type, payload, meta, identifier, correlation_id, causation_id, created)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(&row.id)
            .bind(&row.domain)
            .bind(&row.event_type)
            .bind(&row.payload)
            .bind(&row.meta)
            .bind(&row.identifier)
            .bind(&row.correlation_id)
            .bind(&row.causation_id)
            .bind(row.created)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn fetch_page(
        &self,
        after: Option<&Cursor>,
        limit: usize,
    ) -> StoreResult<Vec<PersistedEvent>> {
        let rows = match after {
            None => {
                sqlx::query_as::<_, PersistedEvent>(
                    r#"
                    SELECT id, domain, type, payload, meta, identifier, correlation_id, causation_id, created
                    FROM events
                    ORDER BY created ASC, id ASC
                    LIMIT $1
                    "#,
                )
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            Some(cursor) => {
                sqlx::query_as::<_, PersistedEvent>(
                    r#"
                    SELECT id, domain, type, payload, meta, identifier, correlation_id, causation_id, created
                    FROM events
                    WHERE (created, id) > ($1, $2)
                    ORDER BY created ASC, id ASC
                    LIMIT $3
                    "#,
                )
                .bind(cursor.created)
                .bind(&cursor.id)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows)
    }

    async fn get(&self, id: &str) -> StoreResult<Option<PersistedEvent>> {
        let row = sqlx::query_as::<_, PersistedEvent>(
            r#"
            SELECT id, domain, type, payload, meta, identifier, correlation_id, causation_id, created
            FROM events
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn query_by_causation(&self, causation_id: &str) -> StoreResult<Vec<PersistedEvent>> {
        let rows = sqlx::query_as::<_, PersistedEvent>(
            r#"
            SELECT id, domain, type, payload, meta, identifier, correlation_id, causation_id, created
            FROM events
            WHERE causation_id = $1
            ORDER BY created ASC, id ASC
            "#,
        )
        .bind(causation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn reset(&self) -> StoreResult<()> {
        warn!("Dropping and recreating the events table");
        let mut tx = self.pool.begin().await?;
        let conn: &mut sqlx::PgConnection = &mut tx;
        sqlx::query("DROP TABLE IF EXISTS events")
            .execute(&mut *conn)
            .await?;
        sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(SCHEMA_SQL)).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn stream_len(&self, identifier: &str) -> StoreResult<i64> {
        let (len,) =
            sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM events WHERE identifier = $1")
                .bind(identifier)
                .fetch_one(&self.pool)
                .await?;

        Ok(len)
    }

    async fn count(&self) -> StoreResult<i64> {
        let (count,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    async fn latest(&self) -> StoreResult<Option<PersistedEvent>> {
        let row = sqlx::query_as::<_, PersistedEvent>(
            r#"
            SELECT id, domain, type, payload, meta, identifier, correlation_id, causation_id, created
            FROM events
            ORDER BY created DESC, id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }
}

// ---------------------------------------------------------------------------
// sqlx::FromRow for PersistedEvent
// ---------------------------------------------------------------------------

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for PersistedEvent {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> std::result::Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(PersistedEvent {
            id: row.try_get("id")?,
            domain: row.try_get("domain")?,
            event_type: row.try_get("type")?,
            payload: row.try_get("payload")?,
            meta: row.try_get("meta")?,
            identifier: row.try_get("identifier")?,
            correlation_id: row.try_get("correlation_id")?,
            causation_id: row.try_get("causation_id")?,
            created: row.try_get("created")?,
            expected_sequence: None,
        })
    }
}
