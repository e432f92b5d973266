use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, AggregateRecord, EventEnvelope, MessageId, OutboxEntry, OutboxQuery, Result,
    StoreError, Version,
    outbox::validate_outbox_batch,
    record::validate_record_for_save,
    unit_of_work::{OutboxReader, Repository, Transaction, UnitOfWork},
};

/// Advisory lock key serializing outbox appends across transactions.
const OUTBOX_APPEND_LOCK: i64 = 0x6f75_7462_6f78;

/// PostgreSQL-backed store implementation.
///
/// Each [`PostgresTransaction`] wraps one database transaction. Version
/// checks are compare-and-set updates, so two writers racing on the same
/// aggregate are serialized by the row lock and the loser sees zero rows
/// affected.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_record(row: PgRow) -> Result<AggregateRecord> {
        Ok(AggregateRecord {
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            version: Version::new(row.try_get("version")?),
            updated_at: row.try_get("updated_at")?,
            state: row.try_get("state")?,
        })
    }

    fn row_to_entry(row: PgRow) -> Result<OutboxEntry> {
        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_value(metadata_json)?;

        Ok(OutboxEntry {
            position: row.try_get("position")?,
            message: EventEnvelope {
                message_id: MessageId::from_uuid(row.try_get::<Uuid, _>("message_id")?),
                event_type: row.try_get("event_type")?,
                aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
                aggregate_type: row.try_get("aggregate_type")?,
                sequence: Version::new(row.try_get("sequence")?),
                occurred_at: row.try_get("occurred_at")?,
                payload: row.try_get("payload")?,
                metadata,
            },
            published_at: row.try_get("published_at")?,
        })
    }
}

#[async_trait]
impl Repository for PostgresStore {
    async fn find(&self, aggregate_id: AggregateId) -> Result<Option<AggregateRecord>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT aggregate_id, aggregate_type, version, updated_at, state
            FROM aggregates
            WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn current_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM aggregates WHERE aggregate_id = $1")
                .bind(aggregate_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        Ok(version.map(Version::new))
    }
}

#[async_trait]
impl UnitOfWork for PostgresStore {
    type Tx = PostgresTransaction;

    async fn begin(&self) -> Result<PostgresTransaction> {
        Ok(PostgresTransaction {
            tx: self.pool.begin().await?,
        })
    }
}

#[async_trait]
impl OutboxReader for PostgresStore {
    async fn query_outbox(&self, query: OutboxQuery) -> Result<Vec<OutboxEntry>> {
        let mut sql = String::from(
            "SELECT position, message_id, event_type, aggregate_id, aggregate_type, sequence, occurred_at, payload, metadata, published_at FROM outbox WHERE 1=1",
        );
        let mut param_count = 0;

        // Build dynamic query
        if !query.include_published {
            sql.push_str(" AND published_at IS NULL");
        }
        if query.aggregate_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND aggregate_id = ${param_count}"));
        }
        if query.event_types.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND event_type = ANY(${param_count})"));
        }
        if query.from_position.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND position >= ${param_count}"));
        }

        sql.push_str(" ORDER BY position ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(id) = query.aggregate_id {
            sqlx_query = sqlx_query.bind(id.as_uuid());
        }
        if let Some(event_types) = query.event_types {
            sqlx_query = sqlx_query.bind(event_types);
        }
        if let Some(from) = query.from_position {
            sqlx_query = sqlx_query.bind(from);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_entry).collect()
    }

    async fn mark_published(&self, positions: &[i64]) -> Result<()> {
        if positions.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "UPDATE outbox SET published_at = NOW() WHERE position = ANY($1) AND published_at IS NULL",
        )
        .bind(positions)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// A database transaction on [`PostgresStore`].
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl PostgresTransaction {
    async fn stored_version(&mut self, aggregate_id: AggregateId) -> Result<Version> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM aggregates WHERE aggregate_id = $1")
                .bind(aggregate_id.as_uuid())
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(version.map(Version::new).unwrap_or(Version::initial()))
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn save(&mut self, record: AggregateRecord, expected_version: Version) -> Result<()> {
        validate_record_for_save(&record, expected_version)?;

        let result = if expected_version.is_initial() {
            sqlx::query(
                r#"
                INSERT INTO aggregates (aggregate_id, aggregate_type, version, updated_at, state)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (aggregate_id) DO NOTHING
                "#,
            )
            .bind(record.aggregate_id.as_uuid())
            .bind(&record.aggregate_type)
            .bind(record.version.as_i64())
            .bind(record.updated_at)
            .bind(&record.state)
            .execute(&mut *self.tx)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE aggregates
                SET version = $3, updated_at = $4, state = $5
                WHERE aggregate_id = $1 AND version = $2
                "#,
            )
            .bind(record.aggregate_id.as_uuid())
            .bind(expected_version.as_i64())
            .bind(record.version.as_i64())
            .bind(record.updated_at)
            .bind(&record.state)
            .execute(&mut *self.tx)
            .await?
        };

        if result.rows_affected() == 0 {
            let actual = self.stored_version(record.aggregate_id).await?;
            return Err(StoreError::ConcurrencyConflict {
                aggregate_id: record.aggregate_id,
                expected: expected_version,
                actual,
            });
        }
        Ok(())
    }

    async fn append_outbox(&mut self, messages: Vec<EventEnvelope>) -> Result<()> {
        validate_outbox_batch(&messages)?;
        if messages.is_empty() {
            return Ok(());
        }

        // Positions come from a sequence at INSERT time. Holding this lock
        // until commit keeps any other writer from drawing a position while
        // ours is still invisible, so positions become visible in order.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(OUTBOX_APPEND_LOCK)
            .execute(&mut *self.tx)
            .await?;

        for message in &messages {
            let metadata_json = serde_json::to_value(&message.metadata)?;

            sqlx::query(
                r#"
                INSERT INTO outbox (message_id, event_type, aggregate_id, aggregate_type, sequence, occurred_at, payload, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(message.message_id.as_uuid())
            .bind(&message.event_type)
            .bind(message.aggregate_id.as_uuid())
            .bind(&message.aggregate_type)
            .bind(message.sequence.as_i64())
            .bind(message.occurred_at)
            .bind(&message.payload)
            .bind(metadata_json)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                // The (aggregate_id, sequence) key catches two commits that
                // both passed their version check on a fresh aggregate.
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("unique_outbox_aggregate_sequence")
                {
                    return StoreError::ConcurrencyConflict {
                        aggregate_id: message.aggregate_id,
                        expected: Version::new(message.sequence.as_i64() - 1),
                        actual: message.sequence,
                    };
                }
                StoreError::Database(e)
            })?;
        }
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
