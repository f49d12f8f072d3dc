//! PostgreSQL sink
//!
//! Rows land in the `logs` table. Deduplication is `ON CONFLICT (raw_sha256)
//! DO NOTHING` backed by a unique index that bootstrap creates on first use.
//! Once the index exists, bootstrap issues no DDL, so the ingest role only
//! needs SELECT and INSERT on a table provisioned by its owner.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{EventSink, InsertOutcome, SinkError};
use crate::decoder::NormalizedEvent;

/// Destination table
pub const TABLE: &str = "logs";

/// Unique index backing insert-or-ignore
pub const DEDUP_INDEX: &str = "ux_logs_raw_sha256";

/// Each step swallows only the errors a concurrent identical bootstrap can
/// raise. Anything else (e.g. insufficient_privilege) propagates.
const BOOTSTRAP_SQL: &str = r#"
DO $$
BEGIN
    BEGIN
        CREATE TABLE IF NOT EXISTS logs (
            id          BIGSERIAL PRIMARY KEY,
            ts          TIMESTAMPTZ NOT NULL,
            agent_name  TEXT,
            agent_id    TEXT,
            rule_id     INTEGER,
            rule_level  INTEGER,
            rule_desc   TEXT,
            src_ip      INET,
            user_name   TEXT,
            full_log    JSONB NOT NULL,
            raw_sha256  TEXT NOT NULL
        );
    EXCEPTION WHEN duplicate_table OR unique_violation THEN
        NULL;
    END;

    BEGIN
        CREATE UNIQUE INDEX IF NOT EXISTS ux_logs_raw_sha256 ON logs (raw_sha256);
    EXCEPTION WHEN duplicate_table OR unique_violation THEN
        NULL;
    END;

    BEGIN
        CREATE INDEX IF NOT EXISTS ix_logs_ts ON logs (ts);
    EXCEPTION WHEN duplicate_table OR unique_violation THEN
        NULL;
    END;
END
$$;
"#;

/// Any valid, non-partial unique index whose only column is `raw_sha256`.
/// A `unique_violation` swallowed above can also mean existing duplicate
/// rows, so the index has to be confirmed rather than assumed.
const DEDUP_INDEX_EXISTS_SQL: &str = r#"
SELECT EXISTS (
    SELECT 1
    FROM pg_index i
    JOIN pg_attribute a
      ON a.attrelid = i.indrelid AND a.attnum = i.indkey[0]
    WHERE i.indrelid = to_regclass('logs')
      AND i.indisunique
      AND i.indisvalid
      AND i.indnatts = 1
      AND i.indpred IS NULL
      AND a.attname = 'raw_sha256'
)
"#;

const INSERT_SQL: &str = r#"
INSERT INTO logs (
    ts, agent_name, agent_id, rule_id, rule_level, rule_desc,
    src_ip, user_name, full_log, raw_sha256
)
VALUES ($1, $2, $3, $4, $5, $6, $7::inet, $8, $9, $10)
ON CONFLICT (raw_sha256) DO NOTHING
"#;

/// [`EventSink`] over a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgSink {
    pool: PgPool,
}

impl PgSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Number of stored events
    pub async fn row_count(&self) -> Result<i64, SinkError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Newest stored event time, if any
    pub async fn latest_event_time(&self) -> Result<Option<DateTime<Utc>>, SinkError> {
        let latest: Option<DateTime<Utc>> = sqlx::query_scalar("SELECT MAX(ts) FROM logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(latest)
    }

    async fn dedup_index_exists(&self) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(DEDUP_INDEX_EXISTS_SQL)
            .fetch_one(&self.pool)
            .await
    }
}

#[async_trait]
impl EventSink for PgSink {
    async fn bootstrap(&self) -> Result<(), SinkError> {
        if self.dedup_index_exists().await.map_err(SinkError::Bootstrap)? {
            tracing::debug!(table = TABLE, index = DEDUP_INDEX, "Sink schema already present");
            return Ok(());
        }

        tracing::info!(table = TABLE, index = DEDUP_INDEX, "Creating sink schema");
        sqlx::query(BOOTSTRAP_SQL)
            .execute(&self.pool)
            .await
            .map_err(SinkError::Bootstrap)?;

        if !self.dedup_index_exists().await.map_err(SinkError::Bootstrap)? {
            tracing::error!(table = TABLE, index = DEDUP_INDEX, "Fingerprint unique index is missing");
            return Err(SinkError::DedupUnavailable);
        }

        tracing::debug!(table = TABLE, index = DEDUP_INDEX, "Sink schema ready");
        Ok(())
    }

    async fn insert_or_ignore(&self, event: &NormalizedEvent) -> Result<InsertOutcome, SinkError> {
        let result = sqlx::query(INSERT_SQL)
            .bind(event.event_time)
            .bind(event.agent_name.as_deref())
            .bind(event.agent_id.as_deref())
            .bind(event.rule_id)
            .bind(event.rule_severity)
            .bind(event.rule_description.as_deref())
            .bind(event.source_address.map(|ip| ip.to_string()))
            .bind(event.actor_name.as_deref())
            .bind(&event.raw_payload)
            .bind(event.fingerprint.to_hex())
            .execute(&self.pool)
            .await?;

        Ok(match result.rows_affected() {
            0 => InsertOutcome::Duplicate,
            _ => InsertOutcome::Inserted,
        })
    }
}
