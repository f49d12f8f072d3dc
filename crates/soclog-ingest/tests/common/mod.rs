//! Shared fixtures for soclog-ingest integration tests
//!
//! - [`MemorySink`]: insert-or-ignore over a map keyed by fingerprint, with
//!   switches to make individual lines fail
//! - [`MemoryCheckpoint`]: watermark held in memory, counts saves
//! - [`TestPostgres`]: throwaway PostgreSQL container (requires Docker)
//! - alert line builders and source file helpers

#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use soclog_common::Fingerprint;
use soclog_ingest::{
    decode, CheckpointError, CheckpointStore, EventSink, InsertOutcome, NormalizedEvent, SinkError,
    Watermark,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;

// ============================================================================
// In-memory sink
// ============================================================================

#[derive(Default)]
pub struct MemorySink {
    rows: Mutex<HashMap<Fingerprint, NormalizedEvent>>,
    unavailable_for: Mutex<HashSet<Fingerprint>>,
    rejects: Mutex<HashSet<Fingerprint>>,
    fail_bootstrap: AtomicBool,
    bootstraps: AtomicUsize,
    insert_calls: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `line` as if an earlier, interrupted run had inserted it
    pub fn preload(&self, line: &str) {
        let event = decode(line).expect("preloaded line must decode");
        self.rows.lock().unwrap().insert(event.fingerprint, event);
    }

    /// Inserts of `line` fail with a transient error until [`Self::recover`]
    pub fn make_unavailable_for(&self, line: &str) {
        self.unavailable_for.lock().unwrap().insert(Fingerprint::of(line));
    }

    pub fn recover(&self) {
        self.unavailable_for.lock().unwrap().clear();
    }

    /// Inserts of `line` are refused permanently
    pub fn reject(&self, line: &str) {
        self.rejects.lock().unwrap().insert(Fingerprint::of(line));
    }

    pub fn fail_bootstrap(&self) {
        self.fail_bootstrap.store(true, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn contains(&self, line: &str) -> bool {
        self.rows.lock().unwrap().contains_key(&Fingerprint::of(line))
    }

    pub fn stored(&self, line: &str) -> Option<NormalizedEvent> {
        self.rows.lock().unwrap().get(&Fingerprint::of(line)).cloned()
    }

    pub fn bootstraps(&self) -> usize {
        self.bootstraps.load(Ordering::SeqCst)
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn bootstrap(&self) -> Result<(), SinkError> {
        self.bootstraps.fetch_add(1, Ordering::SeqCst);
        if self.fail_bootstrap.load(Ordering::SeqCst) {
            return Err(SinkError::DedupUnavailable);
        }
        Ok(())
    }

    async fn insert_or_ignore(&self, event: &NormalizedEvent) -> Result<InsertOutcome, SinkError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);

        if self.unavailable_for.lock().unwrap().contains(&event.fingerprint) {
            return Err(SinkError::Unavailable(sqlx::Error::PoolTimedOut));
        }
        if self.rejects.lock().unwrap().contains(&event.fingerprint) {
            return Err(SinkError::Rejected {
                code: Some("22003".to_string()),
                message: "integer out of range".to_string(),
            });
        }

        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&event.fingerprint) {
            return Ok(InsertOutcome::Duplicate);
        }
        rows.insert(event.fingerprint, event.clone());
        Ok(InsertOutcome::Inserted)
    }
}

// ============================================================================
// In-memory checkpoint
// ============================================================================

#[derive(Default)]
pub struct MemoryCheckpoint {
    value: Mutex<Watermark>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryCheckpoint {
    pub fn at(watermark: Watermark) -> Self {
        Self {
            value: Mutex::new(watermark),
            ..Default::default()
        }
    }

    pub fn current(&self) -> Watermark {
        *self.value.lock().unwrap()
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn fail_saves(&self) {
        self.fail_saves.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpoint {
    async fn load(&self) -> Watermark {
        self.current()
    }

    async fn save(&self, watermark: Watermark) -> Result<(), CheckpointError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(CheckpointError::Write {
                path: PathBuf::from("/read-only/last_ts.txt"),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            });
        }
        *self.value.lock().unwrap() = watermark;
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// A Wazuh-style alert line
pub fn alert(timestamp: &str, rule_id: &str, description: &str) -> String {
    json!({
        "timestamp": timestamp,
        "rule": {"level": 5, "description": description, "id": rule_id},
        "agent": {"id": "001", "name": "web-01"},
        "data": {"srcip": "203.0.113.7", "user": "root"},
        "full_log": format!("sshd: {description}"),
    })
    .to_string()
}

pub fn ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .expect("fixture timestamp must be RFC 3339")
        .with_timezone(&Utc)
}

pub fn watermark(raw: &str) -> Watermark {
    Watermark::new(ts(raw))
}

/// Alert log in a temporary directory
pub struct SourceFile {
    dir: TempDir,
    path: PathBuf,
}

impl SourceFile {
    pub fn with_lines<S: AsRef<str>>(lines: &[S]) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("alerts.json");
        let source = Self { dir, path };
        source.write(lines);
        source
    }

    pub fn write<S: AsRef<str>>(&self, lines: &[S]) {
        let mut contents = String::new();
        for line in lines {
            contents.push_str(line.as_ref());
            contents.push('\n');
        }
        std::fs::write(&self.path, contents).expect("Failed to write source file");
    }

    pub fn write_bytes(&self, bytes: &[u8]) {
        std::fs::write(&self.path, bytes).expect("Failed to write source file");
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn dir(&self) -> &std::path::Path {
        self.dir.path()
    }
}

// ============================================================================
// PostgreSQL container
// ============================================================================

pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
    connection_string: String,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container.get_host().await.context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string = format!("postgresql://postgres:postgres@{host}:{port}/postgres");

        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self {
            _container: container,
            pool,
            connection_string,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}

pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,soclog_ingest=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}
