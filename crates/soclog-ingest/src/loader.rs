//! Incremental ingestion loader
//!
//! One [`IngestLoader::run`] streams the source log from the top, decodes each
//! line, drops lines older than the stored watermark and hands the rest to the
//! sink's insert-or-ignore. The watermark is written once, after the source is
//! exhausted, and only if it moved forward.
//!
//! Re-running is the retry mechanism. It is safe because the sink refuses a
//! second row with the same fingerprint, whatever the checkpoint says.

use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

use crate::checkpoint::{CheckpointError, CheckpointStore, FileCheckpoint, Watermark};
use crate::config::IngestConfig;
use crate::db::{create_pool, DbError};
use crate::decoder::{decode, DecodeFailure};
use crate::sink::{EventSink, InsertOutcome, PgSink, SinkError};
use crate::summary::IngestSummary;

const LINE_BUFFER_CAPACITY: usize = 16 * 1024;

/// What happened to one non-blank source line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted(DateTime<Utc>),
    /// Already stored by an earlier run or an earlier line
    Duplicate(DateTime<Utc>),
    /// Before the loaded watermark
    TooOld,
    Unparsable,
    NoTimestamp,
    /// The sink refused the row; retrying will not help
    Rejected,
    /// The sink could not be reached for this row; the next run retries it
    Failed(DateTime<Utc>),
}

/// Conditions that end a run
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("source log {} does not exist", path.display())]
    SourceMissing { path: PathBuf },

    #[error("failed to read source log {}: {source}", path.display())]
    Source {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Database(#[from] DbError),

    #[error("sink bootstrap failed: {0}")]
    Bootstrap(#[source] SinkError),

    /// Rows were loaded but the watermark did not advance on disk. The next
    /// run rescans and sees them as duplicates.
    #[error("checkpoint not saved after run ({summary}): {source}")]
    Checkpoint {
        summary: Box<IngestSummary>,
        #[source]
        source: CheckpointError,
    },
}

/// In-run watermark bookkeeping
#[derive(Debug)]
struct Progress {
    loaded: Watermark,
    high: Option<DateTime<Utc>>,
    earliest_failure: Option<DateTime<Utc>>,
}

impl Progress {
    fn new(loaded: Watermark) -> Self {
        Self {
            loaded,
            high: None,
            earliest_failure: None,
        }
    }

    fn observe(&mut self, outcome: &RecordOutcome) {
        match *outcome {
            RecordOutcome::Inserted(at) | RecordOutcome::Duplicate(at) => {
                self.high = Some(self.high.map_or(at, |high| high.max(at)));
            },
            RecordOutcome::Failed(at) => {
                self.earliest_failure = Some(self.earliest_failure.map_or(at, |first| first.min(at)));
            },
            _ => {},
        }
    }

    /// Watermark to persist, if any.
    ///
    /// Duplicates count as progress: the sink already holds them.
    ///
    /// A failed insert caps the target at its event time so the next run
    /// admits that line again. Failed events were admitted against `loaded`,
    /// so the cap never drops below it.
    fn commit_target(&self) -> Option<Watermark> {
        let mut target = self.high?;
        if let Some(failed_at) = self.earliest_failure {
            target = target.min(failed_at);
        }

        let target = Watermark::new(target);
        (target > self.loaded).then_some(target)
    }
}

/// Drives one source log into an [`EventSink`]
pub struct IngestLoader<S, C> {
    sink: S,
    checkpoints: C,
}

impl<S: EventSink, C: CheckpointStore> IngestLoader<S, C> {
    pub fn new(sink: S, checkpoints: C) -> Self {
        Self { sink, checkpoints }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn checkpoints(&self) -> &C {
        &self.checkpoints
    }

    /// Ingest every line of `source_path` that is not already stored.
    ///
    /// Record-level problems are counted in the summary and never end the run.
    #[tracing::instrument(skip(self, source_path), fields(source = %source_path.display()))]
    pub async fn run(&self, source_path: &Path) -> Result<IngestSummary, IngestError> {
        let started = Instant::now();

        let file = open_source(source_path).await?;
        self.sink.bootstrap().await.map_err(IngestError::Bootstrap)?;

        let loaded = self.checkpoints.load().await;
        info!(watermark = %loaded, "Starting ingestion");

        let mut summary = IngestSummary::starting_from(loaded);
        let mut progress = Progress::new(loaded);

        let mut reader = BufReader::new(file);
        let mut buf = Vec::with_capacity(LINE_BUFFER_CAPACITY);
        let mut line_no: u64 = 0;

        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .await
                .map_err(|source| IngestError::Source {
                    path: source_path.to_path_buf(),
                    source,
                })?;
            if read == 0 {
                break;
            }
            line_no += 1;

            let text = String::from_utf8_lossy(&buf);
            let line = text.trim();
            if line.is_empty() {
                continue;
            }

            let outcome = self.process(line, loaded, line_no).await;
            progress.observe(&outcome);
            summary.record(&outcome);
        }

        summary.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if let Some(target) = progress.commit_target() {
            if let Err(source) = self.checkpoints.save(target).await {
                error!(error = %source, %summary, "Checkpoint write failed");
                return Err(IngestError::Checkpoint {
                    summary: Box::new(summary),
                    source,
                });
            }
            summary.watermark_after = target;
            summary.checkpoint_written = true;
        }

        if summary.has_failures() {
            warn!(failed = summary.failed, "Some records could not be stored and will be retried next run");
        }
        info!(%summary, duration_ms = summary.duration_ms, "Ingestion complete");

        Ok(summary)
    }

    async fn process(&self, line: &str, watermark: Watermark, line_no: u64) -> RecordOutcome {
        let event = match decode(line) {
            Ok(event) => event,
            Err(DecodeFailure::NoTimestamp) => {
                debug!(line_no, "Skipping record without a usable timestamp");
                return RecordOutcome::NoTimestamp;
            },
            Err(DecodeFailure::Malformed(reason)) => {
                debug!(line_no, %reason, "Skipping unparsable record");
                return RecordOutcome::Unparsable;
            },
        };

        if !watermark.admits(event.event_time) {
            return RecordOutcome::TooOld;
        }

        match self.sink.insert_or_ignore(&event).await {
            Ok(InsertOutcome::Inserted) => RecordOutcome::Inserted(event.event_time),
            Ok(InsertOutcome::Duplicate) => {
                debug!(line_no, fingerprint = %event.fingerprint, "Already stored");
                RecordOutcome::Duplicate(event.event_time)
            },
            Err(e) if e.is_transient() => {
                warn!(line_no, error = %e, "Sink unavailable for record");
                RecordOutcome::Failed(event.event_time)
            },
            Err(e) => {
                warn!(line_no, fingerprint = %event.fingerprint, error = %e, "Sink rejected record");
                RecordOutcome::Rejected
            },
        }
    }
}

async fn open_source(path: &Path) -> Result<tokio::fs::File, IngestError> {
    tokio::fs::File::open(path).await.map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => IngestError::SourceMissing {
            path: path.to_path_buf(),
        },
        _ => IngestError::Source {
            path: path.to_path_buf(),
            source,
        },
    })
}

/// One run against PostgreSQL and the file checkpoint named in `config`.
///
/// The source is checked before any connection is made, so a missing log is
/// reported as such even when the database is down too.
pub async fn run_once(config: &IngestConfig) -> Result<IngestSummary, IngestError> {
    drop(open_source(&config.source_path).await?);

    let pool = create_pool(&config.database).await?;
    let loader = IngestLoader::new(
        PgSink::new(pool.clone()),
        FileCheckpoint::new(&config.checkpoint_path),
    );

    let result = loader.run(&config.source_path).await;
    pool.close().await;
    result
}
