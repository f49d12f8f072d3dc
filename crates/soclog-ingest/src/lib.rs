//! SOCLOG Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Incremental, restart-safe loading of a newline-delimited JSON alert log
//! into PostgreSQL.
//!
//! - **Decoder**: one line in, one [`NormalizedEvent`] or [`DecodeFailure`] out
//! - **Checkpoint**: the watermark that lets a run skip lines it already saw
//! - **Sink**: insert-or-ignore keyed by the line's fingerprint
//! - **Loader**: streams the log through the decoder into the sink
//!
//! # Example
//!
//! ```no_run
//! use soclog_ingest::{run_once, IngestConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let summary = run_once(&IngestConfig::from_env()?).await?;
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod config;
pub mod db;
pub mod decoder;
pub mod loader;
pub mod sink;
pub mod summary;

pub use checkpoint::{CheckpointError, CheckpointStore, FileCheckpoint, Watermark};
pub use config::IngestConfig;
pub use decoder::{decode, DecodeFailure, NormalizedEvent};
pub use loader::{run_once, IngestError, IngestLoader, RecordOutcome};
pub use sink::{EventSink, InsertOutcome, PgSink, SinkError};
pub use summary::IngestSummary;
