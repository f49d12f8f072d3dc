//! SOCLOG Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types and utilities for the SOCLOG workspace.
//!
//! - **Error Handling**: [`SoclogError`] and the [`Result`] alias
//! - **Fingerprints**: content digests used as the dedup key for ingested lines
//! - **Logging**: `tracing` subscriber setup shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use soclog_common::fingerprint::Fingerprint;
//! use soclog_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> soclog_common::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!
//!     let fp = Fingerprint::of(r#"{"rule":{"id":"5715"}}"#);
//!     tracing::info!(fingerprint = %fp, "computed");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod fingerprint;
pub mod logging;

pub use error::{Result, SoclogError};
pub use fingerprint::Fingerprint;
