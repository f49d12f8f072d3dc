//! Durable watermark storage
//!
//! The watermark is the highest event time known to be stored as of the last
//! completed run. It only prunes work: losing or corrupting it makes the next
//! run rescan the whole source, and the sink's fingerprint index turns that
//! rescan into duplicates rather than double inserts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::decoder::parse_timestamp;

/// Highest event time captured by a completed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark(DateTime<Utc>);

impl Watermark {
    /// "Nothing ingested yet": every record is newer than this.
    pub const MIN: Watermark = Watermark(DateTime::<Utc>::MIN_UTC);

    pub fn new(at: DateTime<Utc>) -> Self {
        Self(at)
    }

    pub fn at(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn is_min(&self) -> bool {
        *self == Self::MIN
    }

    /// Whether an event at `event_time` still needs to reach the sink.
    ///
    /// Events at exactly the watermark instant are admitted: several alerts
    /// can share a timestamp, and the fingerprint index absorbs the repeats.
    pub fn admits(&self, event_time: DateTime<Utc>) -> bool {
        event_time >= self.0
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::MIN
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_min() {
            f.write_str("none")
        } else {
            f.write_str(&self.0.to_rfc3339())
        }
    }
}

/// Serialized as an RFC 3339 string, or `null` for [`Watermark::MIN`]
impl Serialize for Watermark {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.is_min() {
            serializer.serialize_none()
        } else {
            serializer.serialize_str(&self.0.to_rfc3339())
        }
    }
}

/// Failure to persist the watermark.
///
/// Never a data-loss condition, but the next run will redo work, so callers
/// must surface it instead of dropping it.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to write checkpoint {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A single durable watermark value
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Read the stored watermark. Absent or unreadable state yields
    /// [`Watermark::MIN`]; this never fails.
    async fn load(&self) -> Watermark;

    /// Durably replace the stored watermark
    async fn save(&self, watermark: Watermark) -> Result<(), CheckpointError>;
}

/// Watermark kept as RFC 3339 text in a small file
#[derive(Debug, Clone)]
pub struct FileCheckpoint {
    path: PathBuf,
}

impl FileCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "checkpoint".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn write_atomically(&self, contents: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let staging = self.staging_path();
        let mut file = tokio::fs::File::create(&staging).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&staging, &self.path).await
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpoint {
    async fn load(&self) -> Watermark {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No checkpoint yet, starting from the beginning");
                return Watermark::MIN;
            },
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Checkpoint unreadable, rescanning source");
                return Watermark::MIN;
            },
        };

        let raw = raw.trim();
        if raw.is_empty() {
            return Watermark::MIN;
        }

        match parse_timestamp(raw) {
            Some(at) => Watermark::new(at),
            None => {
                tracing::warn!(path = %self.path.display(), contents = raw, "Checkpoint corrupt, rescanning source");
                Watermark::MIN
            },
        }
    }

    async fn save(&self, watermark: Watermark) -> Result<(), CheckpointError> {
        self.write_atomically(&watermark.at().to_rfc3339())
            .await
            .map_err(|source| CheckpointError::Write {
                path: self.path.clone(),
                source,
            })?;

        tracing::debug!(path = %self.path.display(), %watermark, "Checkpoint saved");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(secs: i64, nanos: u32) -> Watermark {
        Watermark::new(Utc.timestamp_opt(secs, nanos).unwrap())
    }

    #[tokio::test]
    async fn test_missing_file_loads_min() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpoint::new(dir.path().join("absent.txt"));
        assert_eq!(store.load().await, Watermark::MIN);
    }

    #[tokio::test]
    async fn test_save_creates_parent_dirs_and_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpoint::new(dir.path().join("state/nested/last_ts.txt"));

        let mark = at(1_704_067_200, 123_456_789);
        store.save(mark).await.unwrap();

        assert_eq!(store.load().await, mark);
        assert!(!store.staging_path().exists());
    }

    #[tokio::test]
    async fn test_save_overwrites_previous_value() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpoint::new(dir.path().join("last_ts.txt"));

        store.save(at(100, 0)).await.unwrap();
        store.save(at(200, 0)).await.unwrap();
        assert_eq!(store.load().await, at(200, 0));
    }

    #[tokio::test]
    async fn test_corrupt_or_empty_file_loads_min() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("last_ts.txt");
        let store = FileCheckpoint::new(&path);

        std::fs::write(&path, "definitely not a timestamp").unwrap();
        assert_eq!(store.load().await, Watermark::MIN);

        std::fs::write(&path, "  \n").unwrap();
        assert_eq!(store.load().await, Watermark::MIN);
    }

    #[tokio::test]
    async fn test_naive_checkpoint_text_is_utc() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("last_ts.txt");
        std::fs::write(&path, "2024-01-01 00:00:00\n").unwrap();

        let loaded = FileCheckpoint::new(&path).load().await;
        assert_eq!(loaded, at(1_704_067_200, 0));
    }

    #[tokio::test]
    async fn test_save_failure_is_reported_with_path() {
        let dir = TempDir::new().unwrap();
        // a regular file where a directory is needed
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let store = FileCheckpoint::new(blocker.join("last_ts.txt"));

        let err = store.save(at(1, 0)).await.unwrap_err();
        let CheckpointError::Write { path, .. } = err;
        assert_eq!(path, blocker.join("last_ts.txt"));
    }

    #[test]
    fn test_watermark_ordering_and_admission() {
        assert!(Watermark::MIN < at(0, 0));
        assert!(at(10, 0).admits(at(11, 0).at()));
        assert!(at(10, 0).admits(at(10, 0).at()));
        assert!(!at(10, 0).admits(at(9, 999_999_999).at()));
        assert!(Watermark::default().is_min());
    }

    #[test]
    fn test_watermark_serializes_min_as_null() {
        assert_eq!(serde_json::to_value(Watermark::MIN).unwrap(), serde_json::Value::Null);
        assert_eq!(
            serde_json::to_value(at(1_704_067_200, 0)).unwrap(),
            serde_json::json!("2024-01-01T00:00:00+00:00")
        );
    }
}
