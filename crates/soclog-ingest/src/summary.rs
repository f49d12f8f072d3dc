//! Per-run counters

use serde::Serialize;
use std::fmt;

use crate::checkpoint::Watermark;
use crate::loader::RecordOutcome;

/// Outcome of one ingestion run.
///
/// Every scanned line lands in exactly one counter, so
/// `scanned == inserted + skipped_* + rejected + failed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    /// Non-blank lines read from the source
    pub scanned: u64,
    pub inserted: u64,
    /// At or before the loaded watermark
    pub skipped_old: u64,
    /// Fingerprint already present in the sink
    pub skipped_duplicate: u64,
    pub skipped_unparsable: u64,
    pub skipped_no_timestamp: u64,
    /// Refused by the sink for a reason retrying will not fix
    pub rejected: u64,
    /// Transient sink failure; retried on the next run
    pub failed: u64,
    pub watermark_before: Watermark,
    pub watermark_after: Watermark,
    pub checkpoint_written: bool,
    pub duration_ms: u64,
}

impl IngestSummary {
    pub fn starting_from(watermark: Watermark) -> Self {
        Self {
            watermark_before: watermark,
            watermark_after: watermark,
            ..Default::default()
        }
    }

    /// Count one scanned line
    pub fn record(&mut self, outcome: &RecordOutcome) {
        self.scanned += 1;
        match outcome {
            RecordOutcome::Inserted(_) => self.inserted += 1,
            RecordOutcome::Duplicate(_) => self.skipped_duplicate += 1,
            RecordOutcome::TooOld => self.skipped_old += 1,
            RecordOutcome::Unparsable => self.skipped_unparsable += 1,
            RecordOutcome::NoTimestamp => self.skipped_no_timestamp += 1,
            RecordOutcome::Rejected => self.rejected += 1,
            RecordOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn skipped(&self) -> u64 {
        self.skipped_old + self.skipped_duplicate + self.skipped_unparsable + self.skipped_no_timestamp
    }

    /// Whether some lines were left for a later run to retry
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

impl fmt::Display for IngestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scanned={} inserted={} old={} duplicate={} unparsable={} no_timestamp={} rejected={} failed={} watermark={}",
            self.scanned,
            self.inserted,
            self.skipped_old,
            self.skipped_duplicate,
            self.skipped_unparsable,
            self.skipped_no_timestamp,
            self.rejected,
            self.failed,
            self.watermark_after,
        )
    }
}
