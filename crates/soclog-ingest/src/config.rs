//! Run configuration

use std::path::PathBuf;

use crate::db::DbConfig;

/// Alert log written by the upstream collector.
pub const DEFAULT_SOURCE_PATH: &str = "/var/ossec/logs/alerts/alerts.json";

/// Where the watermark lives between runs.
pub const DEFAULT_CHECKPOINT_PATH: &str = "/opt/soc_etl/last_ts.txt";

/// Everything one ingestion run needs
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub source_path: PathBuf,
    pub checkpoint_path: PathBuf,
    pub database: DbConfig,
}

impl IngestConfig {
    /// Load from `SOCLOG_SOURCE`, `SOCLOG_CHECKPOINT` and the database variables
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            source_path: std::env::var("SOCLOG_SOURCE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_SOURCE_PATH)),
            checkpoint_path: std::env::var("SOCLOG_CHECKPOINT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CHECKPOINT_PATH)),
            database: DbConfig::from_env()?,
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.source_path.as_os_str().is_empty() {
            anyhow::bail!("Source path cannot be empty");
        }

        if self.checkpoint_path.as_os_str().is_empty() {
            anyhow::bail!("Checkpoint path cannot be empty");
        }

        if self.checkpoint_path.is_dir() {
            anyhow::bail!(
                "Checkpoint path {} is a directory, expected a file",
                self.checkpoint_path.display()
            );
        }

        if self.source_path == self.checkpoint_path {
            anyhow::bail!("Source and checkpoint paths must differ");
        }

        self.database.validate()?;

        Ok(())
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source_path: PathBuf::from(DEFAULT_SOURCE_PATH),
            checkpoint_path: PathBuf::from(DEFAULT_CHECKPOINT_PATH),
            database: DbConfig::default(),
        }
    }
}
