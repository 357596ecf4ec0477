use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Credits charged for a first download.
pub const DEFAULT_DOWNLOAD_COST: u64 = 5;
/// Credits granted for a successful upload.
pub const DEFAULT_CREDIT_REWARD: u64 = 10;

/// Service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
    /// Credits charged the first time a user downloads a file.
    pub download_cost: u64,
    /// Credits granted to the uploader.
    pub credit_reward: u64,
    /// Balance of a newly created user.
    pub initial_credits: u64,
    /// Largest accepted upload, in bytes.
    pub max_upload_bytes: u64,
    /// Size of the pieces handed to the blob writer.
    pub chunk_size: usize,
    /// Bound on blob open, write and finish calls.
    pub io_timeout_ms: u64,
    /// Bound on acquiring record locks.
    pub lock_timeout_ms: u64,
    /// Root for on-disk state. In-memory backends when unset.
    pub data_dir: Option<PathBuf>,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            download_cost: DEFAULT_DOWNLOAD_COST,
            credit_reward: DEFAULT_CREDIT_REWARD,
            initial_credits: 0,
            max_upload_bytes: 100 * 1024 * 1024,
            chunk_size: 64 * 1024,
            io_timeout_ms: 30_000,
            lock_timeout_ms: 5_000,
            data_dir: None,
        }
    }
}

impl ShareConfig {
    /// Loads a `.toml` or `.json` file; absent keys take their defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: ShareConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the service can't run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size must be positive");
        }
        if self.io_timeout_ms == 0 {
            anyhow::bail!("io_timeout_ms must be positive");
        }
        if self.lock_timeout_ms == 0 {
            anyhow::bail!("lock_timeout_ms must be positive");
        }
        if i64::try_from(self.download_cost).is_err()
            || i64::try_from(self.credit_reward).is_err()
            || i64::try_from(self.initial_credits).is_err()
        {
            anyhow::bail!("credit amounts must fit in a signed 64-bit integer");
        }
        Ok(())
    }

    /// Bound on blob calls.
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Bound on lock acquisition.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
