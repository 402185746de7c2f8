use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PullError, PullResult};

/// How the puller treats chunks the sink already has.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PruneMode {
    /// A present chunk implies its whole subgraph is present; skip it.
    #[default]
    HasImpliesClosure,
    /// Read present chunks from the sink and keep walking their refs,
    /// transferring only what is actually missing.
    Verify,
}

/// Puller settings. Every field has a default, so a TOML file only needs
/// the keys it changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullerConfig {
    /// Directory for staging packs.
    pub tmp_dir: PathBuf,
    /// A staging pack is sealed once its uncompressed bytes reach this.
    pub batch_size_limit: u64,
    /// Addresses per `has_many` / `get_many` round trip.
    pub fetch_batch_size: usize,
    /// Fetch batches in flight at once.
    pub concurrency: usize,
    pub max_fetch_retries: u32,
    /// Backoff before retry `n` is `n * retry_backoff_ms`.
    pub retry_backoff_ms: u64,
    pub stats_interval_ms: u64,
    pub prune_mode: PruneMode,
}

impl Default for PullerConfig {
    fn default() -> Self {
        Self {
            tmp_dir: std::env::temp_dir(),
            batch_size_limit: 1024 * 1024,
            fetch_batch_size: 256,
            concurrency: 4,
            max_fetch_retries: 3,
            retry_backoff_ms: 50,
            stats_interval_ms: 100,
            prune_mode: PruneMode::default(),
        }
    }
}

impl PullerConfig {
    /// Defaults with staging under `tmp_dir`.
    pub fn with_tmp_dir(tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            tmp_dir: tmp_dir.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> PullResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| PullError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> PullResult<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> PullResult<()> {
        if self.fetch_batch_size == 0 {
            return Err(PullError::Config("fetch_batch_size must be positive".into()));
        }
        if self.concurrency == 0 {
            return Err(PullError::Config("concurrency must be positive".into()));
        }
        if self.stats_interval_ms == 0 {
            return Err(PullError::Config("stats_interval_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempt)))
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}
