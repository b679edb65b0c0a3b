//! Engine configuration
//!
//! All knobs of the compaction engine live in one value constructed at
//! startup. Fields deserialize from config files with sensible defaults, so
//! a bare `[compaction]` section (or none at all) yields the stock tuning.

use serde::Deserialize;
use thiserror::Error;

/// Configuration for the compaction engine
#[derive(Debug, Clone, Deserialize)]
pub struct CompactionConfig {
    /// Whether the background flush worker runs. When false, the pure merge
    /// surface still works but nothing is ever written back.
    #[serde(default = "default_enable_compactions")]
    pub enable_compactions: bool,

    /// How many bytes encode a metric id at the front of a row key
    #[serde(default = "default_metric_width")]
    pub metric_width: u16,

    /// How often the flush worker wakes up, in seconds
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,

    /// Queue size below which the worker goes back to sleep; also the floor
    /// of every batch
    #[serde(default = "default_min_flush_threshold")]
    pub min_flush_threshold: usize,

    /// Maximum number of rows compacted concurrently
    #[serde(default = "default_max_concurrent_flushes")]
    pub max_concurrent_flushes: usize,

    /// Multiplier on the adaptive flush rate: with 2, an hour of backlog
    /// drains in half an hour
    #[serde(default = "default_flush_speed")]
    pub flush_speed: u64,

    /// Duration of one row, in seconds (rows older than this get compacted)
    #[serde(default = "default_max_timespan")]
    pub max_timespan_secs: u64,

    /// Modulus of the randomized claim skip that spreads contention between
    /// concurrent claimers. 0 disables the skip; 1 would skip everything
    /// and is rejected.
    #[serde(default = "default_claim_jitter_modulus")]
    pub claim_jitter_modulus: u64,
}

fn default_enable_compactions() -> bool {
    true
}

fn default_metric_width() -> u16 {
    3
}

fn default_flush_interval() -> u64 {
    10
}

fn default_min_flush_threshold() -> usize {
    100
}

fn default_max_concurrent_flushes() -> usize {
    10_000
}

fn default_flush_speed() -> u64 {
    2
}

fn default_max_timespan() -> u64 {
    3600
}

fn default_claim_jitter_modulus() -> u64 {
    3
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enable_compactions: default_enable_compactions(),
            metric_width: default_metric_width(),
            flush_interval_secs: default_flush_interval(),
            min_flush_threshold: default_min_flush_threshold(),
            max_concurrent_flushes: default_max_concurrent_flushes(),
            flush_speed: default_flush_speed(),
            max_timespan_secs: default_max_timespan(),
            claim_jitter_modulus: default_claim_jitter_modulus(),
        }
    }
}

impl CompactionConfig {
    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.metric_width == 0 {
            return Err(ConfigError::Invalid(
                "metric_width must be at least 1".to_string(),
            ));
        }
        if self.flush_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "flush_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.flush_speed == 0 {
            return Err(ConfigError::Invalid(
                "flush_speed must be at least 1".to_string(),
            ));
        }
        if self.max_timespan_secs == 0 {
            return Err(ConfigError::Invalid(
                "max_timespan_secs must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_flushes == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_flushes must be at least 1".to_string(),
            ));
        }
        if self.claim_jitter_modulus == 1 {
            return Err(ConfigError::Invalid(
                "claim_jitter_modulus of 1 would skip every key; use 0 to disable".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
