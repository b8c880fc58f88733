//! Configuration management for sitesieve
//!
//! Settings are layered with figment (see [`core::SieveConfig`]) and extracted
//! into the typed [`Settings`] tree below.

pub mod core;
pub mod smart_load;

pub use core::SieveConfig;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Typed view of the merged configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub stats: StatsConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

/// Filter run behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of progress buckets per run
    pub progress_buckets: usize,

    /// Warnings retained per run
    pub warning_limit: usize,
}

/// External statistics script execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Interpreter name or path (resolved on PATH)
    pub interpreter: String,

    /// Poll interval while waiting for the script (milliseconds)
    pub poll_interval_ms: u64,
}

/// Observer-side handling of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct OutputConfig {
    /// Discard lists that completed empty
    #[serde(default)]
    pub drop_empty: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            progress_buckets: 100,
            warning_limit: 5000,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            interpreter: "Rscript".to_string(),
            poll_interval_ms: 50,
        }
    }
}

impl Settings {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.progress_buckets == 0 {
            anyhow::bail!("pipeline.progress_buckets cannot be 0");
        }

        if self.stats.poll_interval_ms == 0 {
            anyhow::bail!("stats.poll_interval_ms cannot be 0");
        }
        if self.stats.interpreter.trim().is_empty() {
            anyhow::bail!("stats.interpreter cannot be empty");
        }

        Ok(())
    }
}
