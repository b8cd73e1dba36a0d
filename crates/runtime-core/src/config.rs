//! Runtime configuration types

use crate::{Error, Result, RunLimit, WorkerId};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Iteration control settings
    pub iteration: IterationConfig,

    /// Worker settings
    pub worker: WorkerConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    /// Parse a JSON configuration, filling missing fields with defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: RuntimeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&contents)?;
        tracing::debug!(path = %path.display(), "Loaded runtime configuration");
        Ok(config)
    }

    /// Check that all settings are usable
    pub fn validate(&self) -> Result<()> {
        self.iteration.validate()?;
        self.worker.validate()
    }
}

/// Iteration control configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IterationConfig {
    /// Samples per batch
    pub batch_size: u64,

    /// Interrupt for a checkpoint every N global steps (0 disables)
    pub checkpoint_interval: u64,

    /// Batches this run may consume (negative for unbounded)
    pub steps_to_run: i64,
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            checkpoint_interval: 0,
            steps_to_run: -1,
        }
    }
}

impl IterationConfig {
    /// The run bound described by `steps_to_run`
    pub fn run_limit(&self) -> RunLimit {
        RunLimit::from_steps(self.steps_to_run)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig {
                message: "batch_size must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker identifier (auto-generated if not set)
    pub worker_id: Option<WorkerId>,

    /// Batches fetched ahead by a prefetching source
    pub prefetch_buffer_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: None,
            prefetch_buffer_size: 16,
        }
    }
}

impl WorkerConfig {
    /// Configured worker id, or a fresh one
    pub fn resolve_worker_id(&self) -> WorkerId {
        self.worker_id
            .clone()
            .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.prefetch_buffer_size == 0 {
            return Err(Error::InvalidConfig {
                message: "prefetch_buffer_size must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directives used when RUST_LOG is not set
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "data_loader=info,runtime_core=info".to_string(),
        }
    }
}
