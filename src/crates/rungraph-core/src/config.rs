//! Engine configuration
//!
//! One immutable [`EngineConfig`] is built at startup (defaults, then a TOML
//! file) and handed to the [`RunCoordinator`](crate::RunCoordinator) as an
//! `Arc`. Nothing reads configuration from globals.
//!
//! ```toml
//! [execution]
//! max_supersteps = 25
//! input_channel = "input"
//!
//! [checkpoint]
//! backend = "file"
//! path = ".rungraph/checkpoints"
//!
//! [memory]
//! backend = "file"
//! path = ".rungraph/memory"
//!
//! [logging]
//! level = "info"
//! format = "compact"
//! ```

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EngineConfig {
    /// Execution limits and defaults
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Checkpoint backend selection
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Long-term memory store selection
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Execution configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionConfig {
    /// Maximum supersteps per run; exceeding it fails the run
    #[serde(default = "default_max_supersteps")]
    pub max_supersteps: usize,

    /// Channel receiving non-object run input
    #[serde(default = "default_input_channel")]
    pub input_channel: String,
}

fn default_max_supersteps() -> usize {
    25
}

fn default_input_channel() -> String {
    "input".to_string()
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_supersteps: default_max_supersteps(),
            input_channel: default_input_channel(),
        }
    }
}

/// Checkpoint backend kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    #[default]
    Memory,
    File,
}

/// Checkpoint storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointConfig {
    #[serde(default)]
    pub backend: CheckpointBackend,

    /// Root directory of the file backend
    #[serde(default = "default_checkpoint_path")]
    pub path: PathBuf,
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from(".rungraph/checkpoints")
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            backend: CheckpointBackend::default(),
            path: default_checkpoint_path(),
        }
    }
}

/// Memory store backend kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBackend {
    #[default]
    Memory,
    File,
}

/// Memory store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryConfig {
    #[serde(default)]
    pub backend: MemoryBackend,

    /// Root directory of the file backend
    #[serde(default = "default_memory_path")]
    pub path: PathBuf,
}

fn default_memory_path() -> PathBuf {
    PathBuf::from(".rungraph/memory")
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: MemoryBackend::default(),
            path: default_memory_path(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document. Missing sections take defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)
            .map_err(|e| GraphError::Configuration(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading engine config");

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            GraphError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;

        info!(
            path = %path.display(),
            max_supersteps = config.execution.max_supersteps,
            backend = ?config.checkpoint.backend,
            memory = ?config.memory.backend,
            "Loaded engine config"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.execution.max_supersteps == 0 {
            return Err(GraphError::Configuration(
                "execution.max_supersteps must be greater than 0".to_string(),
            ));
        }
        if self.execution.input_channel.is_empty() {
            return Err(GraphError::Configuration(
                "execution.input_channel must not be empty".to_string(),
            ));
        }
        if self.checkpoint.backend == CheckpointBackend::File
            && self.checkpoint.path.as_os_str().is_empty()
        {
            return Err(GraphError::Configuration(
                "checkpoint.path is required for the file backend".to_string(),
            ));
        }
        if self.memory.backend == MemoryBackend::File && self.memory.path.as_os_str().is_empty() {
            return Err(GraphError::Configuration(
                "memory.path is required for the file backend".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_max_supersteps(mut self, max_supersteps: usize) -> Self {
        self.execution.max_supersteps = max_supersteps;
        self
    }
}
