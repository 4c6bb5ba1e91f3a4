use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const ENV_BATCH_INTERVAL_MS: &str = "UI_RELAY_BATCH_INTERVAL_MS";
pub const ENV_MAX_BATCH_SIZE: &str = "UI_RELAY_MAX_BATCH_SIZE";
pub const ENV_HIGH_PRIORITY_DELAY_MS: &str = "UI_RELAY_HIGH_PRIORITY_DELAY_MS";
pub const ENV_BACKGROUND_INTERVAL_MS: &str = "UI_RELAY_BACKGROUND_INTERVAL_MS";
pub const ENV_WORKSPACE_FILTERING: &str = "UI_RELAY_WORKSPACE_FILTERING";
pub const ENV_STREAM_FLUSH_MS: &str = "UI_RELAY_STREAM_FLUSH_MS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Producer side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatcherConfig {
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_high_priority_max_delay_ms")]
    pub high_priority_max_delay_ms: u64,
    #[serde(default = "default_background_interval_ms")]
    pub background_interval_ms: u64,
    #[serde(default = "default_true")]
    pub workspace_filtering: bool,
    /// Reserved. Payloads are always sent uncompressed.
    #[serde(default)]
    pub compression: bool,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_interval_ms: default_batch_interval_ms(),
            max_batch_size: default_max_batch_size(),
            high_priority_max_delay_ms: default_high_priority_max_delay_ms(),
            background_interval_ms: default_background_interval_ms(),
            workspace_filtering: true,
            compression: false,
        }
    }
}

impl BatcherConfig {
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn high_priority_max_delay(&self) -> Duration {
        Duration::from_millis(self.high_priority_max_delay_ms)
    }

    pub fn background_interval(&self) -> Duration {
        Duration::from_millis(self.background_interval_ms)
    }
}

// ---------------------------------------------------------------------------
// Consumer side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_stream_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_max_buffer_chars")]
    pub max_buffer_chars: usize,
    #[serde(default = "default_terminal_flush_interval_ms")]
    pub terminal_flush_interval_ms: u64,
    #[serde(default = "default_terminal_max_bytes")]
    pub terminal_max_bytes: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_stream_flush_interval_ms(),
            max_buffer_chars: default_max_buffer_chars(),
            terminal_flush_interval_ms: default_terminal_flush_interval_ms(),
            terminal_max_bytes: default_terminal_max_bytes(),
        }
    }
}

impl StreamConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn terminal_flush_interval(&self) -> Duration {
        Duration::from_millis(self.terminal_flush_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_micro_batch_interval_ms")]
    pub micro_batch_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            micro_batch_interval_ms: default_micro_batch_interval_ms(),
        }
    }
}

impl StoreConfig {
    pub fn micro_batch_interval(&self) -> Duration {
        Duration::from_millis(self.micro_batch_interval_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub batcher: BatcherConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl PipelineConfig {
    /// Defaults, then the JSON file at `path` if given, then environment
    /// overrides (a `.env` file is honored).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_BATCH_INTERVAL_MS) {
            self.batcher.batch_interval_ms = parse_number(ENV_BATCH_INTERVAL_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_BATCH_SIZE) {
            self.batcher.max_batch_size = parse_number(ENV_MAX_BATCH_SIZE, &value)?;
        }
        if let Some(value) = lookup(ENV_HIGH_PRIORITY_DELAY_MS) {
            self.batcher.high_priority_max_delay_ms = parse_number(ENV_HIGH_PRIORITY_DELAY_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_BACKGROUND_INTERVAL_MS) {
            self.batcher.background_interval_ms = parse_number(ENV_BACKGROUND_INTERVAL_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_WORKSPACE_FILTERING) {
            self.batcher.workspace_filtering = parse_flag(ENV_WORKSPACE_FILTERING, &value)?;
        }
        if let Some(value) = lookup(ENV_STREAM_FLUSH_MS) {
            self.stream.flush_interval_ms = parse_number(ENV_STREAM_FLUSH_MS, &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("batcher.batch_interval_ms", self.batcher.batch_interval_ms),
            ("batcher.high_priority_max_delay_ms", self.batcher.high_priority_max_delay_ms),
            ("batcher.background_interval_ms", self.batcher.background_interval_ms),
            ("stream.flush_interval_ms", self.stream.flush_interval_ms),
            ("stream.terminal_flush_interval_ms", self.stream.terminal_flush_interval_ms),
            ("store.micro_batch_interval_ms", self.store.micro_batch_interval_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }
        if self.batcher.max_batch_size == 0 {
            return Err(ConfigError::Invalid("batcher.max_batch_size must be greater than zero".into()));
        }
        if self.stream.max_buffer_chars == 0 || self.stream.terminal_max_bytes == 0 {
            return Err(ConfigError::Invalid("stream buffer caps must be greater than zero".into()));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key} must be a non-negative integer, got '{value}'")))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid(format!("{key} must be a boolean, got '{value}'"))),
    }
}

fn default_batch_interval_ms() -> u64 {
    16
}

fn default_max_batch_size() -> usize {
    50
}

fn default_high_priority_max_delay_ms() -> u64 {
    8
}

fn default_background_interval_ms() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

fn default_stream_flush_interval_ms() -> u64 {
    32
}

fn default_max_buffer_chars() -> usize {
    4096
}

fn default_terminal_flush_interval_ms() -> u64 {
    16
}

fn default_terminal_max_bytes() -> usize {
    64 * 1024
}

fn default_micro_batch_interval_ms() -> u64 {
    16
}
