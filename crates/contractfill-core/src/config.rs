//! Filler configuration, logging setup and the fluent config builder.
//!
//! # Example
//!
//! ```rust
//! use contractfill_core::config::FillerBuilder;
//! use serde_json::json;
//!
//! let config = FillerBuilder::new()
//!     .reader("atomic-1")
//!     .start_block(1_000)
//!     .contract("atomicassets", json!({ "atomicassets_account": "atomicassets" }))
//!     .build_config();
//! assert_eq!(config.contracts.len(), 1);
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::FillerError;
use crate::transaction::DEFAULT_INSERT_CHUNK_SIZE;

// ─── Logging ──────────────────────────────────────────────────────────────────

/// Log level per component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: component_name → level
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// `EnvFilter` directives, e.g. `"info,contractfill_core=debug"`.
    pub fn directives(&self) -> String {
        let mut components: Vec<_> = self.components.iter().collect();
        components.sort();
        let mut directives = self.level.clone();
        for (component, level) in components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// Install the global tracing subscriber. Call once at startup.
pub fn init_tracing(config: &LogConfig) -> Result<(), FillerError> {
    let filter = EnvFilter::try_new(config.directives())
        .map_err(|e| FillerError::Configuration(format!("invalid log directives: {e}")))?;

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()
    };
    installed.map_err(|e| FillerError::Configuration(format!("tracing already initialised: {e}")))
}

// ─── FillerConfig ─────────────────────────────────────────────────────────────

/// One contract module to run: handler name plus its construction arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractConfig {
    pub handler: String,
    #[serde(default)]
    pub args: Value,
}

/// Configuration of one filler (reader) instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillerConfig {
    /// Reader name; keys the checkpoint and reversible-block bookkeeping.
    #[serde(default = "default_reader")]
    pub reader: String,
    /// First block to process when no checkpoint exists.
    #[serde(default)]
    pub start_block: u64,
    /// Stop after this block. `None` = run until the source ends.
    #[serde(default)]
    pub stop_block: Option<u64>,
    /// Rows per insert statement.
    #[serde(default = "default_insert_chunk_size")]
    pub insert_chunk_size: usize,
    /// Incomplete-row count above which `init` keeps reconciling.
    #[serde(default = "default_reconcile_threshold")]
    pub reconcile_threshold: u64,
    /// Job queue tick (milliseconds).
    #[serde(default = "default_job_tick_ms")]
    pub job_tick_ms: u64,
    /// Attempts per block for retryable failures.
    #[serde(default = "default_max_block_retries")]
    pub max_block_retries: u32,
    /// Base backoff between block retries (milliseconds), doubled per attempt
    /// up to one minute.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Capacity of the notification broadcast channel.
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
    /// Wipe every configured contract's rows at startup.
    #[serde(default)]
    pub delete_data: bool,
    /// Recreate views and procedures at startup.
    #[serde(default)]
    pub upgrade: bool,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub contracts: Vec<ContractConfig>,
}

fn default_reader() -> String {
    "default".into()
}
fn default_insert_chunk_size() -> usize {
    DEFAULT_INSERT_CHUNK_SIZE
}
fn default_reconcile_threshold() -> u64 {
    50_000
}
fn default_job_tick_ms() -> u64 {
    1_000
}
fn default_max_block_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_notification_capacity() -> usize {
    1_024
}

impl Default for FillerConfig {
    fn default() -> Self {
        Self {
            reader: default_reader(),
            start_block: 0,
            stop_block: None,
            insert_chunk_size: default_insert_chunk_size(),
            reconcile_threshold: default_reconcile_threshold(),
            job_tick_ms: default_job_tick_ms(),
            max_block_retries: default_max_block_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            notification_capacity: default_notification_capacity(),
            delete_data: false,
            upgrade: false,
            log: LogConfig::default(),
            contracts: Vec::new(),
        }
    }
}

impl FillerConfig {
    pub fn from_json(json: &str) -> Result<Self, FillerError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FillerError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            FillerError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), FillerError> {
        if self.reader.trim().is_empty() {
            return Err(FillerError::Configuration("reader name is empty".into()));
        }
        if self.insert_chunk_size == 0 {
            return Err(FillerError::Configuration(
                "insert_chunk_size must be at least 1".into(),
            ));
        }
        if self.max_block_retries == 0 {
            return Err(FillerError::Configuration(
                "max_block_retries must be at least 1".into(),
            ));
        }
        if let Some(stop) = self.stop_block {
            if stop < self.start_block {
                return Err(FillerError::Configuration(format!(
                    "stop_block {stop} is before start_block {}",
                    self.start_block
                )));
            }
        }
        Ok(())
    }
}

// ─── FillerBuilder ────────────────────────────────────────────────────────────

/// Fluent builder for [`FillerConfig`].
#[derive(Default)]
pub struct FillerBuilder {
    config: FillerConfig,
}

impl FillerBuilder {
    pub fn new() -> Self {
        Self {
            config: FillerConfig::default(),
        }
    }

    pub fn reader(mut self, name: impl Into<String>) -> Self {
        self.config.reader = name.into();
        self
    }

    pub fn start_block(mut self, block: u64) -> Self {
        self.config.start_block = block;
        self
    }

    pub fn stop_block(mut self, block: u64) -> Self {
        self.config.stop_block = Some(block);
        self
    }

    pub fn insert_chunk_size(mut self, size: usize) -> Self {
        self.config.insert_chunk_size = size;
        self
    }

    pub fn reconcile_threshold(mut self, threshold: u64) -> Self {
        self.config.reconcile_threshold = threshold;
        self
    }

    pub fn job_tick_ms(mut self, ms: u64) -> Self {
        self.config.job_tick_ms = ms;
        self
    }

    /// Retry policy for retryable block failures.
    pub fn retries(mut self, max_block_retries: u32, retry_backoff_ms: u64) -> Self {
        self.config.max_block_retries = max_block_retries;
        self.config.retry_backoff_ms = retry_backoff_ms;
        self
    }

    pub fn notification_capacity(mut self, capacity: usize) -> Self {
        self.config.notification_capacity = capacity;
        self
    }

    pub fn delete_data(mut self, yes: bool) -> Self {
        self.config.delete_data = yes;
        self
    }

    pub fn upgrade(mut self, yes: bool) -> Self {
        self.config.upgrade = yes;
        self
    }

    pub fn log(mut self, log: LogConfig) -> Self {
        self.config.log = log;
        self
    }

    /// Add a contract module.
    pub fn contract(mut self, handler: impl Into<String>, args: Value) -> Self {
        self.config.contracts.push(ContractConfig {
            handler: handler.into(),
            args,
        });
        self
    }

    pub fn build_config(self) -> FillerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_defaults() {
        let cfg = FillerConfig::from_json(r#"{ "reader": "r1" }"#).unwrap();
        assert_eq!(cfg.reader, "r1");
        assert_eq!(cfg.insert_chunk_size, 50);
        assert_eq!(cfg.reconcile_threshold, 50_000);
        assert_eq!(cfg.log.level, "info");
        assert!(cfg.contracts.is_empty());
    }

    #[test]
    fn json_contracts() {
        let cfg = FillerConfig::from_json(
            r#"{
                "reader": "atomic",
                "start_block": 10,
                "contracts": [
                    { "handler": "atomicassets", "args": { "atomicassets_account": "atomicassets" } }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.contracts[0].handler, "atomicassets");
        assert_eq!(cfg.contracts[0].args["atomicassets_account"], "atomicassets");
    }

    #[test]
    fn validation() {
        assert!(FillerConfig::from_json(r#"{ "reader": "" }"#).is_err());
        assert!(FillerConfig::from_json(r#"{ "insert_chunk_size": 0 }"#).is_err());
        assert!(FillerConfig::from_json(r#"{ "start_block": 10, "stop_block": 5 }"#).is_err());
    }

    #[test]
    fn builder() {
        let cfg = FillerBuilder::new()
            .reader("r")
            .start_block(5)
            .stop_block(9)
            .insert_chunk_size(10)
            .retries(5, 10)
            .upgrade(true)
            .contract("atomicassets", json!({ "atomicassets_account": "x" }))
            .build_config();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.stop_block, Some(9));
        assert_eq!(cfg.max_block_retries, 5);
        assert!(cfg.upgrade);
    }

    #[test]
    fn log_directives() {
        let mut log = LogConfig::default();
        log.components.insert("contractfill-core".into(), "debug".into());
        assert_eq!(log.directives(), "info,contractfill_core=debug");
    }
}
