//! Broker configuration
//!
//! Loaded once at startup from a camelCase JSON document:
//!
//! ```json
//! {
//!   "workerPoolSize": 8,
//!   "pathRules": "Windows required, UNIX required",
//!   "managedRepositoryRoot": "/data/repo",
//!   "bus": { "url": "nats://127.0.0.1:4222", "queueGroup": "backbone" }
//! }
//! ```

use crate::error::{BackboneError, Result};
use crate::executor::default_worker_pool_size;
use crate::policy::DEFAULT_PATH_RULES;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Broker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackboneConfig {
    /// Worker pool size (default: 2 x available parallelism)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_pool_size: Option<usize>,

    /// Comma-separated path rule set names
    #[serde(default = "default_path_rules")]
    pub path_rules: String,

    /// Absolute directory no managed file path may leave
    pub managed_repository_root: PathBuf,

    /// Event-bus binding
    #[serde(default)]
    pub bus: NatsConfig,
}

fn default_path_rules() -> String {
    DEFAULT_PATH_RULES.to_string()
}

impl BackboneConfig {
    /// Configuration with defaults for everything but the managed root
    pub fn new(managed_repository_root: impl Into<PathBuf>) -> Self {
        Self {
            worker_pool_size: None,
            path_rules: default_path_rules(),
            managed_repository_root: managed_repository_root.into(),
            bus: NatsConfig::default(),
        }
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BackboneError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: BackboneConfig = serde_json::from_str(&content).map_err(|e| {
            BackboneError::Config(format!("Invalid config file {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Effective worker pool size
    pub fn worker_pool_size(&self) -> usize {
        self.worker_pool_size.unwrap_or_else(default_worker_pool_size)
    }

    /// Check values that can be judged without touching the filesystem
    pub fn validate(&self) -> Result<()> {
        if self.worker_pool_size == Some(0) {
            return Err(BackboneError::Config(
                "workerPoolSize must be at least 1".to_string(),
            ));
        }
        if self.managed_repository_root.as_os_str().is_empty() {
            return Err(BackboneError::Config(
                "managedRepositoryRoot must be set".to_string(),
            ));
        }
        if !self.managed_repository_root.is_absolute() {
            return Err(BackboneError::Config(format!(
                "managedRepositoryRoot must be absolute: {}",
                self.managed_repository_root.display()
            )));
        }
        if self.path_rules.split(',').all(|r| r.trim().is_empty()) {
            return Err(BackboneError::Config(
                "pathRules names no rule set".to_string(),
            ));
        }
        if self.bus.max_in_flight == 0 {
            return Err(BackboneError::Config(
                "bus.maxInFlight must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// NATS connection and subscription settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NatsConfig {
    /// Server URL (default: nats://127.0.0.1:4222)
    #[serde(default = "default_url")]
    pub url: String,

    /// Queue group shared by every broker node (default: backbone)
    #[serde(default = "default_queue_group")]
    pub queue_group: String,

    /// Prefix prepended to every operation subject, joined with `.`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_prefix: Option<String>,

    /// Connection timeout in seconds (default: 5)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Authentication token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Requests handled concurrently before the subscription stops being
    /// read (default: 256)
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_url() -> String {
    "nats://127.0.0.1:4222".to_string()
}

fn default_queue_group() -> String {
    "backbone".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_max_in_flight() -> usize {
    256
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            queue_group: default_queue_group(),
            subject_prefix: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            token: None,
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl NatsConfig {
    /// Full subject for an operation subject
    pub fn subject(&self, operation_subject: &str) -> String {
        match self.subject_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => format!("{}.{}", prefix, operation_subject),
            _ => operation_subject.to_string(),
        }
    }

    /// Operation subject of a full subject; None if the prefix does not match
    pub fn operation_subject<'a>(&self, subject: &'a str) -> Option<&'a str> {
        match self.subject_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => subject
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('.')),
            _ => Some(subject),
        }
    }
}
