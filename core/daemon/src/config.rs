//! Daemon runtime configuration (`~/.attn/config.toml`).
//!
//! Every field has a default, so a missing file or a partial file is valid.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub use attn_core::agents::PROMPT_PLACEHOLDER;

const MIN_CLASSIFIER_TIMEOUT_SECS: u64 = 1;
const MAX_CLASSIFIER_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_max_subscribers")]
    pub max_subscribers: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_subscribers: default_max_subscribers(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_classifier_program")]
    pub program: String,
    #[serde(default = "default_classifier_args")]
    pub args: Vec<String>,
    #[serde(default = "default_classifier_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    /// Per-agent command overrides keyed by agent name (`claude`, `codex`, `other`).
    /// Agents without an entry use their driver's CLI, then `program`/`args`.
    #[serde(default)]
    pub agents: BTreeMap<String, ClassifierCommandConfig>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: default_classifier_program(),
            args: default_classifier_args(),
            timeout_secs: default_classifier_timeout_secs(),
            max_message_chars: default_max_message_chars(),
            agents: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierCommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ClassifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl DaemonConfig {
    /// Clamps values that would otherwise disable a safety bound.
    pub fn normalized(mut self) -> Self {
        self.server.max_connections = self.server.max_connections.max(1);
        self.server.read_timeout_ms = self.server.read_timeout_ms.max(1);
        self.broadcast.queue_capacity = self.broadcast.queue_capacity.max(1);
        self.broadcast.max_subscribers = self.broadcast.max_subscribers.max(1);
        self.classifier.timeout_secs = self
            .classifier
            .timeout_secs
            .clamp(MIN_CLASSIFIER_TIMEOUT_SECS, MAX_CLASSIFIER_TIMEOUT_SECS);
        self.classifier.max_message_chars = self.classifier.max_message_chars.max(1);
        self
    }
}

fn default_true() -> bool {
    true
}

fn default_max_connections() -> usize {
    64
}

fn default_read_timeout_ms() -> u64 {
    2000
}

fn default_queue_capacity() -> usize {
    256
}

fn default_max_subscribers() -> usize {
    16
}

fn default_classifier_program() -> String {
    "claude".to_string()
}

fn default_classifier_args() -> Vec<String> {
    ["-p", "--model", "haiku", "--output-format", "text"]
        .iter()
        .map(|arg| arg.to_string())
        .collect()
}

fn default_classifier_timeout_secs() -> u64 {
    20
}

fn default_max_message_chars() -> usize {
    500
}

pub fn load_config(path: Option<PathBuf>) -> Result<DaemonConfig, String> {
    let config_path = match path {
        Some(path) => path,
        None => attn_core::paths::config_path().map_err(|err| err.to_string())?,
    };

    if !config_path.exists() {
        return Ok(DaemonConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|err| {
        format!(
            "Failed to read config {}: {}",
            config_path.display(),
            err
        )
    })?;
    toml::from_str::<DaemonConfig>(&content)
        .map(DaemonConfig::normalized)
        .map_err(|err| {
            format!(
                "Failed to parse config {}: {}",
                config_path.display(),
                err
            )
        })
}
