//! Configuration loading, validation, and management for rago.
//!
//! Loads configuration from `~/.rago/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.rago/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the upstream completion service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible upstream
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Model used when a client request does not name one
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per upstream response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Orchestration loop settings
    #[serde(default)]
    pub orchestration: OrchestrationConfig,

    /// Command action policy
    #[serde(default)]
    pub command_policy: CommandPolicyConfig,

    /// Light-control action settings
    #[serde(default)]
    pub lights: LightsConfig,
}

fn default_api_url() -> String {
    "https://api.groq.com/openai/v1".into()
}
fn default_model() -> String {
    "llama3-70b-8192".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    4096
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("gateway", &self.gateway)
            .field("orchestration", &self.orchestration)
            .field("command_policy", &self.command_policy)
            .field("lights", &self.lights)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    8080
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    /// Upper bound on upstream rounds per request
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Replaces the built-in reasoning system prompt when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_max_rounds() -> u32 {
    6
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandPolicyConfig {
    /// Commands (first word) the Command action may run; `"*"` allows any
    /// command line, including chained ones
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,

    /// Kill commands that run longer than this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_allowed_commands() -> Vec<String> {
    [
        "kubectl", "ls", "cat", "head", "tail", "echo", "pwd", "date", "whoami", "uname",
        "uptime", "df", "free", "wc", "grep", "which",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for CommandPolicyConfig {
    fn default() -> Self {
        Self {
            allowed_commands: default_allowed_commands(),
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightsConfig {
    /// Fixture names the model may target (group labels on the LAN)
    #[serde(default = "default_fixtures")]
    pub fixtures: Vec<String>,

    /// How long to collect discovery replies
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,

    /// Broadcast address for discovery
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: String,
}

fn default_fixtures() -> Vec<String> {
    vec!["bedroom".into(), "living room".into()]
}
fn default_discovery_timeout_ms() -> u64 {
    1500
}
fn default_broadcast_addr() -> String {
    "255.255.255.255:56700".into()
}

impl Default for LightsConfig {
    fn default() -> Self {
        Self {
            fixtures: default_fixtures(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
            broadcast_addr: default_broadcast_addr(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.rago/config.toml).
    ///
    /// Environment overrides:
    /// - `RAGO_API_KEY` replaces any key from the file
    /// - `GROQ_API_KEY`, then `OPENAI_API_KEY`, fill a key the file leaves unset
    /// - `RAGO_API_URL`
    /// - `RAGO_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("RAGO_API_KEY") {
            self.api_key = Some(key);
        } else if self.api_key.is_none() {
            self.api_key = lookup("GROQ_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }

        if let Some(url) = lookup("RAGO_API_URL") {
            self.api_url = url;
        }

        if let Some(model) = lookup("RAGO_MODEL") {
            self.default_model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".rago")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.orchestration.max_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "orchestration.max_rounds must be at least 1".into(),
            ));
        }

        if self.lights.fixtures.is_empty() {
            return Err(ConfigError::ValidationError(
                "lights.fixtures must name at least one fixture".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for the `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            gateway: GatewayConfig::default(),
            orchestration: OrchestrationConfig::default(),
            command_policy: CommandPolicyConfig::default(),
            lights: LightsConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
