//! Configuration loading, validation, and management for simguide.
//!
//! Loads configuration from `~/.simguide/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.simguide/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the upstream provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Upstream provider name ("openai", "openrouter", "ollama", ...)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Override the provider's base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Model requested from the provider
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per upstream answer
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Base system prompt; the style instruction is appended to it
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub sessions: SessionConfig,

    /// Extra intent rules, evaluated after the built-in ones
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub intents: Vec<IntentConfig>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4".into()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    400
}
fn default_system_prompt() -> String {
    "You are an Abaqus expert assistant.".into()
}

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
            .field("provider", &self.provider)
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("system_prompt", &self.system_prompt)
            .field("upstream", &self.upstream)
            .field("gateway", &self.gateway)
            .field("cache", &self.cache)
            .field("sessions", &self.sessions)
            .field("intents", &self.intents)
            .finish()
    }
}

/// Timeouts and retry policy for upstream calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Per-attempt timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra attempts after a transient failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

/// Upper bound for `upstream.timeout_secs`.
pub const MAX_TIMEOUT_SECS: u64 = 600;
/// Upper bound for `upstream.max_retries`.
pub const MAX_RETRIES: u32 = 10;

fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_base_delay_ms() -> u64 {
    250
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// CORS origins. Empty = any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,

    /// Requests per client per minute. 0 disables rate limiting.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: usize,
}

fn default_port() -> u16 {
    5000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_body_limit() -> usize {
    64 * 1024
}
fn default_rate_limit() -> usize {
    120
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            allowed_origins: Vec::new(),
            body_limit_bytes: default_body_limit(),
            rate_limit_per_minute: default_rate_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// How often expired entries are swept. 0 disables the sweeper.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_ttl_secs() -> u64 {
    600
}
fn default_max_entries() -> usize {
    10_000
}
fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Turns kept per session (user and assistant turns both count)
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// Sessions kept before the least recently used one is dropped
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_max_turns() -> usize {
    5
}
fn default_max_sessions() -> usize {
    10_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// A user-declared intent rule.
///
/// Exactly one of `response` (canned answer) or `prompt` (upstream prompt
/// template, `{input}` is replaced with the user's text) must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentConfig {
    pub name: String,

    /// Case-insensitive substrings; any match selects the rule
    pub patterns: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Shared cache slot for every input matching this rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.simguide/config.toml).
    ///
    /// Environment overrides:
    /// - `SIMGUIDE_API_KEY`, then `OPENAI_API_KEY` (when the file has no key)
    /// - `SIMGUIDE_PROVIDER`
    /// - `SIMGUIDE_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("SIMGUIDE_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .filter(|key| !key.trim().is_empty());
        }

        if let Ok(provider) = std::env::var("SIMGUIDE_PROVIDER") {
            config.provider = provider;
        }

        if let Ok(model) = std::env::var("SIMGUIDE_MODEL") {
            config.model = model;
        }

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

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".simguide")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.sessions.max_turns == 0 {
            return Err(ConfigError::ValidationError(
                "sessions.max_turns must be at least 1".into(),
            ));
        }

        if self.sessions.max_sessions == 0 {
            return Err(ConfigError::ValidationError(
                "sessions.max_sessions must be at least 1".into(),
            ));
        }

        if !(1..=MAX_TIMEOUT_SECS).contains(&self.upstream.timeout_secs) {
            return Err(ConfigError::ValidationError(format!(
                "upstream.timeout_secs must be between 1 and {MAX_TIMEOUT_SECS}"
            )));
        }

        if self.upstream.max_retries > MAX_RETRIES {
            return Err(ConfigError::ValidationError(format!(
                "upstream.max_retries must be at most {MAX_RETRIES}"
            )));
        }

        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "cache.ttl_secs must be at least 1".into(),
            ));
        }

        for intent in &self.intents {
            if intent.patterns.iter().all(|p| p.trim().is_empty()) {
                return Err(ConfigError::ValidationError(format!(
                    "intent '{}' needs at least one non-empty pattern",
                    intent.name
                )));
            }
            if intent.response.is_some() == intent.prompt.is_some() {
                return Err(ConfigError::ValidationError(format!(
                    "intent '{}' must set exactly one of `response` or `prompt`",
                    intent.name
                )));
            }
            if intent.response.is_some() && intent.cache_key.is_some() {
                return Err(ConfigError::ValidationError(format!(
                    "intent '{}' has a canned response; `cache_key` does not apply",
                    intent.name
                )));
            }
        }

        Ok(())
    }

    /// The API key, or the startup-fatal error explaining how to provide one.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    /// Render this config as TOML with the key redacted.
    pub fn redacted_toml(&self) -> String {
        let mut shown = self.clone();
        if shown.api_key.is_some() {
            shown.api_key = Some("[REDACTED]".into());
        }
        toml::to_string_pretty(&shown).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: default_provider(),
            api_url: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            system_prompt: default_system_prompt(),
            upstream: UpstreamConfig::default(),
            gateway: GatewayConfig::default(),
            cache: CacheConfig::default(),
            sessions: SessionConfig::default(),
            intents: Vec::new(),
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

    #[error("No API key configured: set `api_key` in ~/.simguide/config.toml or SIMGUIDE_API_KEY")]
    MissingApiKey,
}
