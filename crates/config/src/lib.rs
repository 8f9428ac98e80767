//! Configuration loading, validation, and management for sagebot.
//!
//! Loads configuration from `~/.sagebot/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.sagebot/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model used for every generation of a turn
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL of the model API
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default)]
    pub generation: GenerationSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub turn: TurnSettings,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Market data endpoints used by the price and calendar actions
    #[serde(default)]
    pub market: MarketConfig,
}

fn default_model() -> String {
    "gemini-2.5-flash".into()
}
fn default_api_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
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
            .field("model", &self.model)
            .field("api_base_url", &self.api_base_url)
            .field("generation", &self.generation)
            .field("retry", &self.retry)
            .field("turn", &self.turn)
            .field("gateway", &self.gateway)
            .field("storage", &self.storage)
            .field("knowledge", &self.knowledge)
            .field("market", &self.market)
            .finish()
    }
}

impl std::fmt::Debug for MarketConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketConfig")
            .field("price_api_url", &self.price_api_url)
            .field("price_api_key", &redact(&self.price_api_key))
            .field("calendar_url", &self.calendar_url)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .finish()
    }
}

/// Sampling parameters forwarded on every model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSettings {
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    1.0
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: None,
            max_output_tokens: None,
        }
    }
}

impl GenerationSettings {
    pub fn to_generation_config(&self) -> sagebot_core::GenerationConfig {
        sagebot_core::GenerationConfig {
            temperature: self.temperature,
            top_p: self.top_p,
            max_output_tokens: self.max_output_tokens,
        }
    }
}

/// Retry schedule for the initial model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// backoff(n) = n × step
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_backoff_step_ms() -> u64 {
    1000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_step_ms: default_backoff_step_ms(),
        }
    }
}

/// Limits and switches for a single user turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnSettings {
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,

    /// Stored messages loaded as prior turns
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Passages retrieved for the initial context
    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: usize,

    /// Maximum characters of linked-page text placed in the prompt
    #[serde(default = "default_page_text_limit")]
    pub page_text_limit: usize,

    /// Whether the follow-up after an action repeats history and retrieved context
    #[serde(default = "default_true")]
    pub followup_carries_history: bool,
}

fn default_deadline_secs() -> u64 {
    60
}
fn default_history_limit() -> usize {
    10
}
fn default_retrieval_k() -> usize {
    5
}
fn default_page_text_limit() -> usize {
    30_000
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline_secs(),
            history_limit: default_history_limit(),
            retrieval_k: default_retrieval_k(),
            page_text_limit: default_page_text_limit(),
            followup_carries_history: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// CORS origins. Empty allows any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_port() -> u16 {
    3000
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            allowed_origins: vec![],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
}

fn default_sqlite_path() -> String {
    AppConfig::config_dir()
        .join("sagebot.db")
        .to_string_lossy()
        .into_owned()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            sqlite_path: default_sqlite_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// JSON file of pre-embedded chunks. Absent means an empty knowledge base.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_path: Option<String>,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Passages scoring below this are dropped
    #[serde(default)]
    pub min_score: f32,
}

fn default_embedding_model() -> String {
    "text-embedding-004".into()
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            index_path: None,
            embedding_model: default_embedding_model(),
            min_score: 0.0,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    #[serde(default = "default_price_api_url")]
    pub price_api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_api_key: Option<String>,

    #[serde(default = "default_calendar_url")]
    pub calendar_url: String,

    /// Timeout for every outbound action request, page fetches included
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_price_api_url() -> String {
    "https://api.twelvedata.com".into()
}
fn default_calendar_url() -> String {
    "https://economic-calendar.tradingview.com/events".into()
}
fn default_http_timeout_secs() -> u64 {
    8
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            price_api_url: default_price_api_url(),
            price_api_key: None,
            calendar_url: default_calendar_url(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.sagebot/config.toml).
    ///
    /// Environment overrides:
    /// - `SAGEBOT_API_KEY`, then `GEMINI_API_KEY` (only when no key is configured)
    /// - `SAGEBOT_MODEL`
    /// - `SAGEBOT_PORT`
    /// - `TWELVEDATA_API_KEY` (only when no price key is configured)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
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
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.api_key.is_none() {
            self.api_key = lookup("SAGEBOT_API_KEY").or_else(|| lookup("GEMINI_API_KEY"));
        }

        if let Some(model) = lookup("SAGEBOT_MODEL") {
            self.model = model;
        }

        if let Some(port) = lookup("SAGEBOT_PORT") {
            self.gateway.port = port.parse().map_err(|_| {
                ConfigError::ValidationError(format!("SAGEBOT_PORT is not a valid port: {port}"))
            })?;
        }

        if self.market.price_api_key.is_none() {
            self.market.price_api_key = lookup("TWELVEDATA_API_KEY");
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".sagebot")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(ConfigError::ValidationError(
                "generation.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if let Some(top_p) = self.generation.top_p
            && !(0.0..=1.0).contains(&top_p)
        {
            return Err(ConfigError::ValidationError(
                "generation.top_p must be between 0.0 and 1.0".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.turn.deadline_secs == 0 {
            return Err(ConfigError::ValidationError(
                "turn.deadline_secs must be > 0".into(),
            ));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("model must not be empty".into()));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            api_base_url: default_api_base_url(),
            generation: GenerationSettings::default(),
            retry: RetrySettings::default(),
            turn: TurnSettings::default(),
            gateway: GatewayConfig::default(),
            storage: StorageConfig::default(),
            knowledge: KnowledgeConfig::default(),
            market: MarketConfig::default(),
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
