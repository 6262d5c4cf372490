//! Configuration loading, validation, and management for RustedTavern.
//!
//! Loads configuration from `~/.rustedtavern/config.toml` with environment
//! variable overrides. Validates all settings at startup.

pub mod bindings;

pub use bindings::{BindingKind, InMemoryScopeStore, JsonScopeStore, ScopeStore};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.rustedtavern/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root for characters, presets, history and scope bindings
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Preset applied to scopes that never chose one
    #[serde(default = "default_preset")]
    pub default_preset: String,

    /// Character used when a scope has none bound
    #[serde(default = "default_fallback_character")]
    pub fallback_character: String,

    /// Number of history records fed into each prompt
    #[serde(default = "default_history_depth")]
    pub history_depth: usize,

    /// How the user describes themselves; fills the `personaDescription` marker
    #[serde(default)]
    pub persona_description: String,

    /// Completion backend
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Flags for regex rules written as bare patterns
    #[serde(default)]
    pub regex: RegexConfig,
}

fn default_data_dir() -> PathBuf {
    AppConfig::config_dir()
}
fn default_preset() -> String {
    "default".into()
}
fn default_fallback_character() -> String {
    "Sakana".into()
}
fn default_history_depth() -> usize {
    8
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// openai, claude, google, deepseek, openrouter, ollama or custom
    #[serde(default = "default_provider_kind")]
    pub kind: String,

    /// Overrides the well-known base URL for `kind`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider_kind() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.8
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_timeout_secs() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            api_url: None,
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Default flags for regex rules whose `findRegex` is not a `/body/flags` literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegexConfig {
    #[serde(default = "default_true")]
    pub case_insensitive: bool,

    #[serde(default = "default_true")]
    pub multi_line: bool,

    #[serde(default = "default_true")]
    pub dot_all: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RegexConfig {
    fn default() -> Self {
        Self {
            case_insensitive: true,
            multi_line: true,
            dot_all: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        config.validate()?;
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

    /// Environment variables take priority over the file.
    fn apply_env_overrides(&mut self) {
        if self.provider.api_key.is_none() {
            self.provider.api_key = std::env::var("RUSTEDTAVERN_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(kind) = std::env::var("RUSTEDTAVERN_PROVIDER") {
            self.provider.kind = kind;
        }

        if let Ok(model) = std::env::var("RUSTEDTAVERN_MODEL") {
            self.provider.model = model;
        }

        if let Ok(dir) = std::env::var("RUSTEDTAVERN_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".rustedtavern")
    }

    /// Directory of character card JSON files.
    pub fn characters_dir(&self) -> PathBuf {
        self.data_dir.join("characters")
    }

    /// Directory of preset JSON files.
    pub fn presets_dir(&self) -> PathBuf {
        self.data_dir.join("presets")
    }

    /// Directory of regex rule files bundled with `preset`.
    pub fn regex_dir(&self, preset: &str) -> PathBuf {
        self.presets_dir().join("regex").join(preset)
    }

    /// Directory of history JSONL streams.
    pub fn history_dir(&self) -> PathBuf {
        self.data_dir.join("history")
    }

    /// File holding per-scope character and preset choices.
    pub fn bindings_path(&self) -> PathBuf {
        self.data_dir.join("bindings.json")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.provider.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "provider.max_tokens must be > 0".into(),
            ));
        }

        if self.provider.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "provider.timeout_secs must be > 0".into(),
            ));
        }

        if self.fallback_character.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "fallback_character must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.as_deref().is_some_and(|key| !key.trim().is_empty())
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            default_preset: default_preset(),
            fallback_character: default_fallback_character(),
            history_depth: default_history_depth(),
            persona_description: String::new(),
            provider: ProviderConfig::default(),
            regex: RegexConfig::default(),
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
