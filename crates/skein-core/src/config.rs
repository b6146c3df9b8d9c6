//! Skein configuration
//!
//! Loaded from TOML, then overridden by `SKEIN_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, SkeinError};

/// Default OpenAI-compatible endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default chat model
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkeinConfig {
    /// Completion service settings
    pub completion: CompletionSettings,

    /// Planner and retry settings
    pub planner: PlannerSettings,

    /// Logging settings
    pub logging: LoggingSettings,
}

impl SkeinConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.completion.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.completion.model = model.into();
        self
    }

    pub fn with_max_extra_tries(mut self, max_extra_tries: u32) -> Self {
        self.planner.max_extra_tries = max_extra_tries;
        self
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from `path` if given (defaults otherwise), read `.env`, then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())
    }

    /// Apply `SKEIN_BASE_URL`, `SKEIN_MODEL` and `SKEIN_MAX_EXTRA_TRIES`
    /// using `lookup` as the environment.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SKEIN_BASE_URL") {
            self.completion.base_url = url;
        }
        if let Some(model) = lookup("SKEIN_MODEL") {
            self.completion.model = model;
        }
        if let Some(tries) = lookup("SKEIN_MAX_EXTRA_TRIES") {
            self.planner.max_extra_tries = tries.trim().parse().map_err(|_| {
                SkeinError::Config(format!("SKEIN_MAX_EXTRA_TRIES is not a number: {tries}"))
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.completion.base_url.trim().is_empty() {
            return Err(SkeinError::Config("completion.base_url is empty".to_string()));
        }
        if self.completion.model.trim().is_empty() {
            return Err(SkeinError::Config("completion.model is empty".to_string()));
        }
        if self.completion.candidates == 0 {
            return Err(SkeinError::Config(
                "completion.candidates must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Completion service settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionSettings {
    /// Base URL of an OpenAI-compatible endpoint
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// Name of the environment variable holding the API key
    pub api_key_env: String,

    pub temperature: f64,

    pub max_tokens: u32,

    /// Number of candidates requested per completion
    pub candidates: u32,

    /// HTTP timeout in seconds
    pub timeout_secs: u64,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.3,
            max_tokens: 2048,
            candidates: 1,
            timeout_secs: 60,
        }
    }
}

/// Planner and retry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerSettings {
    /// Retries beyond the first attempt
    pub max_extra_tries: u32,

    pub temperature: f64,

    pub max_tokens: u32,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            max_extra_tries: 1,
            temperature: 0.0,
            max_tokens: 1024,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
