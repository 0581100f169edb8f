//! Engine configuration.
//!
//! Everything can be set from the environment; callers that load a `.env`
//! file should do so before calling [`EngineConfig::from_env`].

use crate::narrator::NarratorOptions;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://campaigns.db";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_DISPLAY_TURNS: usize = 10;
pub const DEFAULT_MAX_INPUT_CHARS: usize = 2000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database_url: String,
    pub api_key: Option<String>,
    pub base_url: String,
    pub narrator: NarratorOptions,
    /// Turns shown when resuming a campaign.
    pub display_turns: usize,
    pub max_input_chars: usize,
    /// Appended to the game-master instructions.
    pub instructions: Option<String>,
    /// A user created under this name is an administrator.
    pub admin_username: Option<String>,
    /// Stored verbatim as the administrator's password hash.
    pub admin_password: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            narrator: NarratorOptions::default(),
            display_turns: DEFAULT_DISPLAY_TURNS,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            instructions: None,
            admin_username: None,
            admin_password: None,
        }
    }
}

impl EngineConfig {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(url) = get("DATABASE_URL") {
            config.database_url = url;
        }
        config.api_key = get("OPENAI_API_KEY");
        if let Some(url) = get("OPENAI_BASE_URL") {
            config.base_url = url;
        }
        if let Some(model) = get("NARRATOR_MODEL") {
            config.narrator.model = model;
        }
        if let Some(t) = parse::<f32>("NARRATOR_TEMPERATURE", get("NARRATOR_TEMPERATURE"))? {
            if !t.is_finite() {
                return Err(invalid("NARRATOR_TEMPERATURE", t.to_string()));
            }
            config.narrator.temperature = t.clamp(0.0, 1.0);
        }
        if let Some(n) = parse::<usize>("NARRATOR_MAX_TOKENS", get("NARRATOR_MAX_TOKENS"))? {
            config.narrator.max_tokens = n;
        }
        if let Some(secs) = parse::<u64>("NARRATOR_TIMEOUT_SECS", get("NARRATOR_TIMEOUT_SECS"))? {
            if secs == 0 {
                return Err(invalid("NARRATOR_TIMEOUT_SECS", secs.to_string()));
            }
            config.narrator.timeout = Duration::from_secs(secs);
        }
        if let Some(n) = parse::<usize>("DISPLAY_TURNS", get("DISPLAY_TURNS"))? {
            config.display_turns = n;
        }
        if let Some(n) = parse::<usize>("MAX_INPUT_CHARS", get("MAX_INPUT_CHARS"))? {
            if n == 0 {
                return Err(invalid("MAX_INPUT_CHARS", n.to_string()));
            }
            config.max_input_chars = n;
        }
        config.instructions = get("DM_INSTRUCTIONS");
        config.admin_username = get("ADMIN_USERNAME").map(|name| name.trim().to_string());
        config.admin_password = get("ADMIN_PASSWORD");

        Ok(config)
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_narrator(mut self, options: NarratorOptions) -> Self {
        self.narrator = options;
        self
    }

    pub fn with_display_turns(mut self, turns: usize) -> Self {
        self.display_turns = turns;
        self
    }

    pub fn with_max_input_chars(mut self, max: usize) -> Self {
        self.max_input_chars = max;
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_admin(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.admin_username = Some(username.into());
        self.admin_password = password;
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

fn parse<T: FromStr>(key: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError> {
    match raw {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid(key, value)),
    }
}

fn invalid(key: &'static str, value: String) -> ConfigError {
    ConfigError::Invalid { key, value }
}
