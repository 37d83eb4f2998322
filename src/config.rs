use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.toml";
const LOG_FILE: &str = "chatline.log";

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chat-completion endpoint settings
    pub provider: ProviderConfig,

    /// Prepended to every request, never shown in the transcript
    pub system_prompt: Option<String>,

    /// UI preferences
    pub ui: UiConfig,

    /// Logging
    pub log: LogConfig,
}

/// OpenAI-compatible provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub model: String,
    /// Inline key; takes precedence over `api_key_env`
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Limit on establishing the connection
    pub connect_timeout_secs: u64,
    /// Longest gap allowed between streamed chunks; the reply itself is unbounded
    pub idle_timeout_secs: u64,
}

/// UI configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub placeholder: String,
    pub tick_rate_ms: u64,
    /// Delay between words for the offline echo provider
    pub echo_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
    /// Log file used by the TUI; defaults to `~/.chatline/chatline.log`
    pub file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            provider: ProviderConfig::default(),
            system_prompt: None,
            ui: UiConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: None,
            max_tokens: None,
            connect_timeout_secs: 10,
            idle_timeout_secs: 60,
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        UiConfig {
            placeholder: "Say something...".to_string(),
            tick_rate_ms: 50,
            echo_delay_ms: 60,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: "info".to_string(),
            file: None,
        }
    }
}

/// `~/.chatline`
pub fn chatline_home() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not find home directory")?;
    Ok(home.join(".chatline"))
}

/// Location of the config file when no `--config` is given
pub fn default_config_path() -> Result<PathBuf> {
    Ok(chatline_home()?.join(CONFIG_FILE))
}

impl Config {
    /// Load from the default location, falling back to defaults if absent
    pub fn load() -> Result<Self> {
        Self::load_from(&default_config_path()?)
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Write this configuration to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Resolved log file path for the interactive UI
    pub fn log_file(&self) -> Result<PathBuf> {
        match &self.log.file {
            Some(path) => Ok(path.clone()),
            None => Ok(chatline_home()?.join(LOG_FILE)),
        }
    }
}

impl ProviderConfig {
    /// API key from config or environment
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|key| !key.trim().is_empty())
    }
}
