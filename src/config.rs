use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::relay::GlobalConfig;

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo-instruct";
pub const DEFAULT_PERSONALITY: &str = "Maru is a cheerful young adult. She is also a cat.";
pub const DEFAULT_MAX_TOKENS: u32 = 100;
pub const DEFAULT_TOP_P: f32 = 1.0;
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// A required key is absent or empty.
    Missing(&'static str),
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Missing(key) => write!(f, "missing required config key: {}", key),
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Missing(_) | Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConfigFile {
    #[serde(default)]
    console_log: bool,
    /// Directory for the log file. No file logging when absent.
    log_dir: Option<String>,
    #[serde(rename = "OpenAI", default)]
    openai: OpenAiFile,
    #[serde(default)]
    discord: DiscordFile,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct OpenAiFile {
    #[serde(rename = "APIKey", default)]
    api_key: String,
    #[serde(default)]
    max_tokens: u32,
    #[serde(default)]
    top_p: f32,
    #[serde(default)]
    model: String,
    #[serde(default)]
    personality: String,
    #[serde(rename = "BaseURL")]
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct DiscordFile {
    #[serde(rename = "APIKey", default)]
    api_key: String,
    /// Seed for each new channel's shared-conversation flag.
    #[serde(default, alias = "SharedConversationDefault")]
    shared_conversation: bool,
    /// Channel that receives forwarded log lines.
    #[serde(rename = "LogChannelID")]
    log_channel_id: Option<u64>,
}

/// Completion backend settings.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub top_p: f32,
    pub model: String,
    pub personality: String,
    pub timeout: Duration,
}

/// Discord session settings.
#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub api_key: String,
    pub shared_conversation: bool,
    pub log_channel_id: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub console_log: bool,
    pub log_dir: Option<PathBuf>,
    pub openai: OpenAiConfig,
    pub discord: DiscordConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        // Validate required fields
        if file.openai.api_key.trim().is_empty() {
            return Err(ConfigError::Missing("OpenAI.APIKey"));
        }
        if file.discord.api_key.trim().is_empty() {
            return Err(ConfigError::Missing("Discord.APIKey"));
        }

        // Zero means "not given", same as an absent key
        let top_p = if file.openai.top_p == 0.0 { DEFAULT_TOP_P } else { file.openai.top_p };
        if !(top_p > 0.0 && top_p <= 1.0) {
            return Err(ConfigError::Validation(format!(
                "OpenAI.TopP must be in (0, 1], got {}",
                top_p
            )));
        }
        let max_tokens = if file.openai.max_tokens == 0 {
            DEFAULT_MAX_TOKENS
        } else {
            file.openai.max_tokens
        };
        let timeout_secs = match file.openai.timeout_secs {
            Some(0) => {
                return Err(ConfigError::Validation("OpenAI.TimeoutSecs must be positive".into()));
            }
            Some(secs) => secs,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let model = non_empty_or(file.openai.model, DEFAULT_MODEL);
        let personality = non_empty_or(file.openai.personality, DEFAULT_PERSONALITY);
        let base_url = file
            .openai
            .base_url
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(Self {
            console_log: file.console_log,
            log_dir: file.log_dir.map(PathBuf::from),
            openai: OpenAiConfig {
                api_key: file.openai.api_key.trim().to_string(),
                base_url,
                max_tokens,
                top_p,
                model,
                personality,
                timeout: Duration::from_secs(timeout_secs),
            },
            discord: DiscordConfig {
                api_key: file.discord.api_key.trim().to_string(),
                shared_conversation: file.discord.shared_conversation,
                log_channel_id: file.discord.log_channel_id,
            },
        })
    }

    /// Initial global scope for the registry.
    pub fn global_config(&self) -> GlobalConfig {
        GlobalConfig {
            default_personality: self.openai.personality.clone(),
            default_model: self.openai.model.clone(),
            max_tokens: self.openai.max_tokens,
            top_p: self.openai.top_p,
            shared_conversation_default: self.discord.shared_conversation,
        }
    }
}

fn non_empty_or(value: String, default: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        default.to_string()
    } else {
        trimmed.to_string()
    }
}
