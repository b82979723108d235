//! Configuration settings for Toolpilot.

use crate::llm::GenerationOptions;
use crate::registry::ToolSpec;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub llm: LlmSettings,
    pub agent: AgentSettings,
    pub tools: Vec<ToolSpec>,
    pub warehouse: WarehouseSettings,
    pub server: ServerSettings,
    pub prompts: PromptSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
        }
    }
}

/// Language model settings for the single-action pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Model used for selection, parameter extraction and synthesis.
    pub model: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    /// Deadline for a single model call.
    pub timeout_seconds: u64,
    /// Options for the tool-less raw answer.
    pub raw: RawAnswerSettings,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_output_tokens: 512,
            temperature: 0.1,
            top_p: 0.8,
            top_k: 40,
            timeout_seconds: 120,
            raw: RawAnswerSettings::default(),
        }
    }
}

impl LlmSettings {
    /// Generation options for the pipeline stages.
    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            max_tokens: self.max_output_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
        }
    }

    /// Generation options for the raw answer.
    pub fn raw_generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            max_tokens: self.raw.max_output_tokens,
            temperature: self.raw.temperature,
            top_p: self.raw.top_p,
            top_k: self.top_k,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Sampling options for the raw (tool-less) answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RawAnswerSettings {
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for RawAnswerSettings {
    fn default() -> Self {
        Self {
            max_output_tokens: 1024,
            temperature: 0.9,
            top_p: 1.0,
        }
    }
}

/// Settings for tool execution and the function-calling loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Maximum model calls in one function-calling run.
    pub max_iterations: usize,
    /// Deadline for a single tool or capability call.
    pub tool_timeout_seconds: u64,
    /// Model used by the function-calling loop.
    pub chat_model: String,
    pub chat_temperature: f32,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            tool_timeout_seconds: 60,
            chat_model: "gpt-4o".to_string(),
            chat_temperature: 0.0,
        }
    }
}

impl AgentSettings {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_seconds)
    }
}

/// Query warehouse settings for the function-calling loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseSettings {
    /// Project that owns the datasets and bills the queries.
    pub project_id: String,
    /// Processing location for query jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Per-query ceiling on billed bytes.
    pub max_bytes_billed: u64,
    /// Environment variable holding the OAuth access token.
    pub access_token_env: String,
    /// REST endpoint root.
    pub api_base: String,
}

impl Default for WarehouseSettings {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            location: None,
            max_bytes_billed: 100_000_000,
            access_token_env: "GOOGLE_OAUTH_ACCESS_TOKEN".to_string(),
            api_base: "https://bigquery.googleapis.com/bigquery/v2".to_string(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: std::collections::HashMap<String, String>,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::PilotError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("toolpilot")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }
}
