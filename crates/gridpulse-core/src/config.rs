//! GridPulse configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{GridPulseError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridPulseConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Default for GridPulseConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            gateway: GatewayConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl GridPulseConfig {
    /// Load config from the default path (~/.gridpulse/config.toml).
    /// Falls back to defaults when no file exists.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GridPulseError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| GridPulseError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| GridPulseError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path, honoring the GRIDPULSE_CONFIG override.
    pub fn default_path() -> PathBuf {
        if let Ok(p) = std::env::var("GRIDPULSE_CONFIG") {
            return PathBuf::from(p);
        }
        Self::home_dir().join("config.toml")
    }

    /// Get the GridPulse home directory (~/.gridpulse).
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".gridpulse")
    }
}

/// LLM provider configuration — backs the insight capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "openai", "anthropic", "groq", "ollama", or "custom:<url>".
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// API key. Empty = resolve from the provider's env vars.
    #[serde(default)]
    pub api_key: String,
    /// Endpoint override. Empty = registry default.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_llm_provider() -> String { "openai".into() }
fn default_llm_model() -> String { "gpt-4o-mini".into() }
fn default_temperature() -> f32 { 0.3 }
fn default_max_tokens() -> u32 { 1024 }

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            api_key: String::new(),
            endpoint: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared API token checked by the auth middleware. Empty = open access.
    #[serde(default)]
    pub api_token: String,
}

fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 8090 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_token: String::new(),
        }
    }
}

/// Scheduler (poller) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between due-task scans.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Task database path. Empty = ~/.gridpulse/tasks.db.
    #[serde(default)]
    pub db_path: String,
}

fn default_poll_interval() -> u64 { 30 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            db_path: String::new(),
        }
    }
}

impl SchedulerConfig {
    /// Resolve the task database path.
    pub fn resolved_db_path(&self) -> PathBuf {
        if self.db_path.is_empty() {
            GridPulseConfig::home_dir().join("tasks.db")
        } else {
            PathBuf::from(&self.db_path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = GridPulseConfig::default();
        assert_eq!(cfg.llm.provider, "openai");
        assert_eq!(cfg.gateway.port, 8090);
        assert_eq!(cfg.scheduler.poll_interval_secs, 30);
    }

    #[test]
    fn test_parse_partial_toml() {
        let cfg: GridPulseConfig = toml::from_str(
            r#"
            [llm]
            provider = "groq"

            [scheduler]
            poll_interval_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.llm.provider, "groq");
        assert_eq!(cfg.llm.model, "gpt-4o-mini"); // section default survives
        assert_eq!(cfg.scheduler.poll_interval_secs, 5);
        assert_eq!(cfg.gateway.host, "127.0.0.1");
    }
}
