//! # GridPulse Providers
//!
//! LLM chat provider layer for GridPulse.
//!
//! All OpenAI-compatible providers (OpenAI, Anthropic, Groq, Ollama) are
//! handled by a single `OpenAiCompatibleProvider`. Different providers are
//! distinguished only by endpoint URL, auth style, and API key.

pub mod openai_compatible;
pub mod provider_registry;

use async_trait::async_trait;
use gridpulse_core::config::LlmConfig;
use gridpulse_core::error::{GridPulseError, Result};

pub use openai_compatible::OpenAiCompatibleProvider;

/// A chat-completion backend.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider name (e.g., "openai", "groq").
    fn name(&self) -> &str;

    /// Send a single prompt (with optional system message) and return the
    /// assistant's text reply.
    async fn chat(&self, prompt: &str, system: Option<&str>) -> Result<String>;

    /// Whether the provider is usable right now (key configured / endpoint
    /// reachable). Never errors — unreachable means `false`.
    async fn health_check(&self) -> bool;
}

/// Create a chat provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Box<dyn ChatProvider>> {
    let provider_name = config.provider.as_str();

    match provider_name {
        // Custom endpoint: "custom:https://my-server.com/v1"
        other if other.starts_with("custom:") => Ok(Box::new(
            OpenAiCompatibleProvider::custom(other, config),
        )),

        // All known OpenAI-compatible providers
        _ => {
            let registry = provider_registry::get_provider_config(provider_name)
                .ok_or_else(|| GridPulseError::NotFound(format!("provider '{provider_name}'")))?;
            Ok(Box::new(OpenAiCompatibleProvider::from_registry(
                registry, config,
            )))
        }
    }
}

/// List all available provider names.
pub fn available_providers() -> Vec<&'static str> {
    let mut names = provider_registry::all_provider_names();
    names.push("custom");
    names
}
