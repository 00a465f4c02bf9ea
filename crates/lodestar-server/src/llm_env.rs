//! LLM provider and credential resolution.
//!
//! Resolution order for provider, model, and endpoint: environment
//! variables, then the config file, then per-provider defaults. The
//! resolved settings become environment variables injected into the
//! executor container only — no other process sees the credentials.

use tracing::warn;

use lodestar_core::{HostPlatform, resolve_host_address};

use crate::config::LlmFileConfig;

/// Supported LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    /// Anthropic API.
    Anthropic,
    /// OpenAI API.
    OpenAi,
    /// Google Gemini API.
    Google,
    /// Local OpenAI-compatible server; no API key.
    Local,
}

impl LlmProvider {
    fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "anthropic" => Some(Self::Anthropic),
            "openai" => Some(Self::OpenAi),
            "google" | "gemini" => Some(Self::Google),
            "local" => Some(Self::Local),
            _ => None,
        }
    }

    /// Canonical provider name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Google => "google",
            Self::Local => "local",
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            Self::Anthropic => "claude-sonnet-4-5",
            Self::OpenAi => "gpt-4o",
            Self::Google => "gemini-2.0-flash",
            Self::Local => "llama3.1",
        }
    }

    fn default_endpoint(self) -> &'static str {
        match self {
            Self::Anthropic => "https://api.anthropic.com",
            Self::OpenAi => "https://api.openai.com",
            Self::Google => "https://generativelanguage.googleapis.com",
            Self::Local => "http://127.0.0.1:11434",
        }
    }

    /// Environment variable carrying this provider's API key, if any.
    #[must_use]
    pub fn api_key_var(self) -> Option<&'static str> {
        match self {
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Google => Some("GEMINI_API_KEY"),
            Self::Local => None,
        }
    }
}

/// Fully resolved LLM settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// Selected provider.
    pub provider: LlmProvider,
    /// Model name.
    pub model: String,
    /// API endpoint.
    pub endpoint: String,
    /// API key, absent for the local provider or when unset.
    pub api_key: Option<String>,
}

/// Read one override from the environment.
fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Resolve settings from environment, config file, and defaults.
#[must_use]
pub fn resolve(file: &LlmFileConfig) -> LlmSettings {
    let provider = env_var("LODESTAR_LLM_PROVIDER")
        .as_deref()
        .and_then(LlmProvider::parse)
        .or_else(|| file.provider.as_deref().and_then(LlmProvider::parse))
        .unwrap_or(LlmProvider::Anthropic);

    let model = env_var("LODESTAR_LLM_MODEL")
        .or_else(|| file.model.clone())
        .unwrap_or_else(|| provider.default_model().to_owned());

    let endpoint = env_var("LODESTAR_LLM_ENDPOINT")
        .or_else(|| file.endpoint.clone())
        .unwrap_or_else(|| provider.default_endpoint().to_owned());

    let api_key = provider.api_key_var().and_then(env_var);
    if api_key.is_none() && provider != LlmProvider::Local {
        warn!(
            provider = provider.name(),
            "no API key found for provider; agent executions will fail until one is set"
        );
    }

    LlmSettings {
        provider,
        model,
        endpoint,
        api_key,
    }
}

/// Environment injected into the executor container. Host-side endpoints
/// pass through the container address resolver.
#[must_use]
pub fn executor_env(settings: &LlmSettings, platform: HostPlatform) -> Vec<(String, String)> {
    let mut env = vec![
        (
            "LODESTAR_LLM_PROVIDER".to_owned(),
            settings.provider.name().to_owned(),
        ),
        ("LODESTAR_LLM_MODEL".to_owned(), settings.model.clone()),
        (
            "LODESTAR_LLM_ENDPOINT".to_owned(),
            resolve_host_address(&settings.endpoint, platform),
        ),
    ];
    if let (Some(var), Some(key)) = (settings.provider.api_key_var(), settings.api_key.clone()) {
        env.push((var.to_owned(), key));
    }
    env
}
