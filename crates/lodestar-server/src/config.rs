//! Daemon configuration: `~/.lodestar/config.toml` plus environment
//! overrides.
//!
//! Precedence, highest first: environment variables, config file,
//! provider defaults. Only the LLM section and the engine endpoint are
//! configurable; ports and the data directory are fixed by design.

use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

/// `[llm]` section of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Provider name: `anthropic`, `openai`, `google`, or `local`.
    #[serde(default)]
    pub provider: Option<String>,
    /// Model override.
    #[serde(default)]
    pub model: Option<String>,
    /// Endpoint override (mainly for `local`).
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Parsed daemon configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaemonConfig {
    /// LLM provider settings.
    #[serde(default)]
    pub llm: LlmFileConfig,
}

impl DaemonConfig {
    /// Load the config file; a missing file yields defaults, a malformed
    /// one is reported and ignored.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let Ok(contents) = std::fs::read_to_string(path) else {
            debug!(path = %path.display(), "no config file; using defaults");
            return Self::default();
        };
        match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config file is malformed; using defaults");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_defaults() {
        let config = DaemonConfig::load(Path::new("/nonexistent/config.toml"));
        assert!(config.llm.provider.is_none());
    }

    #[test]
    fn test_parse_llm_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[llm]\nprovider = \"anthropic\"\nmodel = \"claude-sonnet-4-5\"\n",
        )
        .unwrap();
        let config = DaemonConfig::load(&path);
        assert_eq!(config.llm.provider.as_deref(), Some("anthropic"));
        assert_eq!(config.llm.model.as_deref(), Some("claude-sonnet-4-5"));
    }

    #[test]
    fn test_malformed_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not [valid toml").unwrap();
        let config = DaemonConfig::load(&path);
        assert!(config.llm.provider.is_none());
    }
}
