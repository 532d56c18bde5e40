//! Runner configuration.
//!
//! Loaded via the `config` crate from an optional `flowloom.toml` and from
//! `FLOWLOOM__`-prefixed environment variables, e.g.
//! `FLOWLOOM__ENGINE__SANDBOX_TIMEOUT_MS=500`.

use flowloom_ai::OpenAiConfig;
use flowloom_workflow::EngineConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Configuration for the runner binary.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// Directory holding the persisted engine state.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// Engine limits and timeouts.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Model endpoint used by model-call nodes.
    #[serde(default)]
    pub model: OpenAiConfig,
}

fn default_state_path() -> PathBuf {
    PathBuf::from(".flowloom")
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            engine: EngineConfig::default(),
            model: OpenAiConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// Loads configuration from `file` (if present) and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or a value has the
    /// wrong type.
    pub fn load(file: &Path) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from(file).required(false))
            .add_source(
                config::Environment::with_prefix("FLOWLOOM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunnerConfig::load(&dir.path().join("flowloom.toml")).unwrap();
        assert_eq!(config.state_path, PathBuf::from(".flowloom"));
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn file_overrides_nested_engine_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flowloom.toml");
        std::fs::write(
            &path,
            "state_path = \"/tmp/state\"\n[engine]\nsandbox_timeout_ms = 250\n[model]\nmodel = \"local\"\n",
        )
        .unwrap();

        let config = RunnerConfig::load(&path).unwrap();
        assert_eq!(config.state_path, PathBuf::from("/tmp/state"));
        assert_eq!(config.engine.sandbox_timeout_ms, 250);
        assert_eq!(config.engine.run_log_capacity, 50);
        assert_eq!(config.model.model, "local");
    }
}
