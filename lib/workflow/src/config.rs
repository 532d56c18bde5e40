//! Engine configuration.
//!
//! Loaded by the runner through the `config` crate; every field has a
//! default so an empty source yields a working engine.

use serde::Deserialize;
use std::time::Duration;

/// Tunables for the execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Wall-clock bound for one script sandbox invocation.
    #[serde(default = "default_sandbox_timeout_ms")]
    pub sandbox_timeout_ms: u64,

    /// Bound for HTTP, model and remote-shell calls.
    #[serde(default = "default_external_call_timeout_ms")]
    pub external_call_timeout_ms: u64,

    /// Number of run records retained; the oldest is evicted first.
    #[serde(default = "default_run_log_capacity")]
    pub run_log_capacity: usize,

    /// Maximum node executions in one run. Guards against cyclic graphs.
    #[serde(default = "default_max_steps_per_run")]
    pub max_steps_per_run: usize,

    /// Default memory window when a memory node does not set one.
    #[serde(default = "default_memory_window")]
    pub memory_window: usize,

    /// Iteration cap for any single loop in a script. Stops scripts that
    /// outlive their timeout.
    #[serde(default = "default_script_loop_limit")]
    pub script_loop_limit: u64,

    /// Artificial delay before each node executes, for visual stepping.
    #[serde(default)]
    pub node_delay_ms: u64,

    /// Buffered engine events per subscriber before lagging.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_sandbox_timeout_ms() -> u64 {
    2000
}

fn default_external_call_timeout_ms() -> u64 {
    30_000
}

fn default_run_log_capacity() -> usize {
    50
}

fn default_max_steps_per_run() -> usize {
    1000
}

fn default_memory_window() -> usize {
    10
}

fn default_script_loop_limit() -> u64 {
    50_000_000
}

fn default_event_buffer() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sandbox_timeout_ms: default_sandbox_timeout_ms(),
            external_call_timeout_ms: default_external_call_timeout_ms(),
            run_log_capacity: default_run_log_capacity(),
            max_steps_per_run: default_max_steps_per_run(),
            memory_window: default_memory_window(),
            script_loop_limit: default_script_loop_limit(),
            node_delay_ms: 0,
            event_buffer: default_event_buffer(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn sandbox_timeout(&self) -> Duration {
        Duration::from_millis(self.sandbox_timeout_ms)
    }

    #[must_use]
    pub fn external_call_timeout(&self) -> Duration {
        Duration::from_millis(self.external_call_timeout_ms)
    }

    #[must_use]
    pub fn node_delay(&self) -> Duration {
        Duration::from_millis(self.node_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_has_correct_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.sandbox_timeout_ms, 2000);
        assert_eq!(config.external_call_timeout_ms, 30_000);
        assert_eq!(config.run_log_capacity, 50);
        assert_eq!(config.memory_window, 10);
        assert_eq!(config.node_delay(), Duration::ZERO);
    }

    #[test]
    fn partial_source_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"sandbox_timeout_ms": 500}"#).expect("deserialize");
        assert_eq!(config.sandbox_timeout(), Duration::from_millis(500));
        assert_eq!(config.max_steps_per_run, 1000);
    }
}
