//! Script sandbox for `code` nodes.
//!
//! Scripts run in a fresh boa JavaScript context per invocation on a
//! blocking thread. The script sees a deep copy of the item payload as
//! `$json` and may assign `result`; falling through without a result
//! returns the (possibly mutated) `$json`.
//!
//! This isolates variables, not capabilities. The wall-clock bound is
//! enforced with `tokio::time::timeout`; a loop iteration limit makes the
//! abandoned thread stop eventually.

use crate::error::SandboxError;
use boa_engine::{Context, Source};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::debug;

/// Runs user scripts with a timeout.
#[derive(Debug, Clone)]
pub struct ScriptSandbox {
    timeout: Duration,
    loop_limit: u64,
}

impl ScriptSandbox {
    /// Creates a sandbox with a wall-clock bound and loop iteration limit.
    #[must_use]
    pub fn new(timeout: Duration, loop_limit: u64) -> Self {
        Self {
            timeout,
            loop_limit,
        }
    }

    /// Returns the wall-clock bound.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `script` against an item payload.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the script exceeds the bound, `Script` if it
    /// throws, and `InvalidOutput` if its result is not JSON-representable.
    pub async fn run(&self, script: &str, input: &JsonValue) -> Result<JsonValue, SandboxError> {
        let source = wrap_script(script, input)?;
        let loop_limit = self.loop_limit;
        let task = tokio::task::spawn_blocking(move || execute(&source, loop_limit));

        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(SandboxError::Internal {
                reason: e.to_string(),
            }),
            Err(_) => {
                debug!(timeout_ms, "script exceeded its time bound");
                Err(SandboxError::Timeout { timeout_ms })
            }
        }
    }
}

fn wrap_script(script: &str, input: &JsonValue) -> Result<String, SandboxError> {
    let input_json = serde_json::to_string(input).map_err(|e| SandboxError::InvalidOutput {
        reason: e.to_string(),
    })?;
    Ok(format!(
        r#"
var $json = {input_json};
var result = undefined;
var __out = (function() {{
{script}
;
    return result !== undefined ? result : $json;
}})();
JSON.stringify({{ "output": __out === undefined ? null : __out }});
"#
    ))
}

fn execute(source: &str, loop_limit: u64) -> Result<JsonValue, SandboxError> {
    let mut context = Context::default();
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(loop_limit);

    let value = context
        .eval(Source::from_bytes(source))
        .map_err(|e| SandboxError::Script {
            message: e.to_string(),
        })?;

    let text = value
        .as_string()
        .map(|s| s.to_std_string_escaped())
        .ok_or_else(|| SandboxError::InvalidOutput {
            reason: "script result is not serializable".to_string(),
        })?;

    let mut wrapper: JsonValue =
        serde_json::from_str(&text).map_err(|e| SandboxError::InvalidOutput {
            reason: e.to_string(),
        })?;
    Ok(wrapper
        .get_mut("output")
        .map(JsonValue::take)
        .unwrap_or(JsonValue::Null))
}
