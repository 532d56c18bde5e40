//! Runner error types.

use flowloom_workflow::EngineError;
use std::fmt;

/// Errors reported by the runner commands.
#[derive(Debug)]
pub enum RunnerError {
    /// Configuration could not be loaded.
    Config { details: String },
    /// No workflow matches the given id or name.
    WorkflowNotFound { query: String },
    /// A workflow file could not be read or parsed.
    Import { path: String, details: String },
    /// Output could not be encoded.
    Output { details: String },
    /// The engine rejected an operation.
    Engine(EngineError),
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "configuration error: {details}"),
            Self::WorkflowNotFound { query } => {
                write!(f, "no workflow matches '{query}'")
            }
            Self::Import { path, details } => {
                write!(f, "cannot import '{path}': {details}")
            }
            Self::Output { details } => write!(f, "cannot encode output: {details}"),
            Self::Engine(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RunnerError {}

impl From<EngineError> for RunnerError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_display_unchanged() {
        let err = RunnerError::from(EngineError::RunInFlight);
        assert_eq!(err.to_string(), EngineError::RunInFlight.to_string());
    }
}
