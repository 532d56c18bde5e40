//! Error types for the integration crate.
//!
//! - `ConnectorError`: Failures talking to an external service
//! - `CredentialError`: Failures looking up or storing credentials

use flowloom_core::CredentialId;
use std::fmt;

/// Errors from connector operations (HTTP, remote shell).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    /// Connection to service failed.
    ConnectionFailed { reason: String },
    /// Authentication failed.
    AuthenticationFailed { reason: String },
    /// Invalid request parameters.
    InvalidRequest { reason: String },
    /// Protocol error.
    ProtocolError { reason: String },
    /// Timeout waiting for response.
    Timeout,
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { reason } => {
                write!(f, "connection failed: {reason}")
            }
            Self::AuthenticationFailed { reason } => {
                write!(f, "authentication failed: {reason}")
            }
            Self::InvalidRequest { reason } => {
                write!(f, "invalid request: {reason}")
            }
            Self::ProtocolError { reason } => {
                write!(f, "protocol error: {reason}")
            }
            Self::Timeout => write!(f, "operation timed out"),
        }
    }
}

impl std::error::Error for ConnectorError {}

/// Errors from credential operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// Credential not found.
    NotFound { id: CredentialId },
    /// The credential exists but lacks a secret the caller needs.
    MissingSecret { id: CredentialId, key: String },
    /// The credential has been marked invalid.
    Invalid { id: CredentialId },
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => {
                write!(f, "credential not found: {id}")
            }
            Self::MissingSecret { id, key } => {
                write!(f, "credential {id} has no '{key}' secret")
            }
            Self::Invalid { id } => {
                write!(f, "credential {id} is marked invalid")
            }
        }
    }
}

impl std::error::Error for CredentialError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_error_display() {
        let err = ConnectorError::ConnectionFailed {
            reason: "host unreachable".to_string(),
        };
        assert!(err.to_string().contains("connection failed"));
        assert!(err.to_string().contains("host unreachable"));
    }

    #[test]
    fn credential_error_display() {
        let id = CredentialId::new();
        let err = CredentialError::NotFound { id };
        assert!(err.to_string().contains("credential not found"));

        let err = CredentialError::MissingSecret {
            id,
            key: "username".to_string(),
        };
        assert!(err.to_string().contains("'username'"));
    }
}
