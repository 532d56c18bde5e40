//! Integration layer for flowloom.
//!
//! This crate provides the external collaborators the engine calls into:
//!
//! - **Credential vault**: Lookup of stored secrets by credential id
//! - **HTTP client**: Outbound HTTP requests for `http-request` nodes
//! - **Remote shell**: Command execution on remote hosts for `ssh` nodes
//!
//! Each collaborator is a trait so the engine can be driven by mocks in
//! tests and by the real implementations in the runner.

pub mod credential;
pub mod error;
pub mod http;
pub mod shell;

pub use credential::{Credential, CredentialStatus, CredentialType, CredentialVault, InMemoryVault};
pub use error::{ConnectorError, CredentialError};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use shell::{OpenSshShell, RemoteShell, ShellOutput, ShellTarget};
