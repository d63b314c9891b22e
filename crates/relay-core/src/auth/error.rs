use thiserror::Error;

use crate::config::ConfigError;
use crate::gateway::GatewayError;

/// Errors surfaced by session and client-storage routines.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("credential is empty")]
    EmptyCredential,
    #[error("failed to authenticate: {0}")]
    SignIn(#[source] GatewayError),
    #[error("not authenticated")]
    NotAuthenticated,
}
