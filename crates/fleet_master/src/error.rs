//! Error types for the master's registries and collaborators.

use fleet_protocol::{ProtocolError, ServiceState};

/// Failure of the durable group store.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("group document is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("persistence gateway is not connected")]
    NotConnected,
    #[error("persistence gateway unavailable: {0}")]
    Unavailable(String),
}

/// Failure to start or stop a service process.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("node '{0}' is not connected")]
    NodeUnavailable(String),
    #[error("launch rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error("group '{0}' already exists")]
    DuplicateName(String),
    #[error("group '{0}' does not exist")]
    NotFound(String),
    /// The definition breaks a group invariant
    #[error("invalid group: {0}")]
    Validation(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("service '{0}' does not exist")]
    NotFound(String),
    #[error("service '{service}' cannot move from {from} to {to}")]
    InvalidTransition {
        service: String,
        from: ServiceState,
        to: ServiceState,
    },
    #[error("no free port left for group '{0}'")]
    NoFreePort(String),
    #[error(transparent)]
    Launch(#[from] LaunchError),
}

/// Errors raised while running the master.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding or accepting on the listen socket failed
    #[error("network error: {0}")]
    Network(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
