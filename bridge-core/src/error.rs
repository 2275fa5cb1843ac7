// ABOUTME: Error taxonomy for the bridge, split by how the relay reacts to each kind
// ABOUTME: Config and registration errors are fatal at startup, the rest are scoped and logged

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Invalid or missing configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// The application-service registration handshake failed. Fatal at startup.
    #[error("registration with homeserver failed: {0}")]
    Registration(String),

    /// Opening an IRC connection failed. Scoped to the session being created.
    #[error("failed to connect {nick} to {addr}: {reason}")]
    Connect {
        nick: String,
        addr: String,
        reason: String,
    },

    /// A network call failed after the connection was established.
    #[error("transport error: {0}")]
    Transport(String),

    /// An inbound event could not be decoded or lacks a required field.
    #[error("malformed event: {0}")]
    MalformedEvent(String),
}

impl BridgeError {
    /// Short label used for the `kind` dimension of the error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::Config(_) => "config",
            BridgeError::Registration(_) => "registration",
            BridgeError::Connect { .. } => "connect",
            BridgeError::Transport(_) => "transport",
            BridgeError::MalformedEvent(_) => "malformed_event",
        }
    }

    /// Whether the process must stop when this error is raised.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BridgeError::Config(_) | BridgeError::Registration(_))
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
