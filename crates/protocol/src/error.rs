//! Error types for the protocol crate.

use thiserror::Error;

use crate::state::{LifecycleEvent, SessionState};

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    // Validation errors
    /// The session origin could not be understood.
    #[error("invalid origin: {0}")]
    InvalidOrigin(String),

    /// The session identifier is empty or contains forbidden characters.
    #[error("invalid session id: {0:?}")]
    InvalidSessionId(String),

    // Lifecycle errors
    /// The requested lifecycle event is not allowed in the current state.
    #[error("cannot apply {event} to a session in state {from}")]
    InvalidTransition {
        /// State the session was in.
        from: SessionState,
        /// Event that was rejected.
        event: LifecycleEvent,
    },
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
