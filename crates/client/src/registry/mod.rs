//! Session registry client.
//!
//! The registry owns the authoritative list of sessions. It assigns session
//! ids on creation and serves status, deletion and logs over a small REST
//! API. [`HttpRegistry`] talks to a real registry; [`InMemoryRegistry`]
//! keeps everything in process.

pub mod http;
pub mod memory;

use protocol::{LogEntry, Origin, SessionId, SessionInfo, SessionStatus};
use thiserror::Error;

pub use http::HttpRegistry;
pub use memory::InMemoryRegistry;

/// Errors returned by registry operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    /// No session with this id exists.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// The session was already deleted.
    #[error("session already deleted: {0}")]
    AlreadyDeleted(SessionId),

    /// The registry refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The registry answered with a status this client does not handle.
    #[error("unexpected registry response {status}: {message}")]
    Unexpected { status: u16, message: String },

    /// The request could not be sent or timed out.
    #[error("registry request failed: {0}")]
    Http(String),

    /// The response body could not be decoded.
    #[error("invalid registry response: {0}")]
    Decode(String),
}

/// Operations offered by a session registry.
#[allow(async_fn_in_trait)]
pub trait SessionRegistry: Send + Sync {
    /// Registers a new session and returns its id.
    async fn create_session(&self, origin: &Origin) -> Result<SessionId, RegistryError>;

    /// Lists all sessions, in registry order.
    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, RegistryError>;

    /// Returns the status of one session.
    async fn get_status(&self, id: &str) -> Result<SessionStatus, RegistryError>;

    /// Deletes a session.
    async fn delete_session(&self, id: &str) -> Result<(), RegistryError>;

    /// Returns the session's log, optionally only the last `tail` entries.
    async fn fetch_logs(&self, id: &str, tail: Option<usize>)
        -> Result<Vec<LogEntry>, RegistryError>;
}
