//! Session lifecycle state machine.
//!
//! A session moves through a small set of states as the client connects to
//! it, loses the connection, and finally deletes it:
//!
//! ```text
//!   Created ──connect──▶ Connecting ──ok──▶ Connected
//!                          ▲    │                │
//!                  connect │    │ failed         │ closed
//!                          │    ▼                ▼
//!                        Disconnected ◀──────────┘
//!
//!   any state except Deleted ──delete──▶ Deleted
//! ```
//!
//! `Deleted` is terminal: every event applied to it is rejected.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Registered with the registry, never connected.
    Created,
    /// A handshake is in progress.
    Connecting,
    /// A connection is live.
    Connected,
    /// The last connection ended or the handshake failed.
    Disconnected,
    /// The session was deleted. Terminal.
    Deleted,
}

/// Events that drive [`SessionState`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// The client starts opening a connection.
    ConnectAttempt,
    /// The handshake completed.
    HandshakeSucceeded,
    /// The handshake failed or timed out.
    HandshakeFailed,
    /// A live connection ended, for any reason.
    Closed,
    /// The session was deleted.
    Delete,
}

impl SessionState {
    /// All states, in declaration order.
    pub const ALL: [SessionState; 5] = [
        SessionState::Created,
        SessionState::Connecting,
        SessionState::Connected,
        SessionState::Disconnected,
        SessionState::Deleted,
    ];

    /// Returns the state reached by applying `event`, or an error if the
    /// event is not valid in this state.
    pub fn apply(self, event: LifecycleEvent) -> Result<SessionState> {
        use LifecycleEvent::*;
        use SessionState::*;

        let next = match (self, event) {
            (Deleted, _) => None,
            (_, Delete) => Some(Deleted),
            (Created | Disconnected, ConnectAttempt) => Some(Connecting),
            (Connecting, HandshakeSucceeded) => Some(Connected),
            (Connecting, HandshakeFailed) => Some(Disconnected),
            (Connected, Closed) => Some(Disconnected),
            _ => None,
        };

        next.ok_or(ProtocolError::InvalidTransition { from: self, event })
    }

    /// Whether a connection may be attempted from this state.
    pub fn can_connect(self) -> bool {
        self.apply(LifecycleEvent::ConnectAttempt).is_ok()
    }

    /// Whether this is the terminal state.
    pub fn is_terminal(self) -> bool {
        self == SessionState::Deleted
    }

    /// Lowercase name used on the wire and in CLI output.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnected => "disconnected",
            SessionState::Deleted => "deleted",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleEvent::ConnectAttempt => "connect attempt",
            LifecycleEvent::HandshakeSucceeded => "handshake success",
            LifecycleEvent::HandshakeFailed => "handshake failure",
            LifecycleEvent::Closed => "connection close",
            LifecycleEvent::Delete => "delete",
        };
        f.write_str(name)
    }
}
