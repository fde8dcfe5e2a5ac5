//! # VMShell Protocol Library
//!
//! This crate provides the types shared between the VMShell client and the
//! session registry it talks to.
//!
//! ## Overview
//!
//! - **Messages**: Session metadata, registry request/response bodies, log entries
//! - **Lifecycle**: The session state machine and the events that drive it
//! - **Close codes**: Classification of WebSocket closures into expected and unexpected
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{LifecycleEvent, Origin, SessionState};
//!
//! let origin = Origin::repository("github.com/user/repo").unwrap();
//! assert_eq!(origin.description(), "https://github.com/user/repo");
//!
//! let state = SessionState::Created
//!     .apply(LifecycleEvent::ConnectAttempt)
//!     .unwrap();
//! assert_eq!(state, SessionState::Connecting);
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Registry message definitions
//! - [`state`]: Session lifecycle state machine
//! - [`close`]: WebSocket close-code classification
//! - [`error`]: Error types

pub mod close;
pub mod error;
pub mod messages;
pub mod state;

pub use close::{CloseKind, ABNORMAL_CLOSURE, GOING_AWAY, NORMAL_CLOSURE};
pub use error::{ProtocolError, Result};
pub use messages::{
    validate_session_id, CreateSessionRequest, CreateSessionResponse, ErrorResponse, LogEntry,
    Origin, SessionId, SessionInfo, SessionStatus, LOCAL_DESCRIPTION,
};
pub use state::{LifecycleEvent, SessionState};
