//! Message definitions exchanged with the session registry.
//!
//! All bodies are JSON. Timestamps are Unix seconds.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ProtocolError, Result};
use crate::state::SessionState;

/// Unique identifier for a session, assigned by the registry.
pub type SessionId = String;

/// Description used for sessions started from the local working directory.
pub const LOCAL_DESCRIPTION: &str = "local";

/// URL schemes accepted for repository origins.
const REPOSITORY_SCHEMES: &[&str] = &["http", "https", "git", "ssh"];

/// Checks that a session id can be embedded in a URL path segment.
pub fn validate_session_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| !c.is_whitespace() && !c.is_control() && c != '/' && c != '?' && c != '#');

    if valid {
        Ok(())
    } else {
        Err(ProtocolError::InvalidSessionId(id.to_string()))
    }
}

/// Where the code for a new session comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Origin {
    /// A remote repository cloned by the registry.
    Repository {
        /// Normalized repository URL.
        url: String,
    },
    /// The local working directory.
    Local,
}

impl Origin {
    /// Builds a repository origin from user input.
    ///
    /// Scheme-less references such as `github.com/user/repo` are given an
    /// `https://` scheme; scp-style `git@host:path` references are kept
    /// verbatim.
    pub fn repository(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ProtocolError::InvalidOrigin(
                "repository reference is empty".to_string(),
            ));
        }

        if let Some((user_host, path)) = reference.split_once(':') {
            if user_host.contains('@') && !user_host.contains('/') && !path.starts_with("//") {
                if path.is_empty() {
                    return Err(ProtocolError::InvalidOrigin(reference.to_string()));
                }
                return Ok(Origin::Repository {
                    url: reference.to_string(),
                });
            }
        }

        let candidate = if reference.contains("://") {
            reference.to_string()
        } else {
            format!("https://{}", reference)
        };

        let url = Url::parse(&candidate)
            .map_err(|e| ProtocolError::InvalidOrigin(format!("{}: {}", reference, e)))?;

        if !REPOSITORY_SCHEMES.contains(&url.scheme()) {
            return Err(ProtocolError::InvalidOrigin(reference.to_string()));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(ProtocolError::InvalidOrigin(reference.to_string()));
        }

        Ok(Origin::Repository {
            url: url.to_string(),
        })
    }

    /// Human-readable description stored with the session.
    pub fn description(&self) -> &str {
        match self {
            Origin::Repository { url } => url,
            Origin::Local => LOCAL_DESCRIPTION,
        }
    }
}

/// Metadata for one session as reported by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Unique session identifier.
    pub id: SessionId,
    /// Lifecycle state.
    pub state: SessionState,
    /// Repository URL or `"local"`.
    pub description: String,
    /// Creation time.
    pub created_at: u64,
    /// Time of the last transport event.
    pub last_activity: u64,
}

impl SessionInfo {
    /// Returns the status snapshot of this session.
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            created_at: self.created_at,
            last_activity: self.last_activity,
        }
    }
}

/// Read-only snapshot of a session's state and timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Lifecycle state.
    pub state: SessionState,
    /// Creation time.
    pub created_at: u64,
    /// Time of the last transport event.
    pub last_activity: u64,
}

/// Body of `POST /sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// Source of the session's code.
    pub origin: Origin,
}

/// Response to `POST /sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    /// Identifier assigned by the registry.
    pub id: SessionId,
}

/// Error body returned by the registry on non-success statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub message: String,
}

/// One line of a session's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the line was produced.
    pub timestamp: u64,
    /// Log text, without trailing newline.
    pub message: String,
}
