//! WebSocket close-code classification.
//!
//! Only a normal closure (1000) counts as an expected end of a session.
//! Every other code, and a connection that drops without any close frame,
//! is reported to the user as a connection error.

use std::fmt;

/// Close code sent when the user ends the session.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code for an endpoint that is going away (server shutdown, navigation).
pub const GOING_AWAY: u16 = 1001;

/// Reserved code meaning the connection dropped without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Classified reason a channel closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseKind {
    /// Clean close with code 1000.
    Normal,
    /// The peer is going away (1001).
    GoingAway,
    /// No close frame was received, or the transport failed (1006).
    Abnormal,
    /// Any other close code.
    Other(u16),
}

impl CloseKind {
    /// Classifies a close code received in a close frame.
    pub fn from_code(code: u16) -> Self {
        match code {
            NORMAL_CLOSURE => CloseKind::Normal,
            GOING_AWAY => CloseKind::GoingAway,
            ABNORMAL_CLOSURE => CloseKind::Abnormal,
            other => CloseKind::Other(other),
        }
    }

    /// Numeric close code.
    pub fn code(self) -> u16 {
        match self {
            CloseKind::Normal => NORMAL_CLOSURE,
            CloseKind::GoingAway => GOING_AWAY,
            CloseKind::Abnormal => ABNORMAL_CLOSURE,
            CloseKind::Other(code) => code,
        }
    }

    /// Whether this closure should end the session silently.
    pub fn is_expected(self) -> bool {
        self == CloseKind::Normal
    }
}

impl fmt::Display for CloseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseKind::Normal => write!(f, "normal closure ({})", self.code()),
            CloseKind::GoingAway => write!(f, "going away ({})", self.code()),
            CloseKind::Abnormal => write!(f, "abnormal closure ({})", self.code()),
            CloseKind::Other(_) => write!(f, "close code {}", self.code()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_codes() {
        assert_eq!(CloseKind::from_code(1000), CloseKind::Normal);
        assert_eq!(CloseKind::from_code(1001), CloseKind::GoingAway);
        assert_eq!(CloseKind::from_code(1006), CloseKind::Abnormal);
        assert_eq!(CloseKind::from_code(1011), CloseKind::Other(1011));
    }

    #[test]
    fn test_code_matches_classification() {
        for code in [1000, 1001, 1006, 1008, 4000] {
            assert_eq!(CloseKind::from_code(code).code(), code);
        }
    }

    #[test]
    fn test_only_normal_is_expected() {
        assert!(CloseKind::Normal.is_expected());
        assert!(!CloseKind::GoingAway.is_expected());
        assert!(!CloseKind::Abnormal.is_expected());
        assert!(!CloseKind::Other(1011).is_expected());
    }

    #[test]
    fn test_display() {
        assert_eq!(CloseKind::GoingAway.to_string(), "going away (1001)");
        assert_eq!(CloseKind::Other(4001).to_string(), "close code 4001");
    }
}
