//! Locally tracked session state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use protocol::{LifecycleEvent, SessionId, SessionInfo, SessionState, SessionStatus};

/// Current time as Unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Shared last-activity timestamp.
///
/// Clones share the same value. Updates never move it backwards, so
/// concurrent readers and writers on both bridge directions always observe
/// a non-decreasing timestamp.
#[derive(Debug, Clone, Default)]
pub struct ActivityClock(Arc<AtomicU64>);

impl ActivityClock {
    pub fn new(initial: u64) -> Self {
        Self(Arc::new(AtomicU64::new(initial)))
    }

    /// Records activity now and returns the resulting timestamp.
    pub fn touch(&self) -> u64 {
        self.touch_at(unix_now())
    }

    /// Records activity at `secs`, ignoring values older than the current one.
    pub fn touch_at(&self, secs: u64) -> u64 {
        self.0.fetch_max(secs, Ordering::AcqRel).max(secs)
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

/// A session known to this process.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    id: SessionId,
    state: SessionState,
    description: String,
    created_at: u64,
    activity: ActivityClock,
}

impl SessionRecord {
    /// A freshly created session.
    pub fn new(id: SessionId, description: String, created_at: u64) -> Self {
        Self {
            id,
            state: SessionState::Created,
            description,
            created_at,
            activity: ActivityClock::new(created_at),
        }
    }

    /// Starts tracking a session first seen in the registry.
    pub fn from_info(info: &SessionInfo) -> Self {
        Self {
            id: info.id.clone(),
            state: info.state,
            description: info.description.clone(),
            created_at: info.created_at,
            activity: ActivityClock::new(info.last_activity),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn last_activity(&self) -> u64 {
        self.activity.get()
    }

    /// Handle to the activity clock, for the bridge to update.
    pub fn activity(&self) -> ActivityClock {
        self.activity.clone()
    }

    /// Applies a lifecycle event. On error the state is left unchanged.
    pub fn apply(&mut self, event: LifecycleEvent) -> protocol::Result<SessionState> {
        self.state = self.state.apply(event)?;
        Ok(self.state)
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            created_at: self.created_at,
            last_activity: self.last_activity(),
        }
    }
}
