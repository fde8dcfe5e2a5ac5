//! In-process session registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;
use protocol::{LogEntry, Origin, SessionId, SessionInfo, SessionState, SessionStatus};
use uuid::Uuid;

use super::{RegistryError, SessionRegistry};
use crate::session::unix_now;

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    info: SessionInfo,
    logs: Vec<LogEntry>,
}

/// Registry kept entirely in memory.
///
/// Deleted sessions stay in the map in the `Deleted` state so a second
/// delete reports `AlreadyDeleted`; they no longer appear in listings.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    sessions: DashMap<SessionId, Entry>,
    next_seq: AtomicU64,
    rejection: Mutex<Option<String>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session as-is, as if another client had created it.
    pub fn insert(&self, info: SessionInfo) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.sessions.insert(
            info.id.clone(),
            Entry {
                seq,
                info,
                logs: Vec::new(),
            },
        );
    }

    /// Appends a log line to a session.
    pub fn append_log(&self, id: &str, timestamp: u64, message: impl Into<String>) -> bool {
        match self.sessions.get_mut(id) {
            Some(mut entry) => {
                entry.logs.push(LogEntry {
                    timestamp,
                    message: message.into(),
                });
                true
            }
            None => false,
        }
    }

    /// Makes every later create fail with `Rejected(message)`.
    pub fn reject_creates(&self, message: impl Into<String>) {
        if let Ok(mut rejection) = self.rejection.lock() {
            *rejection = Some(message.into());
        }
    }

    /// Number of sessions, including deleted ones.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn live_entry(&self, id: &str) -> Result<Entry, RegistryError> {
        let entry = self
            .sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        if entry.info.state == SessionState::Deleted {
            return Err(RegistryError::AlreadyDeleted(id.to_string()));
        }
        Ok(entry)
    }
}

impl SessionRegistry for InMemoryRegistry {
    async fn create_session(&self, origin: &Origin) -> Result<SessionId, RegistryError> {
        let rejection = self.rejection.lock().ok().and_then(|r| r.clone());
        if let Some(message) = rejection {
            return Err(RegistryError::Rejected(message));
        }

        let id = format!("session-{}", Uuid::new_v4());
        let now = unix_now();
        self.insert(SessionInfo {
            id: id.clone(),
            state: SessionState::Created,
            description: origin.description().to_string(),
            created_at: now,
            last_activity: now,
        });

        tracing::debug!(session_id = %id, "Registered session in memory");
        Ok(id)
    }

    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, RegistryError> {
        let mut entries: Vec<(u64, SessionInfo)> = self
            .sessions
            .iter()
            .filter(|entry| entry.info.state != SessionState::Deleted)
            .map(|entry| (entry.seq, entry.info.clone()))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);

        Ok(entries.into_iter().map(|(_, info)| info).collect())
    }

    async fn get_status(&self, id: &str) -> Result<SessionStatus, RegistryError> {
        self.live_entry(id).map(|entry| entry.info.status())
    }

    async fn delete_session(&self, id: &str) -> Result<(), RegistryError> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        if entry.info.state == SessionState::Deleted {
            return Err(RegistryError::AlreadyDeleted(id.to_string()));
        }
        entry.info.state = SessionState::Deleted;
        Ok(())
    }

    async fn fetch_logs(
        &self,
        id: &str,
        tail: Option<usize>,
    ) -> Result<Vec<LogEntry>, RegistryError> {
        let logs = self.live_entry(id)?.logs;
        let skip = tail.map_or(0, |tail| logs.len().saturating_sub(tail));
        Ok(logs.into_iter().skip(skip).collect())
    }
}
