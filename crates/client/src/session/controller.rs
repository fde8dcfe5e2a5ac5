//! Session lifecycle controller.
//!
//! The controller ties the registry, the transport and the bridge together.
//! It keeps a local record for every session this process has created,
//! connected to or deleted, and drives each record through the lifecycle
//! state machine.

use dashmap::DashMap;
use protocol::{
    LifecycleEvent, LogEntry, Origin, ProtocolError, SessionId, SessionInfo, SessionState,
    SessionStatus,
};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncWrite};
use url::Url;

use super::record::{unix_now, ActivityClock, SessionRecord};
use crate::bridge::{BridgeConfig, BridgeReport, DuplexBridge};
use crate::registry::{RegistryError, SessionRegistry};
use crate::transport::{connect_url, Channel, ConnectError, Connector};

/// Errors returned by lifecycle operations.
#[derive(Debug, Error, PartialEq)]
pub enum LifecycleError {
    #[error("session not found: {0}")]
    NotFound(SessionId),

    #[error("session already deleted: {0}")]
    AlreadyDeleted(SessionId),

    #[error("no sessions found")]
    NoSessions,

    #[error("failed to create session: {0}")]
    Create(RegistryError),

    #[error("failed to connect: {0}")]
    Connect(ConnectError),

    #[error(transparent)]
    InvalidTransition(ProtocolError),

    #[error(transparent)]
    Registry(RegistryError),
}

impl From<RegistryError> for LifecycleError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => LifecycleError::NotFound(id),
            RegistryError::AlreadyDeleted(id) => LifecycleError::AlreadyDeleted(id),
            other => LifecycleError::Registry(other),
        }
    }
}

/// Controller configuration, resolved once by the caller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Registry base address; connect endpoints are derived from it.
    pub api_url: Url,
    pub bridge: BridgeConfig,
}

impl ControllerConfig {
    pub fn new(api_url: Url) -> Self {
        Self {
            api_url,
            bridge: BridgeConfig::default(),
        }
    }

    pub fn with_bridge(mut self, bridge: BridgeConfig) -> Self {
        self.bridge = bridge;
        self
    }
}

/// Creates, connects to, inspects and deletes sessions.
pub struct SessionController<R, C> {
    registry: R,
    connector: C,
    config: ControllerConfig,
    sessions: DashMap<SessionId, SessionRecord>,
}

impl<R, C> SessionController<R, C>
where
    R: SessionRegistry,
    C: Connector,
{
    pub fn new(registry: R, connector: C, config: ControllerConfig) -> Self {
        Self {
            registry,
            connector,
            config,
            sessions: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Snapshot of a locally tracked session, if any.
    pub fn local_record(&self, id: &str) -> Option<SessionRecord> {
        self.sessions.get(id).map(|record| record.value().clone())
    }

    /// Registers a new session.
    pub async fn create(&self, origin: &Origin) -> Result<SessionRecord, LifecycleError> {
        let id = self
            .registry
            .create_session(origin)
            .await
            .map_err(LifecycleError::Create)?;

        let record = SessionRecord::new(id.clone(), origin.description().to_string(), unix_now());
        self.sessions.insert(id.clone(), record.clone());

        tracing::info!(session_id = %id, origin = %origin.description(), "Session created");
        Ok(record)
    }

    /// Connects to a session and bridges `input`/`output` to it until the
    /// session ends.
    ///
    /// A failed handshake leaves the session `Disconnected`; so does the end
    /// of a bridged session, however it ended.
    pub async fn connect<I, O>(
        &self,
        id: &str,
        input: I,
        output: O,
    ) -> Result<BridgeReport, LifecycleError>
    where
        I: AsyncBufRead + Unpin + Send + 'static,
        O: AsyncWrite + Unpin + Send + 'static,
    {
        self.attach(id).await?.run(input, output).await
    }

    /// Opens a connection to a session without bridging it yet.
    ///
    /// The session is `Connected` while the returned [`Attachment`] lives.
    pub async fn attach(&self, id: &str) -> Result<Attachment<'_, R, C>, LifecycleError> {
        let activity = self.begin_connect(id).await?;

        let opened = match connect_url(&self.config.api_url, id) {
            Ok(url) => {
                tracing::info!(session_id = %id, "Connecting to {}", url);
                self.connector.open(&url).await
            }
            Err(e) => Err(e),
        };

        let channel = match opened {
            Ok(channel) => channel,
            Err(e) => {
                tracing::warn!(session_id = %id, "Handshake failed: {}", e);
                self.transition(id, LifecycleEvent::HandshakeFailed)?;
                return Err(LifecycleError::Connect(e));
            }
        };

        self.transition(id, LifecycleEvent::HandshakeSucceeded)?;
        activity.touch();

        Ok(Attachment {
            channel,
            activity,
            bridge: self.config.bridge.clone(),
            guard: CloseGuard {
                controller: self,
                id: id.to_string(),
                armed: true,
            },
        })
    }

    /// Status of a session. Never changes any state.
    pub async fn status(&self, id: &str) -> Result<SessionStatus, LifecycleError> {
        if let Some(record) = self.sessions.get(id) {
            return Ok(record.status());
        }
        Ok(self.registry.get_status(id).await?)
    }

    /// All sessions in registry order, with locally tracked state overlaid.
    /// Never changes any state.
    pub async fn list(&self) -> Result<Vec<SessionInfo>, LifecycleError> {
        let mut sessions = self
            .registry
            .list_sessions()
            .await
            .map_err(LifecycleError::Registry)?;

        for info in &mut sessions {
            if let Some(record) = self.sessions.get(&info.id) {
                info.state = record.state();
                info.last_activity = info.last_activity.max(record.last_activity());
            }
        }

        Ok(sessions)
    }

    /// Deletes a session. Deleting twice fails with `AlreadyDeleted`.
    pub async fn delete(&self, id: &str) -> Result<(), LifecycleError> {
        if self.state_of(id) == Some(SessionState::Deleted) {
            return Err(LifecycleError::AlreadyDeleted(id.to_string()));
        }

        match self.registry.delete_session(id).await {
            Ok(()) => {}
            Err(RegistryError::AlreadyDeleted(id)) => {
                self.mark_deleted(&id);
                return Err(LifecycleError::AlreadyDeleted(id));
            }
            Err(e) => return Err(e.into()),
        }

        self.mark_deleted(id);
        tracing::info!(session_id = %id, "Session deleted");
        Ok(())
    }

    /// Id of the session created last.
    pub async fn most_recent(&self) -> Result<SessionId, LifecycleError> {
        self.list()
            .await?
            .into_iter()
            .max_by_key(|info| info.created_at)
            .map(|info| info.id)
            .ok_or(LifecycleError::NoSessions)
    }

    /// Log entries of a session, optionally only the last `tail`.
    pub async fn logs(&self, id: &str, tail: Option<usize>) -> Result<Vec<LogEntry>, LifecycleError> {
        Ok(self.registry.fetch_logs(id, tail).await?)
    }

    fn state_of(&self, id: &str) -> Option<SessionState> {
        self.sessions.get(id).map(|record| record.state())
    }

    /// Moves the session to `Connecting`, tracking it first if needed.
    async fn begin_connect(&self, id: &str) -> Result<ActivityClock, LifecycleError> {
        match self.state_of(id) {
            Some(state) if state.is_terminal() => {
                return Err(LifecycleError::AlreadyDeleted(id.to_string()))
            }
            Some(_) => {}
            None => {
                let status = self.registry.get_status(id).await?;
                if status.state.is_terminal() {
                    return Err(LifecycleError::AlreadyDeleted(id.to_string()));
                }
                // A session live elsewhere is reconnectable from here
                let state = if status.state.can_connect() {
                    status.state
                } else {
                    SessionState::Disconnected
                };
                let info = SessionInfo {
                    id: id.to_string(),
                    state,
                    description: String::new(),
                    created_at: status.created_at,
                    last_activity: status.last_activity,
                };
                self.sessions
                    .entry(id.to_string())
                    .or_insert_with(|| SessionRecord::from_info(&info));
            }
        }

        self.transition(id, LifecycleEvent::ConnectAttempt)?;
        self.sessions
            .get(id)
            .map(|record| record.activity())
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))
    }

    fn transition(&self, id: &str, event: LifecycleEvent) -> Result<SessionState, LifecycleError> {
        let mut record = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;

        let from = record.state();
        let to = record
            .apply(event)
            .map_err(LifecycleError::InvalidTransition)?;

        tracing::debug!(session_id = %id, %from, %to, "Session state changed on {}", event);
        Ok(to)
    }

    /// Records the end of a connection. A concurrent delete wins.
    fn close_record(&self, id: &str) -> Result<(), LifecycleError> {
        if self.state_of(id) != Some(SessionState::Deleted) {
            self.transition(id, LifecycleEvent::Closed)?;
        }
        Ok(())
    }

    fn mark_deleted(&self, id: &str) {
        let mut record = self
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| SessionRecord::new(id.to_string(), String::new(), 0));
        let _ = record.apply(LifecycleEvent::Delete);
    }
}

/// An open connection to a session, ready to be bridged.
pub struct Attachment<'a, R, C>
where
    R: SessionRegistry,
    C: Connector,
{
    channel: Channel<C::Sink, C::Source>,
    activity: ActivityClock,
    bridge: BridgeConfig,
    guard: CloseGuard<'a, R, C>,
}

impl<R, C> Attachment<'_, R, C>
where
    R: SessionRegistry,
    C: Connector,
{
    pub fn session_id(&self) -> &str {
        &self.guard.id
    }

    /// Bridges `input`/`output` to the session until it ends, then marks it
    /// `Disconnected`.
    pub async fn run<I, O>(self, input: I, output: O) -> Result<BridgeReport, LifecycleError>
    where
        I: AsyncBufRead + Unpin + Send + 'static,
        O: AsyncWrite + Unpin + Send + 'static,
    {
        let Attachment {
            channel,
            activity,
            bridge,
            guard,
        } = self;
        let id = guard.id.clone();

        let report = DuplexBridge::new(bridge, activity)
            .run(channel, input, output)
            .await;
        guard.finish()?;

        tracing::info!(
            session_id = %id,
            frames_sent = report.frames_sent,
            frames_received = report.frames_received,
            "Session disconnected"
        );
        Ok(report)
    }
}

/// Marks the session closed when an attachment goes away.
struct CloseGuard<'a, R, C>
where
    R: SessionRegistry,
    C: Connector,
{
    controller: &'a SessionController<R, C>,
    id: SessionId,
    armed: bool,
}

impl<R, C> CloseGuard<'_, R, C>
where
    R: SessionRegistry,
    C: Connector,
{
    fn finish(mut self) -> Result<(), LifecycleError> {
        self.armed = false;
        self.controller.close_record(&self.id)
    }
}

impl<R, C> Drop for CloseGuard<'_, R, C>
where
    R: SessionRegistry,
    C: Connector,
{
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.controller.close_record(&self.id) {
                tracing::warn!(session_id = %self.id, "Failed to close session record: {}", e);
            }
        }
    }
}
