//! Transport channel to a remote session.
//!
//! A [`Connector`] opens a [`Channel`] to a session's connect endpoint. The
//! channel is split into two halves so that one task can write while another
//! reads, without any locking between them:
//!
//! - [`FrameSink`]: sends text frames and closes the connection
//! - [`FrameSource`]: receives text frames until the connection closes
//!
//! Two implementations exist: [`websocket::WebSocketConnector`] for real
//! connections and [`memory::pair`] for in-process loopback.

pub mod memory;
pub mod websocket;

use std::future::Future;
use std::time::Duration;

use protocol::{validate_session_id, CloseKind};
use thiserror::Error;
use url::Url;

pub use memory::{MemoryConnector, MemoryPeer, MemorySink, MemorySource, SinkCall};
pub use websocket::{WebSocketConnector, WebSocketSink, WebSocketSource};

/// Errors that can occur while opening a channel.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConnectError {
    /// The handshake did not complete in time.
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    /// The endpoint could not be reached.
    #[error("connection refused: {0}")]
    Refused(String),

    /// The endpoint answered but not with a usable WebSocket.
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),
}

/// Errors returned when sending on a [`FrameSink`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SendError {
    /// The sink was already closed.
    #[error("channel is closed")]
    Closed,

    /// Writing to the underlying transport failed.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Terminal result of a [`FrameSource`].
#[derive(Debug, Clone, Error, PartialEq)]
#[error("channel closed with {kind}: {reason}")]
pub struct ChannelClosed {
    /// Classified close code.
    pub kind: CloseKind,
    /// Close reason or transport error text.
    pub reason: String,
}

impl ChannelClosed {
    pub fn new(kind: CloseKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    /// Closure for a connection that ended without a close frame.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CloseKind::Abnormal, reason)
    }
}

/// Writing half of a channel.
pub trait FrameSink: Send {
    /// Sends one text frame.
    fn send(&mut self, text: String) -> impl Future<Output = Result<(), SendError>> + Send;

    /// Sends a close frame with code 1000.
    fn close_normal(&mut self) -> impl Future<Output = Result<(), SendError>> + Send;

    /// Marks the sink closed without a closing handshake.
    fn close_abnormal(&mut self, reason: &str) -> impl Future<Output = ()> + Send;

    /// Finishes a closing handshake the peer started by delivering the
    /// close reply. Does nothing if this side already closed.
    fn acknowledge_close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Reading half of a channel.
///
/// `receive` must be cancel-safe: dropping the future before it completes
/// loses no frame. Once it returns [`ChannelClosed`], every later call
/// returns it again.
pub trait FrameSource: Send {
    /// Waits for the next text frame.
    fn receive(&mut self) -> impl Future<Output = Result<String, ChannelClosed>> + Send;
}

/// Opens channels to session endpoints.
pub trait Connector: Send + Sync {
    type Sink: FrameSink + 'static;
    type Source: FrameSource + 'static;

    /// Opens a channel to `url`, bounded by the connector's handshake timeout.
    fn open(
        &self,
        url: &Url,
    ) -> impl Future<Output = Result<Channel<Self::Sink, Self::Source>, ConnectError>> + Send;
}

/// Both halves of one open connection.
#[derive(Debug)]
pub struct Channel<S, R> {
    pub sink: S,
    pub source: R,
}

impl<S, R> Channel<S, R> {
    pub fn new(sink: S, source: R) -> Self {
        Self { sink, source }
    }
}

/// Builds the connect endpoint for a session from the registry base address.
///
/// `https` maps to `wss` and `http` to `ws`. Any base path is kept, so
/// `https://host/v1` yields `wss://host/v1/sessions/<id>/connect`.
pub fn connect_url(api_url: &Url, session_id: &str) -> Result<Url, ConnectError> {
    validate_session_id(session_id).map_err(|e| ConnectError::ProtocolMismatch(e.to_string()))?;

    let scheme = match api_url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(ConnectError::ProtocolMismatch(format!(
                "unsupported api url scheme: {}",
                other
            )))
        }
    };

    let mut url = api_url.clone();
    url.set_scheme(scheme)
        .map_err(|_| ConnectError::ProtocolMismatch(format!("cannot use {} for {}", scheme, api_url)))?;
    url.set_query(None);
    url.set_fragment(None);

    url.path_segments_mut()
        .map_err(|_| ConnectError::ProtocolMismatch(format!("api url cannot be a base: {}", api_url)))?
        .pop_if_empty()
        .extend(["sessions", session_id, "connect"]);

    Ok(url)
}
