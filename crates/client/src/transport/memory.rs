//! In-process loopback transport.
//!
//! [`pair`] returns a client-side [`Channel`] plus a [`MemoryPeer`] that plays
//! the remote session: it pushes frames to the client, closes with any code,
//! and records every call the client made on its sink. Like a real
//! WebSocket peer it answers a normal close with a normal close, unless told
//! to withhold the reply.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use protocol::CloseKind;
use tokio::sync::mpsc;
use url::Url;

use super::{Channel, ChannelClosed, ConnectError, Connector, FrameSink, FrameSource, SendError};

/// A call the client made on its sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Send(String),
    CloseNormal,
    CloseAbnormal(String),
    AcknowledgeClose,
}

#[derive(Debug)]
enum Inbound {
    Frame(String),
    Close(ChannelClosed),
}

#[derive(Debug, Default)]
struct PeerFlags {
    fail_sends: AtomicBool,
    withhold_close_reply: AtomicBool,
}

/// Creates a connected client channel and its peer.
pub fn pair() -> (Channel<MemorySink, MemorySource>, MemoryPeer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (calls_tx, calls_rx) = mpsc::unbounded_channel();
    let flags = Arc::new(PeerFlags::default());

    let sink = MemorySink {
        calls: calls_tx,
        loopback: inbound_tx.clone(),
        flags: flags.clone(),
        closed: false,
    };
    let source = MemorySource {
        frames: inbound_rx,
        closed: None,
    };
    let peer = MemoryPeer {
        to_client: inbound_tx,
        calls: calls_rx,
        flags,
    };

    (Channel::new(sink, source), peer)
}

/// Client-side writing half of a loopback channel.
#[derive(Debug)]
pub struct MemorySink {
    calls: mpsc::UnboundedSender<SinkCall>,
    loopback: mpsc::UnboundedSender<Inbound>,
    flags: Arc<PeerFlags>,
    closed: bool,
}

impl FrameSink for MemorySink {
    async fn send(&mut self, text: String) -> Result<(), SendError> {
        if self.closed {
            return Err(SendError::Closed);
        }
        if self.flags.fail_sends.load(Ordering::SeqCst) {
            return Err(SendError::Transport("peer stopped reading".to_string()));
        }
        self.calls
            .send(SinkCall::Send(text))
            .map_err(|_| SendError::Transport("peer dropped".to_string()))
    }

    async fn close_normal(&mut self) -> Result<(), SendError> {
        if self.closed {
            return Err(SendError::Closed);
        }
        self.closed = true;
        let _ = self.calls.send(SinkCall::CloseNormal);

        if !self.flags.withhold_close_reply.load(Ordering::SeqCst) {
            let _ = self
                .loopback
                .send(Inbound::Close(ChannelClosed::new(CloseKind::Normal, "")));
        }
        Ok(())
    }

    async fn close_abnormal(&mut self, reason: &str) {
        if !self.closed {
            self.closed = true;
            let _ = self.calls.send(SinkCall::CloseAbnormal(reason.to_string()));
        }
    }

    async fn acknowledge_close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.calls.send(SinkCall::AcknowledgeClose);
        }
    }
}

/// Client-side reading half of a loopback channel.
#[derive(Debug)]
pub struct MemorySource {
    frames: mpsc::UnboundedReceiver<Inbound>,
    closed: Option<ChannelClosed>,
}

impl FrameSource for MemorySource {
    async fn receive(&mut self) -> Result<String, ChannelClosed> {
        if let Some(closed) = &self.closed {
            return Err(closed.clone());
        }

        let closed = match self.frames.recv().await {
            Some(Inbound::Frame(text)) => return Ok(text),
            Some(Inbound::Close(closed)) => closed,
            None => ChannelClosed::abnormal("peer dropped without a close frame"),
        };
        self.closed = Some(closed.clone());
        Err(closed)
    }
}

/// Remote end of a loopback channel.
#[derive(Debug)]
pub struct MemoryPeer {
    to_client: mpsc::UnboundedSender<Inbound>,
    calls: mpsc::UnboundedReceiver<SinkCall>,
    flags: Arc<PeerFlags>,
}

impl MemoryPeer {
    /// Queues a text frame for the client.
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.to_client.send(Inbound::Frame(text.into()));
    }

    /// Queues a close frame with the given code.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.to_client.send(Inbound::Close(ChannelClosed::new(
            CloseKind::from_code(code),
            reason,
        )));
    }

    /// Makes every later client send fail with a transport error.
    pub fn fail_sends(&self) {
        self.flags.fail_sends.store(true, Ordering::SeqCst);
    }

    /// Stops answering the client's normal close.
    pub fn withhold_close_reply(&self) {
        self.flags.withhold_close_reply.store(true, Ordering::SeqCst);
    }

    /// Drains every call recorded so far.
    pub fn calls(&mut self) -> Vec<SinkCall> {
        let mut calls = Vec::new();
        while let Ok(call) = self.calls.try_recv() {
            calls.push(call);
        }
        calls
    }

    /// Waits for the next recorded call.
    pub async fn next_call(&mut self) -> Option<SinkCall> {
        self.calls.recv().await
    }
}

/// Connector handing out prepared loopback channels in order.
///
/// Each `open` records the requested URL and pops the next prepared
/// outcome. With nothing prepared, `open` fails with `Refused`.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    outcomes: Mutex<VecDeque<Result<Channel<MemorySink, MemorySource>, ConnectError>>>,
    opened: Mutex<Vec<Url>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepares a successful open and returns the peer for it.
    pub fn accept(&self) -> MemoryPeer {
        let (channel, peer) = pair();
        self.push_outcome(Ok(channel));
        peer
    }

    /// Prepares a failed open.
    pub fn reject(&self, err: ConnectError) {
        self.push_outcome(Err(err));
    }

    /// URLs passed to `open`, in call order.
    pub fn opened(&self) -> Vec<Url> {
        self.opened.lock().map(|urls| urls.clone()).unwrap_or_default()
    }

    fn push_outcome(&self, outcome: Result<Channel<MemorySink, MemorySource>, ConnectError>) {
        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.push_back(outcome);
        }
    }
}

impl Connector for MemoryConnector {
    type Sink = MemorySink;
    type Source = MemorySource;

    async fn open(&self, url: &Url) -> Result<Channel<MemorySink, MemorySource>, ConnectError> {
        if let Ok(mut opened) = self.opened.lock() {
            opened.push(url.clone());
        }

        let next = self
            .outcomes
            .lock()
            .ok()
            .and_then(|mut outcomes| outcomes.pop_front());

        next.unwrap_or_else(|| Err(ConnectError::Refused(format!("nothing listening at {}", url))))
    }
}
