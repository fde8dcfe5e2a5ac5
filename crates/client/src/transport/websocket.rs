//! WebSocket transport built on tokio-tungstenite.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use protocol::CloseKind;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::{Channel, ChannelClosed, ConnectError, Connector, FrameSink, FrameSource, SendError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the peer sent a close frame without a status.
const NO_STATUS_RECEIVED: u16 = 1005;

/// Opens WebSocket channels with a bounded handshake.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    handshake_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Connector for WebSocketConnector {
    type Sink = WebSocketSink;
    type Source = WebSocketSource;

    async fn open(&self, url: &Url) -> Result<Channel<WebSocketSink, WebSocketSource>, ConnectError> {
        tracing::debug!("Opening WebSocket connection to {}", url);

        let handshake = connect_async(url.as_str());
        let (stream, response) = match tokio::time::timeout(self.handshake_timeout, handshake).await
        {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => return Err(classify_handshake_error(e)),
            Err(_) => return Err(ConnectError::Timeout(self.handshake_timeout)),
        };

        tracing::debug!("WebSocket handshake completed with status {}", response.status());

        let (sink, source) = stream.split();
        Ok(Channel::new(
            WebSocketSink {
                inner: sink,
                closed: false,
            },
            WebSocketSource {
                inner: source,
                closed: None,
            },
        ))
    }
}

fn classify_handshake_error(err: WsError) -> ConnectError {
    match err {
        WsError::Io(e) => ConnectError::Refused(e.to_string()),
        WsError::Http(response) => ConnectError::ProtocolMismatch(format!(
            "server rejected upgrade with status {}",
            response.status()
        )),
        other => ConnectError::ProtocolMismatch(other.to_string()),
    }
}

/// Writing half of a WebSocket channel.
pub struct WebSocketSink {
    inner: SplitSink<WsStream, WsMessage>,
    closed: bool,
}

impl FrameSink for WebSocketSink {
    async fn send(&mut self, text: String) -> Result<(), SendError> {
        if self.closed {
            return Err(SendError::Closed);
        }
        self.inner
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| SendError::Transport(e.to_string()))
    }

    async fn close_normal(&mut self) -> Result<(), SendError> {
        if self.closed {
            return Err(SendError::Closed);
        }
        self.closed = true;

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        self.inner
            .send(WsMessage::Close(Some(frame)))
            .await
            .map_err(|e| SendError::Transport(e.to_string()))
    }

    async fn close_abnormal(&mut self, reason: &str) {
        if !self.closed {
            tracing::debug!("Abandoning WebSocket connection: {}", reason);
            self.closed = true;
        }
    }

    async fn acknowledge_close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        // tungstenite only queues the reply; closing the sink flushes it
        if let Err(e) = self.inner.close().await {
            tracing::debug!("Failed to complete closing handshake: {}", e);
        }
    }
}

/// Reading half of a WebSocket channel.
pub struct WebSocketSource {
    inner: SplitStream<WsStream>,
    closed: Option<ChannelClosed>,
}

impl WebSocketSource {
    fn finish(&mut self, closed: ChannelClosed) -> ChannelClosed {
        self.closed = Some(closed.clone());
        closed
    }
}

impl FrameSource for WebSocketSource {
    async fn receive(&mut self) -> Result<String, ChannelClosed> {
        if let Some(closed) = &self.closed {
            return Err(closed.clone());
        }

        loop {
            match self.inner.next().await {
                Some(Ok(WsMessage::Text(text))) => return Ok(text),
                Some(Ok(WsMessage::Binary(data))) => {
                    return Ok(String::from_utf8_lossy(&data).into_owned())
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let closed = match frame {
                        Some(frame) => ChannelClosed::new(
                            CloseKind::from_code(u16::from(frame.code)),
                            frame.reason.into_owned(),
                        ),
                        None => ChannelClosed::new(
                            CloseKind::from_code(NO_STATUS_RECEIVED),
                            "close frame without status",
                        ),
                    };
                    return Err(self.finish(closed));
                }
                // Ping/Pong are answered by tungstenite
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(self.finish(ChannelClosed::abnormal(e.to_string()))),
                None => {
                    return Err(self.finish(ChannelClosed::abnormal(
                        "connection ended without a close frame",
                    )))
                }
            }
        }
    }
}
