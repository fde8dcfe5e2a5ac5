//! Full-duplex bridge between the local terminal and a remote session.
//!
//! The bridge runs two tasks over one [`Channel`]:
//!
//! - **inbound**: receives frames and writes each one to the output as soon
//!   as it arrives
//! - **outbound**: reads input lines and sends each as one frame; the line
//!   `exit` (or end of input) closes the connection normally instead
//!
//! The first task to finish reports why the session ended over a completion
//! channel, and that first cause is the one returned. When the peer closes,
//! a shared cancellation token stops the outbound task even if it is blocked
//! waiting for input, and the outbound task answers the peer's close. After `exit`, the inbound task keeps draining frames
//! until the peer's close arrives or the close timeout elapses.

use std::time::Duration;

use protocol::CloseKind;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::session::ActivityClock;
use crate::transport::{Channel, ChannelClosed, FrameSink, FrameSource};

/// Input line that ends the session.
pub const EXIT_COMMAND: &str = "exit";

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// How long to wait for the peer's close frame after `exit`.
    pub close_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            close_timeout: Duration::from_secs(5),
        }
    }
}

impl BridgeConfig {
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}

/// Why a bridged session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The user typed `exit` or closed the input.
    UserExit,
    /// The peer closed the connection with a normal closure.
    PeerClosed,
    /// The connection ended any other way.
    TransportError { kind: CloseKind, reason: String },
}

impl Termination {
    /// Whether the user should be told about a connection error.
    pub fn is_unexpected(&self) -> bool {
        matches!(self, Termination::TransportError { .. })
    }

    fn from_closed(closed: ChannelClosed) -> Self {
        if closed.kind.is_expected() {
            Termination::PeerClosed
        } else {
            Termination::TransportError {
                kind: closed.kind,
                reason: closed.reason,
            }
        }
    }
}

/// Outcome of [`DuplexBridge::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeReport {
    pub termination: Termination,
    pub frames_sent: u64,
    pub frames_received: u64,
}

/// Runs the two directions of an interactive session.
#[derive(Debug, Clone)]
pub struct DuplexBridge {
    config: BridgeConfig,
    activity: ActivityClock,
}

impl DuplexBridge {
    pub fn new(config: BridgeConfig, activity: ActivityClock) -> Self {
        Self { config, activity }
    }

    /// Bridges `input` and `output` to `channel` until the session ends.
    ///
    /// Both directions have stopped when this returns, and every frame
    /// received before the closure has been written to `output`.
    pub async fn run<S, R, I, O>(&self, channel: Channel<S, R>, input: I, output: O) -> BridgeReport
    where
        S: FrameSink + 'static,
        R: FrameSource + 'static,
        I: AsyncBufRead + Unpin + Send + 'static,
        O: AsyncWrite + Unpin + Send + 'static,
    {
        let Channel { sink, source } = channel;

        let (done_tx, mut done_rx) = mpsc::channel::<Termination>(2);
        let shutdown = CancellationToken::new();
        let closing = CancellationToken::new();

        let inbound = tokio::spawn(run_inbound(
            source,
            output,
            InboundContext {
                done: done_tx.clone(),
                shutdown: shutdown.clone(),
                closing: closing.clone(),
                close_timeout: self.config.close_timeout,
                activity: self.activity.clone(),
            },
        ));
        let outbound = tokio::spawn(run_outbound(
            sink,
            input,
            OutboundContext {
                done: done_tx,
                shutdown,
                closing,
                close_timeout: self.config.close_timeout,
                activity: self.activity.clone(),
            },
        ));

        let (inbound, outbound) = tokio::join!(inbound, outbound);
        let frames_received = inbound.unwrap_or_else(|e| {
            tracing::error!("Inbound task failed: {}", e);
            0
        });
        let frames_sent = outbound.unwrap_or_else(|e| {
            tracing::error!("Outbound task failed: {}", e);
            0
        });

        let termination = done_rx.try_recv().unwrap_or_else(|_| Termination::TransportError {
            kind: CloseKind::Abnormal,
            reason: "session ended without a cause".to_string(),
        });

        tracing::debug!(
            ?termination,
            frames_sent,
            frames_received,
            "Bridge finished"
        );

        BridgeReport {
            termination,
            frames_sent,
            frames_received,
        }
    }
}

struct InboundContext {
    done: mpsc::Sender<Termination>,
    shutdown: CancellationToken,
    closing: CancellationToken,
    close_timeout: Duration,
    activity: ActivityClock,
}

struct OutboundContext {
    done: mpsc::Sender<Termination>,
    shutdown: CancellationToken,
    closing: CancellationToken,
    close_timeout: Duration,
    activity: ActivityClock,
}

async fn run_inbound<R, O>(mut source: R, mut output: O, ctx: InboundContext) -> u64
where
    R: FrameSource,
    O: AsyncWrite + Unpin,
{
    let mut received = 0u64;

    let close_deadline = {
        let closing = ctx.closing.clone();
        let timeout = ctx.close_timeout;
        async move {
            closing.cancelled().await;
            tokio::time::sleep(timeout).await;
        }
    };
    tokio::pin!(close_deadline);

    loop {
        tokio::select! {
            biased;

            frame = source.receive() => match frame {
                Ok(text) => {
                    received += 1;
                    ctx.activity.touch();

                    let written = async {
                        output.write_all(text.as_bytes()).await?;
                        output.flush().await
                    };
                    if let Err(e) = written.await {
                        tracing::warn!("Failed to write session output: {}", e);
                        let _ = ctx.done.try_send(Termination::TransportError {
                            kind: CloseKind::Abnormal,
                            reason: format!("terminal output failed: {}", e),
                        });
                        break;
                    }
                }
                Err(closed) => {
                    tracing::debug!("Channel closed: {}", closed);
                    let _ = ctx.done.try_send(Termination::from_closed(closed));
                    break;
                }
            },

            _ = &mut close_deadline => {
                tracing::warn!(
                    "Peer did not acknowledge close within {:?}",
                    ctx.close_timeout
                );
                break;
            }

            _ = ctx.shutdown.cancelled() => break,
        }
    }

    ctx.shutdown.cancel();
    received
}

async fn run_outbound<S, I>(mut sink: S, mut input: I, ctx: OutboundContext) -> u64
where
    S: FrameSink,
    I: AsyncBufRead + Unpin,
{
    let mut sent = 0u64;
    let mut buf = Vec::new();
    let mut input_failure = None;

    loop {
        buf.clear();
        let read = tokio::select! {
            _ = ctx.shutdown.cancelled() => {
                // The peer ended the session; answer its close if it sent one
                let _ = tokio::time::timeout(ctx.close_timeout, sink.acknowledge_close()).await;
                return sent;
            }
            read = input.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => {
                tracing::debug!("Input closed, ending session");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!("Failed to read terminal input: {}", e);
                input_failure = Some(e);
                break;
            }
        }

        let line = decode_line(&buf);
        if line == EXIT_COMMAND {
            break;
        }

        if let Err(e) = sink.send(line).await {
            tracing::warn!("Failed to send frame: {}", e);
            sink.close_abnormal(&e.to_string()).await;
            let _ = ctx.done.try_send(Termination::TransportError {
                kind: CloseKind::Abnormal,
                reason: e.to_string(),
            });
            ctx.shutdown.cancel();
            return sent;
        }

        sent += 1;
        ctx.activity.touch();
    }

    let termination = match input_failure {
        None => Termination::UserExit,
        Some(e) => Termination::TransportError {
            kind: CloseKind::Abnormal,
            reason: format!("terminal input failed: {}", e),
        },
    };

    // Report before closing so the peer's close reply cannot win the race
    let _ = ctx.done.try_send(termination);
    ctx.closing.cancel();
    if let Err(e) = sink.close_normal().await {
        tracing::warn!("Failed to send close frame: {}", e);
    }

    sent
}

/// One input line without its terminator, with invalid UTF-8 replaced.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{self, SinkCall};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, BufReader};

    fn bridge() -> DuplexBridge {
        DuplexBridge::new(BridgeConfig::default(), ActivityClock::new(0))
    }

    fn input(text: &'static str) -> BufReader<&'static [u8]> {
        BufReader::new(text.as_bytes())
    }

    /// Input whose every read fails.
    struct BrokenTerminal;

    impl tokio::io::AsyncRead for BrokenTerminal {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "terminal detached",
            )))
        }
    }

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"ls\n"), "ls");
        assert_eq!(decode_line(b"exit\r\n"), "exit");
        assert_eq!(decode_line(b"no newline"), "no newline");
        assert_eq!(decode_line(b"\xff\n"), "\u{fffd}");
    }

    #[tokio::test]
    async fn test_exit_closes_without_sending_exit() {
        let (channel, mut peer) = memory::pair();
        let (output, _output_rx) = duplex(4096);

        let report = bridge()
            .run(channel, input("ls\npwd\nexit\nnever sent\n"), output)
            .await;

        assert_eq!(report.termination, Termination::UserExit);
        assert_eq!(report.frames_sent, 2);
        assert_eq!(
            peer.calls(),
            vec![
                SinkCall::Send("ls".to_string()),
                SinkCall::Send("pwd".to_string()),
                SinkCall::CloseNormal,
            ]
        );
    }

    #[tokio::test]
    async fn test_exit_with_carriage_return() {
        let (channel, mut peer) = memory::pair();
        let (output, _output_rx) = duplex(4096);

        let report = bridge().run(channel, input("exit\r\n"), output).await;

        assert_eq!(report.termination, Termination::UserExit);
        assert_eq!(peer.calls(), vec![SinkCall::CloseNormal]);
    }

    #[tokio::test]
    async fn test_exit_is_exact_match() {
        let (channel, mut peer) = memory::pair();
        let (output, _output_rx) = duplex(4096);

        bridge()
            .run(channel, input(" exit\nexit now\nexit\n"), output)
            .await;

        assert_eq!(
            peer.calls(),
            vec![
                SinkCall::Send(" exit".to_string()),
                SinkCall::Send("exit now".to_string()),
                SinkCall::CloseNormal,
            ]
        );
    }

    #[tokio::test]
    async fn test_end_of_input_acts_as_exit() {
        let (channel, mut peer) = memory::pair();
        let (output, _output_rx) = duplex(4096);

        let report = bridge().run(channel, input("echo hi\n"), output).await;

        assert_eq!(report.termination, Termination::UserExit);
        assert_eq!(
            peer.calls(),
            vec![SinkCall::Send("echo hi".to_string()), SinkCall::CloseNormal]
        );
    }

    #[tokio::test]
    async fn test_invalid_utf8_lines_are_sent() {
        let (channel, mut peer) = memory::pair();
        let (output, _output_rx) = duplex(4096);
        let input = BufReader::new(&b"caf\xe9\nls\nexit\n"[..]);

        let report = bridge().run(channel, input, output).await;

        assert_eq!(report.termination, Termination::UserExit);
        assert_eq!(report.frames_sent, 2);
        assert_eq!(
            peer.calls(),
            vec![
                SinkCall::Send("caf\u{fffd}".to_string()),
                SinkCall::Send("ls".to_string()),
                SinkCall::CloseNormal,
            ]
        );
    }

    #[tokio::test]
    async fn test_input_failure_is_unexpected() {
        let (channel, mut peer) = memory::pair();
        let (output, _output_rx) = duplex(4096);

        let report = bridge()
            .run(channel, BufReader::new(BrokenTerminal), output)
            .await;

        assert!(report.termination.is_unexpected());
        assert!(matches!(
            report.termination,
            Termination::TransportError {
                kind: CloseKind::Abnormal,
                ref reason,
            } if reason.starts_with("terminal input failed")
        ));
        assert_eq!(peer.calls(), vec![SinkCall::CloseNormal]);
    }

    #[tokio::test]
    async fn test_peer_close_is_acknowledged() {
        let (channel, mut peer) = memory::pair();
        let (output, _output_rx) = duplex(4096);
        let (_input_tx, input_rx) = duplex(64);
        peer.close(1000, "done");

        let report = bridge()
            .run(channel, BufReader::new(input_rx), output)
            .await;

        assert_eq!(report.termination, Termination::PeerClosed);
        assert_eq!(peer.calls(), vec![SinkCall::AcknowledgeClose]);
    }

    #[tokio::test]
    async fn test_peer_close_delivers_all_frames() {
        let (channel, peer) = memory::pair();
        let (output, mut output_rx) = duplex(64 * 1024);
        let (_input_tx, input_rx) = duplex(64);

        for i in 0..100 {
            peer.push(format!("line {}\n", i));
        }
        peer.close(1000, "done");

        let report = bridge()
            .run(channel, BufReader::new(input_rx), output)
            .await;

        assert_eq!(report.termination, Termination::PeerClosed);
        assert_eq!(report.frames_received, 100);

        let mut written = String::new();
        output_rx.read_to_string(&mut written).await.unwrap();
        let expected: String = (0..100).map(|i| format!("line {}\n", i)).collect();
        assert_eq!(written, expected);
    }

    #[tokio::test]
    async fn test_going_away_is_unexpected() {
        let (channel, peer) = memory::pair();
        peer.push("partial output");
        peer.close(1001, "server shutting down");
        let (output, _output_rx) = duplex(4096);
        let (_input_tx, input_rx) = duplex(64);

        let report = bridge()
            .run(channel, BufReader::new(input_rx), output)
            .await;

        assert!(report.termination.is_unexpected());
        assert_eq!(
            report.termination,
            Termination::TransportError {
                kind: CloseKind::GoingAway,
                reason: "server shutting down".to_string(),
            }
        );
        assert_eq!(report.frames_received, 1);
    }

    #[tokio::test]
    async fn test_send_failure_closes_abnormally() {
        let (channel, mut peer) = memory::pair();
        let (output, _output_rx) = duplex(4096);
        peer.fail_sends();

        let report = bridge().run(channel, input("ls\nexit\n"), output).await;

        assert!(report.termination.is_unexpected());
        assert_eq!(report.frames_sent, 0);
        let calls = peer.calls();
        assert_eq!(calls.len(), 1);
        assert!(matches!(calls[0], SinkCall::CloseAbnormal(_)));
    }

    #[tokio::test]
    async fn test_drains_frames_after_exit() {
        let (channel, mut peer) = memory::pair();
        let (output, mut output_rx) = duplex(4096);
        peer.withhold_close_reply();

        let bridge = bridge();
        let (mut input_tx, input_rx) = duplex(64);
        let run = tokio::spawn(async move {
            bridge.run(channel, BufReader::new(input_rx), output).await
        });

        input_tx.write_all(b"exit\n").await.unwrap();
        assert_eq!(peer.next_call().await, Some(SinkCall::CloseNormal));
        peer.push("goodbye\n");
        peer.close(1000, "");

        let report = run.await.unwrap();
        assert_eq!(report.termination, Termination::UserExit);

        let mut written = String::new();
        output_rx.read_to_string(&mut written).await.unwrap();
        assert_eq!(written, "goodbye\n");
    }

    #[tokio::test]
    async fn test_close_timeout_bounds_exit() {
        let (channel, peer) = memory::pair();
        peer.withhold_close_reply();
        let (output, _output_rx) = duplex(4096);

        let bridge = DuplexBridge::new(
            BridgeConfig::default().with_close_timeout(Duration::from_millis(100)),
            ActivityClock::new(0),
        );
        let started = std::time::Instant::now();
        let report = bridge.run(channel, input("exit\n"), output).await;

        assert_eq!(report.termination, Termination::UserExit);
        assert!(started.elapsed() < Duration::from_secs(5));
        drop(peer);
    }

    #[tokio::test]
    async fn test_activity_updated() {
        let (channel, peer) = memory::pair();
        let (output, _output_rx) = duplex(4096);
        peer.push("hello\n");

        let clock = ActivityClock::new(0);
        let bridge = DuplexBridge::new(BridgeConfig::default(), clock.clone());
        let report = bridge.run(channel, input("ls\nexit\n"), output).await;

        assert_eq!(report.frames_sent, 1);
        assert!(clock.get() > 0);
    }
}
