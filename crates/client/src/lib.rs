//! # VMShell Client Library
//!
//! This crate attaches a local terminal to remote sessions and manages
//! their lifecycle.
//!
//! ## Overview
//!
//! - **Transport**: WebSocket channels to a session's connect endpoint,
//!   split into independent sending and receiving halves
//! - **Bridge**: Full-duplex copying between terminal and channel, with
//!   clean and abnormal termination handling
//! - **Sessions**: The lifecycle controller that creates, connects to,
//!   lists and deletes sessions
//! - **Registry**: REST client for the session registry
//!
//! ## Architecture
//!
//! ```text
//!   CLI ──▶ SessionController ──▶ SessionRegistry (REST)
//!                  │
//!                  ▼
//!            DuplexBridge ◀──▶ Channel (WebSocket)
//!                  │
//!                  ▼
//!           terminal stdin/stdout
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use client::{
//!     ControllerConfig, HttpRegistry, SessionController, WebSocketConnector,
//! };
//! use protocol::Origin;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let api_url = url::Url::parse("https://api.vmsh.dev")?;
//!     let registry = HttpRegistry::new(api_url.clone(), Duration::from_secs(30))?;
//!     let connector = WebSocketConnector::new(Duration::from_secs(10));
//!     let controller = SessionController::new(registry, connector, ControllerConfig::new(api_url));
//!
//!     let session = controller.create(&Origin::Local).await?;
//!     let stdin = tokio::io::BufReader::new(tokio::io::stdin());
//!     let report = controller
//!         .connect(session.id(), stdin, tokio::io::stdout())
//!         .await?;
//!     println!("session ended: {:?}", report.termination);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`logging`]: Diagnostic log output
//! - [`transport`]: Channel traits and their WebSocket and in-memory implementations
//! - [`bridge`]: Terminal-to-channel bridge
//! - [`session`]: Local session records and the lifecycle controller
//! - [`registry`]: Session registry clients

pub mod bridge;
pub mod config;
pub mod logging;
pub mod registry;
pub mod session;
pub mod transport;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::Config;

// Re-export bridge types for convenience
pub use bridge::{BridgeConfig, BridgeReport, DuplexBridge, Termination};

// Re-export registry types for convenience
pub use registry::{HttpRegistry, InMemoryRegistry, RegistryError, SessionRegistry};

// Re-export session types for convenience
pub use session::{
    ActivityClock, Attachment, ControllerConfig, LifecycleError, SessionController, SessionRecord,
};

// Re-export transport types for convenience
pub use transport::{
    connect_url, Channel, ChannelClosed, ConnectError, Connector, FrameSink, FrameSource,
    SendError, WebSocketConnector,
};
