//! VMShell CLI
//!
//! Attach a terminal to remote sessions and manage their lifecycle.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use client::config::Config;
use client::session::unix_now;
use client::{
    BridgeConfig, ControllerConfig, Connector, HttpRegistry, SessionController, SessionRegistry,
    Termination, WebSocketConnector,
};
use protocol::{LogEntry, Origin, SessionInfo, SessionStatus};
use tokio::io::BufReader;

/// VMShell - attach a terminal to remote sessions.
#[derive(Parser, Debug)]
#[command(name = "vmsh")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Session ID to use
    #[arg(long, global = true, value_name = "ID")]
    pub session: Option<String>,

    /// Subcommand to execute (defaults to `start`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Start a new session and connect to it
    Start {
        /// Repository to start the session from (defaults to the local directory)
        #[arg(long, value_name = "URL")]
        repo: Option<String>,
    },

    /// Connect to an existing session (defaults to the most recent one)
    Connect {
        /// Session ID to connect to
        session_id: Option<String>,
    },

    /// List all sessions
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Delete a session
    Delete {
        /// Session ID to delete
        session_id: String,
    },

    /// Show session status
    Status {
        /// Session ID to inspect
        session_id: String,
    },

    /// View session logs
    Logs {
        /// Session ID whose logs to show
        session_id: String,

        /// Only show the last N entries
        #[arg(long, short = 'n', value_name = "N")]
        tail: Option<usize>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let (config, overrides) = match load_config(&cli) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    let log_guard = match client::logging::init(&config.logging, cli.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    for name in overrides {
        tracing::info!("Applied {} from the environment", name);
    }
    tracing::debug!("Using configuration: {:?}", config);

    let result = match build_controller(&config) {
        Ok(controller) => {
            let command = cli.command.unwrap_or(Commands::Start { repo: None });
            execute(command, cli.session, &controller).await
        }
        Err(e) => Err(e),
    };

    let code = exit_code(&result);
    if let Err(e) = result {
        tracing::debug!("Command failed: {:?}", e);
        eprintln!("Error: {:#}", e);
    }

    drop(log_guard);
    std::process::exit(code);
}

/// Loads the configuration file and applies environment overrides,
/// returning the names of the overriding variables.
fn load_config(cli: &Cli) -> anyhow::Result<(Config, Vec<&'static str>)> {
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    let overrides = config.apply_env_overrides();
    config.validate()?;
    Ok((config, overrides))
}

fn build_controller(
    config: &Config,
) -> anyhow::Result<SessionController<HttpRegistry, WebSocketConnector>> {
    let api_url = config.api_url()?;
    let registry = HttpRegistry::new(api_url.clone(), config.request_timeout())?;
    let connector = WebSocketConnector::new(config.handshake_timeout());
    let controller_config = ControllerConfig::new(api_url)
        .with_bridge(BridgeConfig::default().with_close_timeout(config.close_timeout()));

    Ok(SessionController::new(registry, connector, controller_config))
}

/// Process exit status for a command result.
fn exit_code(result: &anyhow::Result<bool>) -> i32 {
    match result {
        Ok(true) => 0,
        Ok(false) | Err(_) => 1,
    }
}

/// Runs one command. Returns `Ok(false)` when the command completed but
/// should still exit unsuccessfully.
async fn execute<R, C>(
    command: Commands,
    session_flag: Option<String>,
    controller: &SessionController<R, C>,
) -> anyhow::Result<bool>
where
    R: SessionRegistry,
    C: Connector,
{
    match command {
        Commands::Start { repo } => {
            let origin = match repo {
                Some(repo) => {
                    let origin = Origin::repository(&repo)?;
                    println!("Starting new session with repo: {}", origin.description());
                    origin
                }
                None => {
                    println!("Starting new session with local directory...");
                    Origin::Local
                }
            };

            let record = controller.create(&origin).await?;
            tracing::info!("Created session {}", record.id());
            connect_terminal(controller, record.id()).await
        }
        Commands::Connect { session_id } => {
            let id = match session_id.or(session_flag) {
                Some(id) => id,
                None => controller.most_recent().await?,
            };
            connect_terminal(controller, &id).await
        }
        Commands::List { json } => {
            let sessions = controller.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else {
                print_sessions(&sessions);
            }
            Ok(true)
        }
        Commands::Delete { session_id } => {
            println!("Deleting session: {}", session_id);
            controller.delete(&session_id).await?;
            println!("Session {} deleted", session_id);
            Ok(true)
        }
        Commands::Status { session_id } => {
            let status = controller.status(&session_id).await?;
            print_status(&session_id, &status);
            Ok(true)
        }
        Commands::Logs { session_id, tail } => {
            let entries = controller.logs(&session_id, tail).await?;
            print_logs(&session_id, &entries);
            Ok(true)
        }
    }
}

/// Bridges stdin/stdout to a session until it ends.
///
/// Returns `Ok(false)` when the connection ended unexpectedly.
async fn connect_terminal<R, C>(controller: &SessionController<R, C>, id: &str) -> anyhow::Result<bool>
where
    R: SessionRegistry,
    C: Connector,
{
    println!("Connecting to session {}...", id);
    let attachment = controller.attach(id).await?;

    println!("Connected to session {}", id);
    println!("Type 'exit' to disconnect");
    println!();

    let stdin = BufReader::new(tokio::io::stdin());
    let report = attachment.run(stdin, tokio::io::stdout()).await?;

    if let Termination::TransportError { kind, reason } = &report.termination {
        if reason.is_empty() {
            eprintln!("Connection error: {}", kind);
        } else {
            eprintln!("Connection error: {} ({})", reason, kind);
        }
    }
    println!("\nDisconnected from session");

    Ok(!report.termination.is_unexpected())
}

/// Print sessions one per line, as `id (state) - description`.
fn print_sessions(sessions: &[SessionInfo]) {
    if sessions.is_empty() {
        println!("No sessions found.");
        return;
    }

    println!("Active sessions:");
    for session in sessions {
        println!("{}", format_session_line(session));
    }
}

fn format_session_line(session: &SessionInfo) -> String {
    format!(
        "  {} ({}) - {}",
        session.id,
        session.state,
        truncate_str(&session.description, 60)
    )
}

fn print_status(id: &str, status: &SessionStatus) {
    println!("Session {}:", id);
    println!("  Status:        {}", status.state);
    println!("  Created:       {}", format_relative_time(status.created_at));
    println!(
        "  Last Activity: {}",
        format_relative_time(status.last_activity)
    );
}

fn print_logs(id: &str, entries: &[LogEntry]) {
    if entries.is_empty() {
        println!("No logs for session {}.", id);
        return;
    }

    for entry in entries {
        println!(
            "{:>8} | {}",
            format_relative_time(entry.timestamp),
            entry.message
        );
    }
}

/// Format a Unix timestamp as relative time (e.g., "5m ago").
fn format_relative_time(timestamp: u64) -> String {
    format_elapsed(unix_now().saturating_sub(timestamp))
}

fn format_elapsed(elapsed: u64) -> String {
    if elapsed < 60 {
        format!("{}s ago", elapsed)
    } else if elapsed < 3600 {
        format!("{}m ago", elapsed / 60)
    } else if elapsed < 86400 {
        format!("{}h ago", elapsed / 3600)
    } else {
        format!("{}d ago", elapsed / 86400)
    }
}

/// Truncate a string to a maximum number of characters, adding "..." if truncated.
fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
