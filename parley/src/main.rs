//! `parley`: line-oriented terminal client for the Parley relay.
//!
//! Every line typed on stdin is sent to the recipient. Incoming messages and
//! delivery acknowledgments are printed as they arrive.
//!
//! ```bash
//! cargo run --bin parley -- --user alice --recipient bob
//!
//! # Against a relay on another host
//! cargo run --bin parley -- -u alice -r bob --server ws://10.0.0.5:9000/ws
//! ```

use std::fmt::Write as _;
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use chrono::{DateTime, Local};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use parley::config::{CliArgs, ClientConfig};
use parley::net::{self, NetCommand, NetEvent};

const USAGE_HINT: &str = "Type a message and press Enter to send it. Ctrl-C quits.";

/// How long to wait for the relay to acknowledge our close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    let net_config = match config.to_net_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let user = net_config.user.clone();
    let recipient = net_config.recipient.clone();
    let (cmd_tx, evt_rx) = match net::spawn_net(net_config).await {
        Ok(channels) => channels,
        Err(e) => {
            eprintln!("Could not connect: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("Connected as {user}, sending to {recipient}. {USAGE_HINT}");
    run(cmd_tx, evt_rx, &config.timestamp_format).await;
    ExitCode::SUCCESS
}

/// Initialize logging to stderr, or to `file_path` when given.
///
/// Returns a [`WorkerGuard`] when logging to a file; it must be held until
/// shutdown so buffered entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some(log_path) = file_path else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter)
            .init();
        return None;
    };

    let log_dir = log_path.parent().filter(|p| !p.as_os_str().is_empty());
    let log_dir = log_dir.unwrap_or_else(|| Path::new("."));
    let file_name = log_path.file_name()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Main loop: stdin lines out, network events in, until either side ends.
async fn run(
    cmd_tx: mpsc::Sender<NetCommand>,
    mut evt_rx: mpsc::Receiver<NetEvent>,
    timestamp_format: &str,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => println!("{USAGE_HINT}"),
                Ok(Some(text)) => {
                    if cmd_tx.send(NetCommand::SendMessage { text }).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    // EOF: close our side and print whatever is still in flight.
                    stdin_open = false;
                    let _ = cmd_tx.send(NetCommand::Shutdown).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stdin read failed");
                    stdin_open = false;
                    let _ = cmd_tx.send(NetCommand::Shutdown).await;
                }
            },
            event = evt_rx.recv() => {
                if !print_event(event, timestamp_format) {
                    return;
                }
            }
            () = &mut shutdown => {
                let _ = cmd_tx.send(NetCommand::Shutdown).await;
                break;
            }
        }
    }

    // Let the close handshake finish, but don't hang on a dead relay.
    let _ = tokio::time::timeout(CLOSE_GRACE, async {
        while let Some(event) = evt_rx.recv().await {
            if !print_event(Some(event), timestamp_format) {
                break;
            }
        }
    })
    .await;
}

/// Print one network event. Returns `false` once the connection is gone.
fn print_event(event: Option<NetEvent>, timestamp_format: &str) -> bool {
    match event {
        Some(NetEvent::MessageReceived {
            from,
            content,
            timestamp,
        }) => {
            println!(
                "[{}] {from}: {content}",
                format_timestamp(timestamp, timestamp_format)
            );
            true
        }
        Some(NetEvent::Acked { message_id }) => {
            println!("ack {message_id}");
            true
        }
        Some(NetEvent::Error(msg)) => {
            eprintln!("Network error: {msg}");
            true
        }
        Some(NetEvent::Disconnected) | None => {
            println!("Disconnected from relay.");
            false
        }
    }
}

/// Render a server timestamp (nanoseconds since epoch) in local time.
fn format_timestamp(nanos: i64, format: &str) -> String {
    let local = DateTime::from_timestamp_nanos(nanos).with_timezone(&Local);
    let mut out = String::new();
    if write!(out, "{}", local.format(format)).is_err() {
        return "??:??:??".to_string();
    }
    out
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
