//! Tracecast binary.
//!
//! `tracecast serve` runs the event stream server; `tracecast watch <id>`
//! follows one investigation from a terminal.

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tracecast_client::{ConnectionState, InvestigationWatcher, ViewModel};
use tracecast_logging::{LogFormat, LogLevel};
use tracecast_server::config::ServerConfig;
use tracecast_server::metrics::install_recorder;
use tracecast_server::server::TracecastServer;
use tracecast_settings::TracecastSettings;
use tracecast_store::InMemoryStore;

#[derive(Parser, Debug)]
#[command(name = "tracecast", about = "Real-time agent reasoning trace delivery")]
struct Cli {
    /// Settings file (defaults to ~/.tracecast/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Override the configured log level.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the event stream server.
    Serve {
        /// Bind host.
        #[arg(long)]
        host: Option<String>,
        /// Bind port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Follow one investigation until it ends.
    Watch {
        /// Investigation id.
        id: String,
        /// Server base URL.
        #[arg(long)]
        url: Option<String>,
        /// Print every view update as a JSON line.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    let level = cli
        .log_level
        .as_deref()
        .map_or(settings.logging.level, LogLevel::from_str_lossy);
    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        settings.logging.format
    };
    tracecast_logging::init_subscriber(level, format);

    match cli.command {
        Command::Serve { host, port } => serve(&settings, host, port).await,
        Command::Watch { id, url, json } => watch(settings, id, url, json).await,
    }
}

fn load(cli: &Cli) -> Result<TracecastSettings> {
    match &cli.settings {
        Some(path) => tracecast_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => tracecast_settings::load_settings().context("Failed to load settings"),
    }
}

async fn serve(settings: &TracecastSettings, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = ServerConfig::from_settings(settings);
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    let shutdown_timeout = config.shutdown_timeout;

    let mut server = TracecastServer::new(config, Arc::new(InMemoryStore::new()));
    match install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => warn!(error = %e, "metrics recorder unavailable, /metrics disabled"),
    }

    let (addr, serve) = server.listen().await.context("Failed to bind server")?;
    let reaper = server.spawn_reaper();
    info!(%addr, "tracecast server ready");

    server.shutdown().wait_for_signal().await;
    info!("shutting down");
    let clean = server
        .shutdown()
        .graceful_shutdown(vec![serve, reaper], shutdown_timeout)
        .await;
    if !clean {
        warn!("some tasks did not finish before the shutdown timeout");
    }
    Ok(())
}

async fn watch(
    mut settings: TracecastSettings,
    id: String,
    url: Option<String>,
    json: bool,
) -> Result<()> {
    if let Some(url) = url {
        settings.client.base_url = url;
    }
    let cancel = CancellationToken::new();
    let watcher = InvestigationWatcher::from_settings(&settings.client, id.clone());
    let (mut rx, handle) = watcher.spawn(cancel.clone());

    let ctrl_c = cancel.clone();
    drop(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    }));

    let mut printer = Printer::new(json);
    loop {
        printer.render(&rx.borrow_and_update())?;
        if rx.changed().await.is_err() {
            break;
        }
    }

    let view = handle
        .await
        .context("Watcher task panicked")?
        .with_context(|| format!("Failed to follow investigation {id}"))?;
    if view.connection == ConnectionState::Failed {
        bail!("lost the stream for investigation {id}");
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Terminal output
// ─────────────────────────────────────────────────────────────────────────────

/// Prints only what changed since the last render.
struct Printer {
    json: bool,
    printed: HashMap<String, String>,
    connection: Option<ConnectionState>,
    notice: Option<String>,
    deleted: bool,
}

impl Printer {
    fn new(json: bool) -> Self {
        Self {
            json,
            printed: HashMap::new(),
            connection: None,
            notice: None,
            deleted: false,
        }
    }

    fn render(&mut self, view: &ViewModel) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(view)?);
            return Ok(());
        }
        for line in self.changes(view) {
            println!("{line}");
        }
        Ok(())
    }

    fn changes(&mut self, view: &ViewModel) -> Vec<String> {
        let mut lines = Vec::new();
        if self.connection != Some(view.connection) {
            self.connection = Some(view.connection);
            lines.push(format!("-- {}", view.connection));
        }
        for message in &view.messages {
            if self.printed.get(&message.id) == Some(&message.content) {
                continue;
            }
            let _ = self
                .printed
                .insert(message.id.clone(), message.content.clone());
            lines.push(format!("[{}] {}", message.message_type, message.content));
        }
        if view.notice != self.notice {
            self.notice.clone_from(&view.notice);
            if let Some(notice) = &view.notice {
                lines.push(format!("!! {notice}"));
            }
        }
        if view.deleted && !self.deleted {
            self.deleted = true;
            lines.push("-- investigation deleted".to_string());
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tracecast_core::{Message, MessageType};

    fn message(id: &str, content: &str) -> Message {
        Message::new(id, "inv_1", MessageType::Agent, content, Utc::now())
    }

    // ── CLI parsing ──

    #[test]
    fn parses_serve_overrides() {
        let cli = Cli::try_parse_from(["tracecast", "serve", "--port", "9000"]).unwrap();
        match cli.command {
            Command::Serve { host, port } => {
                assert!(host.is_none());
                assert_eq!(port, Some(9000));
            }
            Command::Watch { .. } => panic!("expected serve"),
        }
    }

    #[test]
    fn parses_watch_with_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "tracecast",
            "watch",
            "inv_42",
            "--url",
            "http://localhost:9000",
            "--json-logs",
        ])
        .unwrap();
        assert!(cli.json_logs);
        match cli.command {
            Command::Watch { id, url, json } => {
                assert_eq!(id, "inv_42");
                assert_eq!(url.as_deref(), Some("http://localhost:9000"));
                assert!(!json);
            }
            Command::Serve { .. } => panic!("expected watch"),
        }
    }

    #[test]
    fn watch_requires_id() {
        assert!(Cli::try_parse_from(["tracecast", "watch"]).is_err());
    }

    // ── settings ──

    #[test]
    fn loads_explicit_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 9123}}"#).unwrap();
        let cli = Cli::try_parse_from([
            "tracecast",
            "--settings",
            path.to_str().unwrap(),
            "serve",
        ])
        .unwrap();
        let settings = load(&cli).unwrap();
        assert_eq!(settings.server.port, 9123);
    }

    #[test]
    fn invalid_settings_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        let cli = Cli::try_parse_from(["tracecast", "--settings", path.to_str().unwrap(), "serve"])
            .unwrap();
        assert!(load(&cli).is_err());
    }

    // ── printer ──

    #[test]
    fn printer_emits_only_changes() {
        let mut printer = Printer::new(false);
        let mut view = ViewModel {
            connection: ConnectionState::Live,
            messages: vec![message("m1", "Hel")],
            ..ViewModel::default()
        };
        assert_eq!(printer.changes(&view), vec!["-- live", "[agent] Hel"]);
        assert!(printer.changes(&view).is_empty());

        view.messages[0].content = "Hello".into();
        assert_eq!(printer.changes(&view), vec!["[agent] Hello"]);
    }

    #[test]
    fn printer_reports_notice_once() {
        let mut printer = Printer::new(false);
        let view = ViewModel {
            notice: Some("lagged".into()),
            ..ViewModel::default()
        };
        assert_eq!(printer.changes(&view), vec!["-- connecting", "!! lagged"]);
        assert!(printer.changes(&view).is_empty());
    }

    #[test]
    fn printer_reports_deletion_once() {
        let mut printer = Printer::new(false);
        let view = ViewModel {
            connection: ConnectionState::Ended,
            deleted: true,
            ..ViewModel::default()
        };
        assert_eq!(
            printer.changes(&view),
            vec!["-- ended", "-- investigation deleted"]
        );
        assert!(printer.changes(&view).is_empty());
    }
}
