mod config;
mod error;
mod hotswap;
mod negotiation;
mod pipeline;
mod ports;
mod session;
mod stats;
mod transport;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::io::AsyncBufReadExt;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use wfdcast_protocol::message::TriggerMethod;

use crate::config::SourceConfig;
use crate::ports::PortPool;
use crate::session::{Session, SessionCallbacks, SessionHandle};

/// RTSP control port assigned to Wi-Fi Display.
const DEFAULT_CONTROL_PORT: u16 = 7236;

fn parse_args() -> (PathBuf, Option<u16>) {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = PathBuf::from("./config/wfdcast.toml");
    let mut port_override = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    port_override = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "-V" | "--version" => {
                println!("wfdcast-source {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    (config_path, port_override)
}

/// Bus watches and deferred hot-swap teardown run on the default GLib
/// main context; give it a thread for the lifetime of the process.
fn spawn_glib_main_loop() {
    std::thread::spawn(|| {
        let main_loop = gstreamer::glib::MainLoop::new(None, false);
        main_loop.run();
    });
}

fn logging_callbacks(peer: std::net::SocketAddr) -> SessionCallbacks {
    SessionCallbacks {
        on_keepalive_fail: Some(Arc::new(move || {
            tracing::warn!(%peer, "keepalive failed, sink unresponsive");
        })),
        on_playing_done: Some(Arc::new(move || {
            tracing::info!(%peer, "sink is playing");
        })),
        on_direct_stream_end: Some(Arc::new(move || {
            tracing::info!(%peer, "direct stream ended, live capture restored");
        })),
        ..Default::default()
    }
}

/// Line commands on stdin steer the most recent session:
/// `play`, `pause`, `teardown`, `direct <uri>`.
fn spawn_control_loop(handles: Arc<Mutex<Vec<SessionHandle>>>) {
    tokio::spawn(async move {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            let target = handles
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .last()
                .cloned();
            let Some(handle) = target else {
                tracing::warn!("no active session to control");
                continue;
            };
            match line.as_str() {
                "play" => handle.trigger(TriggerMethod::Play).await,
                "pause" => handle.trigger(TriggerMethod::Pause).await,
                "teardown" => handle.teardown().await,
                other => {
                    if let Some(uri) = other.strip_prefix("direct ") {
                        match handle.direct_stream(uri.trim()).await {
                            Ok(()) => tracing::info!(uri, "direct stream running"),
                            Err(e) => tracing::warn!(uri, "direct stream refused: {e}"),
                        }
                    } else {
                        tracing::warn!(command = other, "unknown control command");
                    }
                }
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    gstreamer::init().context("failed to initialize GStreamer")?;
    spawn_glib_main_loop();

    let (config_path, port_override) = parse_args();
    let config: SourceConfig = config::load_config(&config_path)?;
    if let Err(issues) = config.validate() {
        let has_errors = issues.iter().any(|i| i.starts_with("ERROR:"));
        for issue in &issues {
            if issue.starts_with("ERROR:") {
                tracing::error!("{}", issue);
            } else {
                tracing::warn!("{}", issue);
            }
        }
        if has_errors {
            tracing::error!(
                "Configuration has {} issue(s). Fix the ERROR(s) above and restart.",
                issues.len()
            );
            std::process::exit(1);
        }
    }

    let port = port_override.unwrap_or(DEFAULT_CONTROL_PORT);
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind RTSP control port {port}"))?;
    tracing::info!(port, "listening for sinks");

    let config = Arc::new(config);
    let ports = Arc::new(PortPool::default());
    let handles: Arc<Mutex<Vec<SessionHandle>>> = Arc::new(Mutex::new(Vec::new()));
    spawn_control_loop(Arc::clone(&handles));

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted.context("accept failed")?;
                let _ = stream.set_nodelay(true);
                let local = stream
                    .local_addr()
                    .map(|a| a.ip().to_string())
                    .unwrap_or_default();
                match Session::new(
                    stream,
                    peer.ip().to_string(),
                    local,
                    Arc::clone(&config),
                    Arc::clone(&ports),
                    logging_callbacks(peer),
                ) {
                    Ok((session, handle)) => {
                        tracing::info!(session_id = %handle.id, %peer, "sink connected");
                        handles.lock().unwrap_or_else(|e| e.into_inner()).push(handle);
                        tokio::spawn(session.run());
                    }
                    Err(e) => {
                        tracing::warn!(%peer, "rejecting sink: {e}");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                let open: Vec<SessionHandle> =
                    handles.lock().unwrap_or_else(|e| e.into_inner()).clone();
                tracing::info!("shutting down, tearing down {} session(s)", open.len());
                for handle in &open {
                    handle.teardown().await;
                }
                break;
            }
        }
    }

    Ok(())
}
