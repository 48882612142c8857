//! roomline-gateway — bridges a line-protocol chat client to the messaging
//! service backend.
//!
//! A single-threaded cooperative event loop owns the gateway state for the
//! life of the process; see [`event_loop`] and [`state`] for the core. This
//! crate is split into a library and a thin `src/main.rs` binary so that
//! integration tests under `tests/` can drive the gateway core against an
//! in-memory fake [`backend::BackendClient`] without spawning a real backend
//! subprocess.

pub mod backend;
pub mod common;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event_loop;
pub mod model;
pub mod naming;
pub mod proto;
pub mod session;
pub mod state;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::backend::http::HttpBackendClient;
use crate::backend::BackendClient;
use crate::config::Config;
use crate::error::{BackendInitError, GatewayError};
use crate::state::GatewayState;

/// Resolve the configuration path from CLI arguments.
/// Supports `-c <path>`, `--config <path>`, or a bare path.
/// Falls back to `gateway.toml` when no argument is provided.
pub fn resolve_config_path() -> String {
    let mut args = std::env::args().skip(1);

    let raw_path = match args.next() {
        Some(flag) if flag == "-c" || flag == "--config" => args.next().unwrap_or_else(|| {
            eprintln!("Missing path after {}", flag);
            std::process::exit(1);
        }),
        Some(path) => path,
        None => "gateway.toml".to_string(),
    };

    match std::fs::canonicalize(std::path::Path::new(&raw_path)) {
        Ok(p) => p.to_string_lossy().into_owned(),
        Err(_) => raw_path,
    }
}

pub fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(true).init();
}

/// Bootstraps the backend, binds the configured listeners, and runs the
/// event loop to completion (on shutdown signal or listener exhaustion).
pub async fn run(config: Config) -> Result<(), GatewayError> {
    let gateway_name = common::derive_gateway_name();
    info!(%gateway_name, "starting roomline-gatewayd");
    if config.gateway.daemon {
        warn!("daemon = true is accepted for compatibility but ignored; run under a process supervisor instead");
    }

    let backend = HttpBackendClient::spawn(&config.backend.binary).await.map_err(GatewayError::BackendInit)?;
    let backend: Arc<dyn BackendClient> = Arc::new(backend);

    backend
        .configure(
            &config.backend.host,
            config.backend.port,
            &config.backend.db_dir,
            &config.backend.schema_dir,
            &config.backend.attachment_dir,
            config.backend.use_tls,
        )
        .await
        .map_err(|e| GatewayError::BackendInit(BackendInitError::Backend(e)))?;

    let flow_username = if config.gateway.username.is_empty() {
        let accounts = backend.enumerate_local_accounts().await.map_err(|e| GatewayError::BackendInit(BackendInitError::Backend(e)))?;
        accounts.into_iter().next().ok_or(GatewayError::BackendInit(BackendInitError::NoLocalAccount))?.email_address
    } else {
        config.gateway.username.clone()
    };

    backend
        .start_up(&flow_username, &config.backend.uri)
        .await
        .map_err(|e| GatewayError::BackendInit(BackendInitError::Backend(e)))?;
    info!(username = %flow_username, "backend session started");

    let listeners = bind_listeners(&config.gateway.irc_ports).await?;

    let mut state = GatewayState::new(backend.clone(), gateway_name, flow_username, config.gateway.show_timestamps);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    event_loop::run(&mut state, listeners, shutdown_rx).await;

    backend.terminate().await;
    info!("gateway stopped");
    Ok(())
}

async fn bind_listeners(ports: &[u16]) -> Result<Vec<TcpListener>, GatewayError> {
    let mut listeners = Vec::with_capacity(ports.len());
    for port in ports {
        let listener = TcpListener::bind(("127.0.0.1", *port)).await.map_err(GatewayError::Bind)?;
        info!(%port, "listener bound");
        listeners.push(listener);
    }
    Ok(listeners)
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
