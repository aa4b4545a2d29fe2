//! Entry point of a wing process.
//!
//! Reads `PORT` and `CONFIG` from the environment, binds the webhook
//! listener and reports the outcome on the control channel.

use super::config::WingConfig;
use super::handshake::Handshake;
use crate::control;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Router,
};
use console::style;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Run the wing until it is told to terminate.
pub async fn run() -> Result<()> {
    let (listener, config) = match boot().await {
        Ok(booted) => booted,
        Err(err) => {
            println!("{}", style("Failed to launch the wing:").red());
            println!("{}", style(format!("{err:#}")).red());
            control::report(&Handshake::Failure {
                error: format!("{err:#}"),
            })?;
            return Err(err);
        }
    };

    let addr = listener.local_addr()?;
    let pid = std::process::id();
    println!("{}", style("Wing launched").green());
    println!("{}", style(format!("  Port: {}", addr.port())).green());
    println!("{}", style(format!("   PID: {}", pid)).green());

    control::report(&Handshake::Started { pid, port: addr.port() })?;

    axum::serve(listener, router(config))
        .with_graceful_shutdown(terminated())
        .await
        .context("Wing listener failed")?;

    info!("Wing shut down");
    Ok(())
}

async fn boot() -> Result<(TcpListener, Arc<WingConfig>)> {
    let raw = std::env::var("CONFIG").context("CONFIG env is not provided")?;
    let port: u16 = std::env::var("PORT")
        .context("PORT env is not provided")?
        .parse()
        .context("PORT env is not a port number")?;

    let config = WingConfig::decode(&raw)?;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to listen on {addr}"))?;

    Ok((listener, Arc::new(config)))
}

/// Listener routes: a liveness probe and the webhook endpoint.
pub fn router(config: Arc<WingConfig>) -> Router {
    let hook_path = config.hook_path().to_string();
    Router::new()
        .route("/ping", get(|| async { "pong" }))
        .route(&hook_path, post(receive_hook))
        .with_state(config)
}

async fn receive_hook(State(config): State<Arc<WingConfig>>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let event = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    if body.is_empty() {
        warn!(event, "Webhook with empty body ignored");
        return StatusCode::BAD_REQUEST;
    }

    info!(event, bytes = body.len(), projects = config.projects.len(), "Webhook received");
    StatusCode::ACCEPTED
}

/// Resolves on SIGTERM or Ctrl-C.
pub(crate) async fn terminated() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        Err(err) => {
            warn!(%err, "Cannot listen for SIGTERM, waiting for Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
    info!("Termination requested");
}
