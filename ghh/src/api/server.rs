//! Control-plane server

use anyhow::Result;
use axum::{middleware, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

use super::{middleware as api_middleware, routes};

/// Routes wrapped in authentication, request logging and tracing.
pub fn build_router(state: routes::AppState, validator: api_middleware::TokenValidator) -> Router {
    routes::create_routes(state)
        .layer(middleware::from_fn(move |req, next| {
            let validator = validator.clone();
            api_middleware::auth(validator, req, next)
        }))
        .layer(middleware::from_fn(api_middleware::logging))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
}

/// Serve `app` until `shutdown` is cancelled.
pub async fn serve(listener: TcpListener, app: Router, shutdown: CancellationToken) -> Result<()> {
    let addr = listener.local_addr()?;
    info!("Mother-ship listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    info!("Mother-ship server stopped");
    Ok(())
}
