//! API routes

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Response,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::error::ApiError;
use super::progress::respond_with_progress;
use crate::error::Error;
use crate::fleet::{Fleet, StartRequest};
use crate::registry::RegistryEntry;

/// Application state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub fleet: Arc<Fleet>,
    /// Cancelled once the mother-ship has landed
    pub shutdown: CancellationToken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameBody {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartBody {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Create all API routes
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/land", post(land))
        .route("/list", get(list_wings))
        // Wing management
        .route("/wing/start", post(start_wing))
        .route("/wing/stop", put(stop_wing))
        .route("/wing/restart", put(restart_wing))
        .route("/wing/delete", delete(delete_wing))
        .route("/wing/info", get(wing_info))
        .with_state(state)
}

async fn ping() -> StatusCode {
    StatusCode::OK
}

async fn land(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    info!("Landing requested");
    state.fleet.land().await?;
    state.shutdown.cancel();
    Ok(StatusCode::OK)
}

async fn list_wings(State(state): State<AppState>) -> Json<Vec<RegistryEntry>> {
    Json(state.fleet.registry().get_all())
}

async fn wing_info(
    State(state): State<AppState>,
    Query(query): Query<NameBody>,
) -> Result<Json<RegistryEntry>, ApiError> {
    state
        .fleet
        .registry()
        .get(&query.name)
        .map(Json)
        .ok_or_else(|| Error::NotFound(query.name.clone()).into())
}

async fn start_wing(State(state): State<AppState>, Json(request): Json<StartRequest>) -> Response {
    info!(name = ?request.name, port = request.port, config = %request.config.display(), "Start requested");
    respond_with_progress(move |progress| async move { state.fleet.start(request, &progress).await })
}

async fn stop_wing(State(state): State<AppState>, Json(body): Json<NameBody>) -> Response {
    info!(name = %body.name, "Stop requested");
    respond_with_progress(move |progress| async move { state.fleet.stop(&body.name, &progress).await })
}

async fn restart_wing(State(state): State<AppState>, Json(body): Json<RestartBody>) -> Response {
    info!(name = %body.name, port = ?body.port, "Restart requested");
    respond_with_progress(move |progress| async move { state.fleet.restart(&body.name, body.port, &progress).await })
}

async fn delete_wing(State(state): State<AppState>, Json(body): Json<NameBody>) -> Response {
    info!(name = %body.name, "Delete requested");
    respond_with_progress(move |progress| async move { state.fleet.delete(&body.name, &progress).await })
}
