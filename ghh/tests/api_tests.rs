//! Control API tests: routes through `oneshot`, and the HTTP client against
//! a live listener.

mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use common::*;
use event_stream::EventStream;
use futures::StreamExt;
use ghh::api::{self, AppState, ProgressLine, TokenValidator};
use ghh::client::{Descriptor, MotherShipClient};
use ghh::{Error, Fleet, RegistryEntry, StartRequest};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const TOKEN: &str = "test-token";

// ============================================================================
// Test Utilities and Setup
// ============================================================================

fn app(fleet: Arc<Fleet>) -> (Router, CancellationToken) {
    let shutdown = CancellationToken::new();
    let router = api::build_router(
        AppState {
            fleet,
            shutdown: shutdown.clone(),
        },
        TokenValidator::new(TOKEN),
    );
    (router, shutdown)
}

fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Progress lines of a body, and whether it ended cleanly.
async fn progress_lines(body: Body) -> (Vec<ProgressLine>, bool) {
    let mut chunks = body.into_data_stream();
    let mut raw = Vec::new();
    let mut clean = true;
    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(bytes) => raw.extend_from_slice(&bytes),
            Err(_) => {
                clean = false;
                break;
            }
        }
    }
    let lines = String::from_utf8(raw)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    (lines, clean)
}

fn start_body(dir: &Path, name: &str, port: u16) -> Value {
    json!({
        "name": name,
        "port": port,
        "cwd": dir,
        "config": write_config(dir, "hook.json"),
    })
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_requests_without_token_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = app(fleet(dir.path(), STARTS));

    let missing = app
        .clone()
        .oneshot(Request::get("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = app
        .clone()
        .oneshot(
            Request::get("/list")
                .header(header::AUTHORIZATION, "Bearer nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let ok = app.oneshot(request(Method::GET, "/ping", None)).await.unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
}

// ============================================================================
// Plain routes
// ============================================================================

#[tokio::test]
async fn test_list_and_info() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = fleet(dir.path(), STARTS);
    let (app, _) = app(Arc::clone(&fleet));

    let list = app.clone().oneshot(request(Method::GET, "/list", None)).await.unwrap();
    assert_eq!(list.status(), StatusCode::OK);
    let body = axum::body::to_bytes(list.into_body(), usize::MAX).await.unwrap();
    assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!([]));

    let missing = app
        .clone()
        .oneshot(request(Method::GET, "/wing/info?name=ghost", None))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let started = app
        .clone()
        .oneshot(request(Method::POST, "/wing/start", Some(start_body(dir.path(), "api", 4300))))
        .await
        .unwrap();
    let (_, clean) = progress_lines(started.into_body()).await;
    assert!(clean);

    let info = app
        .oneshot(request(Method::GET, "/wing/info?name=api", None))
        .await
        .unwrap();
    assert_eq!(info.status(), StatusCode::OK);
    let body = axum::body::to_bytes(info.into_body(), usize::MAX).await.unwrap();
    let entry: RegistryEntry = serde_json::from_slice(&body).unwrap();
    assert_eq!(entry.name, "api");
    assert_eq!(entry.port, 4300);

    fleet.land().await.unwrap();
}

#[tokio::test]
async fn test_land_stops_wings_and_cancels() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = fleet(dir.path(), STARTS);
    let (app, shutdown) = app(Arc::clone(&fleet));

    let started = app
        .clone()
        .oneshot(request(Method::POST, "/wing/start", Some(start_body(dir.path(), "api", 4310))))
        .await
        .unwrap();
    progress_lines(started.into_body()).await;
    assert!(fleet.supervisor().is_live("api"));

    let landed = app.oneshot(request(Method::POST, "/land", None)).await.unwrap();
    assert_eq!(landed.status(), StatusCode::OK);
    assert!(shutdown.is_cancelled());
    assert!(fleet.supervisor().live_names().is_empty());
}

// ============================================================================
// Progress bodies
// ============================================================================

#[tokio::test]
async fn test_start_streams_info_lines() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = fleet(dir.path(), STARTS);
    let (app, _) = app(Arc::clone(&fleet));

    let response = app
        .oneshot(request(Method::POST, "/wing/start", Some(start_body(dir.path(), "api", 4320))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/x-ndjson");

    let (lines, clean) = progress_lines(response.into_body()).await;
    assert!(clean);
    assert!(lines.iter().all(|line| matches!(line, ProgressLine::Info { .. })));
    assert_eq!(lines.first(), Some(&ProgressLine::info("Launching new wing:")));
    assert!(lines.iter().any(|line| line.message().starts_with("Wing \"api\" launched")));

    fleet.land().await.unwrap();
}

#[tokio::test]
async fn test_failure_sends_error_line_then_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = app(fleet(dir.path(), FAILS));

    let response = app
        .oneshot(request(Method::POST, "/wing/start", Some(start_body(dir.path(), "api", 4330))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (lines, clean) = progress_lines(response.into_body()).await;
    assert!(!clean);
    assert_eq!(lines.last(), Some(&ProgressLine::error(Error::Spawn("EADDRINUSE".into()).to_string())));
}

#[tokio::test]
async fn test_delete_of_unknown_wing_fails_the_body() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = app(fleet(dir.path(), STARTS));

    let response = app
        .oneshot(request(Method::DELETE, "/wing/delete", Some(json!({ "name": "ghost" }))))
        .await
        .unwrap();

    let (lines, clean) = progress_lines(response.into_body()).await;
    assert!(!clean);
    assert_eq!(lines, vec![ProgressLine::error(Error::NotFound("ghost".into()).to_string())]);
}

// ============================================================================
// Client against a live listener
// ============================================================================

async fn serve(fleet: Arc<Fleet>) -> (MotherShipClient, CancellationToken) {
    let (app, shutdown) = app(fleet);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let descriptor = Descriptor {
        port: listener.local_addr().unwrap().port(),
        pid: std::process::id(),
        auth_token: TOKEN.to_string(),
    };
    tokio::spawn(api::serve(listener, app, shutdown.clone()));
    (MotherShipClient::new("127.0.0.1", &descriptor), shutdown)
}

#[tokio::test]
async fn test_client_receives_progress_and_end() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = fleet(dir.path(), STARTS);
    let (client, shutdown) = serve(Arc::clone(&fleet)).await;

    client.ping().await.unwrap();

    let sink: EventStream<ProgressLine, Error> = EventStream::new();
    let lines = sink.accumulate();
    let request = StartRequest {
        name: Some("api".into()),
        port: 4340,
        cwd: dir.path().to_path_buf(),
        config: write_config(dir.path(), "hook.json"),
    };
    client.stream_into(reqwest::Method::POST, "/wing/start", &request, sink).await;

    let lines = lines.await.unwrap();
    assert!(lines.iter().any(|line| line.message().starts_with("Wing \"api\" launched")));

    let entries = client.list().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(client.info("api").await.unwrap().port, 4340);
    assert_eq!(client.info("ghost").await, Err(Error::NotFound("ghost".into())));

    client.land().await.unwrap();
    assert!(shutdown.is_cancelled());
}

#[tokio::test]
async fn test_client_fails_with_remote_error() {
    let dir = tempfile::tempdir().unwrap();
    let (client, shutdown) = serve(fleet(dir.path(), STARTS)).await;

    let sink: EventStream<ProgressLine, Error> = EventStream::new();
    let seen = sink.accumulate();
    client
        .stream_into(
            reqwest::Method::PUT,
            "/wing/stop",
            &json!({ "name": "ghost" }),
            sink,
        )
        .await;

    let expected = Error::NotFound("ghost".into()).to_string();
    assert_eq!(seen.await, Err(Error::Remote(expected)));
    shutdown.cancel();
}

#[tokio::test]
async fn test_client_with_wrong_token_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (client, shutdown) = serve(fleet(dir.path(), STARTS)).await;
    let port: u16 = client.base_url().rsplit(':').next().unwrap().parse().unwrap();

    let intruder = MotherShipClient::new(
        "127.0.0.1",
        &Descriptor {
            port,
            pid: 1,
            auth_token: "wrong".into(),
        },
    );
    assert!(matches!(intruder.list().await, Err(Error::Remote(_))));
    assert!(intruder.ping().await.is_err());

    client.ping().await.unwrap();
    shutdown.cancel();
}
