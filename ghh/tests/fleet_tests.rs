//! Fleet operations: supervisor outcomes reflected in the registry.

mod common;

use common::*;
use event_stream::EventStream;
use ghh::supervisor::Progress;
use ghh::{Error, StartRequest, WingStatus};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn progress() -> EventStream<Progress, Error> {
    EventStream::new()
}

fn start_request(dir: &Path, name: Option<&str>, port: u16) -> StartRequest {
    StartRequest {
        name: name.map(str::to_string),
        port,
        cwd: dir.to_path_buf(),
        config: write_config(dir, "hook.json"),
    }
}

#[tokio::test]
async fn test_entry_is_registered_after_handshake() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = fleet(dir.path(), STARTS);

    let entry = fleet.start(start_request(dir.path(), None, 4200), &progress()).await.unwrap();

    assert_eq!(entry.name, "hook");
    assert_eq!(entry.status, WingStatus::Active);
    assert!(entry.pid.is_some());
    assert_eq!(entry.log_file_path, dir.path().join("logs").join("hook.log"));
    assert_eq!(fleet.registry().get("hook"), Some(entry));

    fleet.land().await.unwrap();
    assert_eq!(fleet.registry().get("hook").unwrap().status, WingStatus::Stopped);
}

#[tokio::test]
async fn test_failed_spawn_registers_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = fleet(dir.path(), FAILS);

    let result = fleet.start(start_request(dir.path(), Some("api"), 4201), &progress()).await;

    assert_eq!(result, Err(Error::Spawn("EADDRINUSE".to_string())));
    assert!(fleet.registry().get_all().is_empty());
    assert!(fleet.supervisor().is_name_free("api"));
}

#[tokio::test]
async fn test_invalid_config_is_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = fleet(dir.path(), STARTS);
    let config = dir.path().join("broken.json");
    std::fs::write(&config, r#"{ "hookPath": "/ping", "projects": [] }"#).unwrap();

    let request = StartRequest {
        name: None,
        port: 4202,
        cwd: dir.path().to_path_buf(),
        config,
    };
    let result = fleet.start(request, &progress()).await;

    assert!(matches!(result, Err(Error::ConfigMismatch(_))), "{result:?}");
    assert!(fleet.registry().get_all().is_empty());
}

#[tokio::test]
async fn test_registered_stopped_name_is_not_reused() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = fleet(dir.path(), STARTS);

    fleet.start(start_request(dir.path(), None, 4203), &progress()).await.unwrap();
    fleet.stop("hook", &progress()).await.unwrap();

    let second = fleet.start(start_request(dir.path(), None, 4204), &progress()).await.unwrap();
    assert_eq!(second.name, "hook-1");

    let named = fleet.start(start_request(dir.path(), Some("hook"), 4205), &progress()).await;
    assert_eq!(named, Err(Error::NameConflict("hook".to_string())));

    fleet.land().await.unwrap();
}

#[tokio::test]
async fn test_stop_marks_entry_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = fleet(dir.path(), STARTS);
    let steps = progress();
    let lines = steps.accumulate();

    fleet.start(start_request(dir.path(), Some("api"), 4210), &steps).await.unwrap();
    let entry = fleet.stop("api", &steps).await.unwrap();
    steps.end();

    assert_eq!(entry.status, WingStatus::Stopped);
    assert_eq!(entry.pid, None);
    assert!(!fleet.supervisor().is_live("api"));

    let lines: Vec<String> = lines.await.unwrap().iter().map(ToString::to_string).collect();
    assert!(lines.iter().any(|l| l.starts_with("Wing \"api\" launched")));
    assert!(lines.iter().any(|l| l.starts_with("Wing \"api\" stopped")));
}

#[tokio::test]
async fn test_stop_of_stopped_entry_is_not_found_without_mutation() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = fleet(dir.path(), STARTS);

    fleet.start(start_request(dir.path(), Some("api"), 4211), &progress()).await.unwrap();
    let stopped = fleet.stop("api", &progress()).await.unwrap();

    assert_eq!(fleet.stop("api", &progress()).await, Err(Error::NotFound("api".to_string())));
    assert_eq!(fleet.registry().get("api"), Some(stopped));
}

#[tokio::test]
async fn test_delete_only_when_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = fleet(dir.path(), STARTS);

    fleet.start(start_request(dir.path(), Some("api"), 4220), &progress()).await.unwrap();
    assert_eq!(
        fleet.delete("api", &progress()).await,
        Err(Error::StillActive("api".to_string()))
    );
    assert!(fleet.registry().has("api"));

    fleet.stop("api", &progress()).await.unwrap();
    let removed = fleet.delete("api", &progress()).await.unwrap();
    assert_eq!(removed.name, "api");
    assert!(!fleet.registry().has("api"));

    assert_eq!(
        fleet.delete("api", &progress()).await,
        Err(Error::NotFound("api".to_string()))
    );
}

#[tokio::test]
async fn test_restart_moves_to_new_port() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = fleet(dir.path(), STARTS);

    let before = fleet.start(start_request(dir.path(), Some("api"), 4230), &progress()).await.unwrap();
    let after = fleet.restart("api", Some(4231), &progress()).await.unwrap();

    assert_eq!(after.status, WingStatus::Active);
    assert_eq!(after.port, 4231);
    assert_ne!(after.pid, before.pid);
    assert_eq!(after.log_file_path, before.log_file_path);
    assert_eq!(fleet.supervisor().live_port("api"), Some(4231));
    assert!(fleet.supervisor().is_port_free(4230));

    fleet.land().await.unwrap();
}

#[tokio::test]
async fn test_restart_of_stopped_wing_reuses_port() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = fleet(dir.path(), STARTS);

    fleet.start(start_request(dir.path(), Some("api"), 4232), &progress()).await.unwrap();
    fleet.stop("api", &progress()).await.unwrap();

    let after = fleet.restart("api", None, &progress()).await.unwrap();
    assert_eq!(after.status, WingStatus::Active);
    assert_eq!(after.port, 4232);

    fleet.land().await.unwrap();
}

#[tokio::test]
async fn test_restart_unknown_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = fleet(dir.path(), STARTS);
    assert_eq!(
        fleet.restart("ghost", None, &progress()).await,
        Err(Error::NotFound("ghost".to_string()))
    );
}

#[tokio::test]
async fn test_crashed_wing_is_marked_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = fleet(dir.path(), CRASHES);
    let _crashes = fleet.watch_exits();

    fleet.start(start_request(dir.path(), Some("api"), 4240), &progress()).await.unwrap();
    let exit = fleet.supervisor().exits().first();
    exit.await.unwrap().unwrap();

    let entry = fleet.registry().get("api").unwrap();
    assert_eq!(entry.status, WingStatus::Stopped);
    assert_eq!(entry.pid, None);
}

/// Reports FAILURE when asked to listen on 4251, otherwise behaves like STARTS.
const FAILS_ON_4251: &str = r#"if [ "$PORT" = 4251 ]; then printf '{"type":"FAILURE","error":"boom"}\n' >&3; exit 1; fi; printf '{"type":"STARTED","pid":%d,"port":%s}\n' $$ "$PORT" >&3; exec sleep 30"#;

/// Waits before reporting STARTED.
const SLOW_START: &str = r#"sleep 0.5; printf '{"type":"STARTED","pid":%d,"port":%s}\n' $$ "$PORT" >&3; exec sleep 30"#;

#[tokio::test]
async fn test_failed_restart_leaves_entry_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = fleet(dir.path(), FAILS_ON_4251);

    fleet.start(start_request(dir.path(), Some("api"), 4250), &progress()).await.unwrap();
    let result = fleet.restart("api", Some(4251), &progress()).await;

    assert_eq!(result, Err(Error::Spawn("boom".to_string())));
    let entry = fleet.registry().get("api").unwrap();
    assert_eq!(entry.status, WingStatus::Stopped);
    assert_eq!(entry.pid, None);
    assert_eq!(entry.port, 4250);
    assert!(!fleet.supervisor().is_live("api"));
    assert!(fleet.supervisor().is_name_free("api"));
}

#[tokio::test]
async fn test_restart_onto_taken_port_keeps_wing_running() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = fleet(dir.path(), STARTS);

    let before = fleet.start(start_request(dir.path(), Some("api"), 4252), &progress()).await.unwrap();
    fleet.start(start_request(dir.path(), Some("web"), 4253), &progress()).await.unwrap();

    let result = fleet.restart("api", Some(4253), &progress()).await;
    assert_eq!(result, Err(Error::PortConflict(4253)));

    let entry = fleet.registry().get("api").unwrap();
    assert_eq!(entry.status, WingStatus::Active);
    assert_eq!(entry.pid, before.pid);
    assert_eq!(entry.port, 4252);
    assert_eq!(fleet.supervisor().live_port("api"), Some(4252));

    fleet.land().await.unwrap();
}

#[tokio::test]
async fn test_entry_is_absent_while_spawn_is_in_flight() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = fleet(dir.path(), SLOW_START);

    let starting = {
        let fleet = Arc::clone(&fleet);
        let request = start_request(dir.path(), Some("api"), 4254);
        tokio::spawn(async move { fleet.start(request, &progress()).await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!fleet.registry().has("api"));
    assert!(!fleet.supervisor().is_name_free("api"));

    let entry = starting.await.unwrap().unwrap();
    assert_eq!(entry.status, WingStatus::Active);
    assert!(fleet.registry().has("api"));

    fleet.land().await.unwrap();
}
