//! Shared helpers for ghh integration tests.
//!
//! Wings are played by `/bin/sh` scripts that write their handshake to the
//! control channel on fd 3.

#![allow(dead_code)]

use ghh::supervisor::{LogFile, SpawnRequest, WingProgram};
use ghh::wing::WingConfig;
use ghh::{Fleet, Registry, Supervisor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Reports STARTED with its own pid and port, then idles until signalled.
pub const STARTS: &str = r#"printf '{"type":"STARTED","pid":%d,"port":%s}\n' $$ "$PORT" >&3; exec sleep 30"#;

/// Reports a listen failure and exits.
pub const FAILS: &str = r#"printf '{"type":"FAILURE","error":"EADDRINUSE"}\n' >&3; exit 1"#;

/// Reports STARTED, then dies on its own shortly after.
pub const CRASHES: &str = r#"printf '{"type":"STARTED","pid":%d,"port":%s}\n' $$ "$PORT" >&3; sleep 0.3; exit 7"#;

/// Exits without saying anything.
pub const SILENT_EXIT: &str = "exit 3";

/// Writes something that is not a handshake.
pub const GARBLED: &str = "echo 'hello there' >&3; exec sleep 30";

pub const EMPTY_CONFIG: &str = r#"{ "projects": [] }"#;

pub fn program(script: &str) -> WingProgram {
    WingProgram::new("/bin/sh", ["-c", script])
}

pub fn wing_config() -> WingConfig {
    WingConfig::decode(EMPTY_CONFIG).unwrap()
}

/// Write `hook.json` into `dir` and return its path.
pub fn write_config(dir: &Path, file_name: &str) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, EMPTY_CONFIG).unwrap();
    path
}

pub fn spawn_request(dir: &Path, name: Option<&str>, port: u16) -> SpawnRequest {
    SpawnRequest {
        name: name.map(str::to_string),
        port,
        cwd: dir.to_path_buf(),
        log_file: LogFile::InDir(dir.join("logs")),
        config_file: dir.join("hook.json"),
        config: wing_config(),
    }
}

/// Fleet over an in-memory registry whose wings run `script`.
pub fn fleet(dir: &Path, script: &str) -> Arc<Fleet> {
    Arc::new(Fleet::new(
        Supervisor::new(program(script)),
        Arc::new(Registry::in_memory()),
        dir.join("logs"),
    ))
}
