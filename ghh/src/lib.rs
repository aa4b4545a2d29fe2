//! ghh - local supervisor for a fleet of GitHub webhook listeners
//!
//! A long-lived daemon (the mother-ship) spawns, tracks and stops worker
//! processes (wings). The CLI talks to it over an authenticated local HTTP
//! control plane.
//!
//! # Architecture
//!
//! - `supervisor` - process lifecycle of wings and the live table
//! - `registry` - persisted fleet membership
//! - `fleet` - supervisor and registry driven together
//! - `control` - pipe-based handshakes between parent and child processes
//! - `api` - control-plane HTTP server
//! - `client` - descriptor, HTTP client and log tailing
//! - `wing` - the worker process
//! - `commands` - CLI operations

#[cfg(not(unix))]
compile_error!("ghh relies on unix process groups, signals and pipes");

pub mod api;
pub mod client;
pub mod commands;
pub mod config;
pub mod control;
pub mod error;
pub mod fleet;
pub mod registry;
pub mod supervisor;
pub mod wing;

pub use config::{GhhConfig, GhhPaths};
pub use error::{Error, Result};
pub use fleet::{Fleet, StartRequest};
pub use registry::{Registry, RegistryEntry, WingStatus};
pub use supervisor::{Progress, Supervisor, WingProgram};

/// ghh version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
