//! The worker side: config files, the handshake protocol and the process
//! entry point.

pub mod config;
pub mod handshake;
pub mod runner;

pub use config::WingConfig;
pub use handshake::Handshake;
