//! Error types for the ghh supervisor.

use std::path::PathBuf;

/// Result type alias for ghh operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for ghh.
///
/// Cloneable so it can travel as the error channel of an
/// [`EventStream`](event_stream::EventStream).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Requested wing name is live or registered
    #[error("Name \"{0}\" is already in use")]
    NameConflict(String),

    /// Requested port is held by a live wing
    #[error("Port {0} is already in use")]
    PortConflict(u16),

    /// No live process or registry entry with this name
    #[error("No wing with name \"{0}\"")]
    NotFound(String),

    /// Registry already holds an entry with this name
    #[error("Entry with name \"{0}\" already exists")]
    AlreadyRegistered(String),

    /// Entry must be stopped before this operation
    #[error("Wing \"{0}\" is still active, stop it first")]
    StillActive(String),

    /// Wing config file does not have the expected shape
    #[error("Config format mismatch: {0}")]
    ConfigMismatch(String),

    /// Worker failed before completing its handshake
    #[error("Failed to launch the wing: {0}")]
    Spawn(String),

    /// Termination signal could not be delivered
    #[error("Failed to kill the process with PID {pid}: {reason}")]
    Stop { pid: u32, reason: String },

    /// One or more wings failed to stop during a sweep
    #[error("Failed to stop {} wing(s): {}", .0.len(), join_errors(.0))]
    StopAll(Vec<Error>),

    /// Mother-ship could not be reached
    #[error("Mother-ship is not reachable: {0}")]
    Connectivity(String),

    /// Malformed message on a control channel or progress body
    #[error("Failed to decode message: {0}")]
    Decode(String),

    /// Failure reported by the mother-ship
    #[error("{0}")]
    Remote(String),

    /// Log file has no lines to tail
    #[error("Log file {} is empty", .0.display())]
    EmptyLog(PathBuf),

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),
}

impl Error {
    /// Create a new spawn error
    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::Spawn(msg.into())
    }

    /// Create a new decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new connectivity error
    pub fn connectivity(msg: impl Into<String>) -> Self {
        Self::Connectivity(msg.into())
    }

    /// Whether the error was detected before any process was touched.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::NameConflict(_) | Self::PortConflict(_) | Self::AlreadyRegistered(_) | Self::StillActive(_)
        )
    }
}

fn join_errors(errors: &[Error]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<notify::Error> for Error {
    fn from(err: notify::Error) -> Self {
        Self::Io(err.to_string())
    }
}
