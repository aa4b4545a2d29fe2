//! Configuration for the mother-ship and the CLI.
//!
//! Everything lives under the ghh home directory (`~/.ghh` unless `GHH_HOME`
//! says otherwise):
//!
//! ```text
//! ~/.ghh/
//! ├── config.toml          # Optional settings, see GhhConfig
//! ├── mother-ship.json     # Connection descriptor of the running daemon
//! ├── registry.json        # Fleet membership
//! └── logs/
//!     ├── mother-ship.log  # Daemon tracing output
//!     ├── mother-ship.out  # Daemon stdout/stderr
//!     └── wings/           # One log file per wing
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const ENV_HOME: &str = "GHH_HOME";
pub const ENV_CONFIG_PATH: &str = "GHH_CONFIG_PATH";
pub const ENV_LOG_LEVEL: &str = "GHH_LOG_LEVEL";
pub const ENV_MOTHER_SHIP_PORT: &str = "GHH_MOTHER_SHIP_PORT";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Settings read from `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GhhConfig {
    pub mother_ship: MotherShipSection,
    pub logs: LogsSection,
}

/// Control-plane listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotherShipSection {
    pub host: String,
    /// `0` picks an ephemeral port
    pub port: u16,
}

impl Default for MotherShipSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsSection {
    /// Daemon log level
    pub level: String,
    /// Lines printed by `ghh logs` before following
    pub tail_lines: usize,
    /// Poll interval of the log watcher
    pub poll_interval_ms: u64,
}

impl Default for LogsSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            tail_lines: 20,
            poll_interval_ms: 500,
        }
    }
}

impl GhhConfig {
    /// Load `config.toml` from the default location, falling back to
    /// defaults when it does not exist, then apply environment overrides.
    pub fn load(paths: &GhhPaths) -> Result<Self> {
        let path = match std::env::var(ENV_CONFIG_PATH) {
            Ok(path) => PathBuf::from(path),
            Err(_) => paths.config(),
        };

        let mut config = if path.exists() {
            Self::load_from_path(&path)?
        } else {
            debug!("No config at {}, using defaults", path.display());
            Self::default()
        };

        config.merge_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path, without overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content).with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Merge environment variable overrides into the configuration.
    pub fn merge_env_vars(&mut self) -> Result<()> {
        if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
            debug!("Overriding log level from environment: {}", level);
            self.logs.level = level;
        }

        if let Ok(port) = std::env::var(ENV_MOTHER_SHIP_PORT) {
            self.mother_ship.port = port
                .parse()
                .with_context(|| format!("{} must be a port number, got {:?}", ENV_MOTHER_SHIP_PORT, port))?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.logs.level.as_str()) {
            anyhow::bail!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logs.level,
                VALID_LOG_LEVELS.join(", ")
            );
        }
        if self.logs.poll_interval_ms == 0 {
            anyhow::bail!("logs.poll_interval_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.logs.poll_interval_ms)
    }
}

/// Locations of every file ghh reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GhhPaths {
    home: PathBuf,
}

impl GhhPaths {
    /// `$GHH_HOME`, or `~/.ghh`.
    pub fn resolve() -> Result<Self> {
        if let Ok(home) = std::env::var(ENV_HOME) {
            return Ok(Self::at(home));
        }

        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(Self::at(home.join(".ghh")))
    }

    pub fn at(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Create the home and log directories.
    pub fn ensure(&self) -> Result<()> {
        for dir in [self.home.clone(), self.logs_dir(), self.wing_logs_dir()] {
            std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn config(&self) -> PathBuf {
        self.home.join("config.toml")
    }

    pub fn descriptor(&self) -> PathBuf {
        self.home.join("mother-ship.json")
    }

    pub fn registry(&self) -> PathBuf {
        self.home.join("registry.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    pub fn daemon_log(&self) -> PathBuf {
        self.logs_dir().join("mother-ship.log")
    }

    pub fn daemon_output(&self) -> PathBuf {
        self.logs_dir().join("mother-ship.out")
    }

    pub fn wing_logs_dir(&self) -> PathBuf {
        self.logs_dir().join("wings")
    }
}
