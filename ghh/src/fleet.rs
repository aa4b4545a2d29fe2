//! Operations on the fleet: the supervisor and the registry driven together.
//!
//! The registry only changes after the supervisor reports an outcome, so a
//! failed spawn or stop never leaves a stale entry behind.

use crate::error::{Error, Result};
use crate::registry::{Registry, RegistryEntry};
use crate::supervisor::{Exited, LogFile, Progress, SpawnRequest, Supervisor};
use crate::wing::WingConfig;
use event_stream::{EventStream, Subscription};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Parameters of a new wing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub port: u16,
    pub cwd: PathBuf,
    /// Path of the wing config file
    pub config: PathBuf,
}

pub struct Fleet {
    supervisor: Supervisor,
    registry: Arc<Registry>,
    wing_logs: PathBuf,
}

impl Fleet {
    pub fn new(supervisor: Supervisor, registry: Arc<Registry>, wing_logs: impl Into<PathBuf>) -> Self {
        Self {
            supervisor,
            registry,
            wing_logs: wing_logs.into(),
        }
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Mark wings stopped when they die without being asked to.
    pub fn watch_exits(&self) -> Subscription {
        let registry = Arc::clone(&self.registry);
        self.supervisor.exits().subscribe_value(move |exit: &Exited| {
            if exit.requested {
                return;
            }
            match registry.set_stopped(&exit.name) {
                Ok(_) => info!(name = %exit.name, status = ?exit.status, "Crashed wing marked stopped"),
                Err(err) => debug!(name = %exit.name, %err, "Exit of unregistered wing"),
            }
        })
    }

    /// Spawn a new wing and register it once its handshake succeeds.
    pub async fn start(&self, request: StartRequest, progress: &EventStream<Progress, Error>) -> Result<RegistryEntry> {
        let config = WingConfig::load(&request.config)?;
        let registry = Arc::clone(&self.registry);

        let launched = self
            .supervisor
            .spawn(
                SpawnRequest {
                    name: request.name,
                    port: request.port,
                    cwd: request.cwd.clone(),
                    log_file: LogFile::InDir(self.wing_logs.clone()),
                    config_file: request.config.clone(),
                    config,
                },
                move |name| registry.has(name),
                progress,
            )
            .await?;

        let entry = RegistryEntry::active(
            &launched.name,
            launched.pid,
            launched.port,
            request.cwd,
            &launched.log_file,
            request.config,
        );
        self.registry.add(entry.clone())?;
        let entry = self.settle_early_exit(entry)?;
        progress.emit(Progress::Launched(launched));
        Ok(entry)
    }

    /// Stop a live wing and mark it stopped.
    pub async fn stop(&self, name: &str, progress: &EventStream<Progress, Error>) -> Result<RegistryEntry> {
        progress.emit(Progress::info(format!("Stopping wing \"{name}\"")));
        let pid = self.supervisor.stop(name).await?;
        let entry = self.registry.set_stopped(name)?;
        progress.emit(Progress::Stopped {
            name: name.to_string(),
            pid,
        });
        Ok(entry)
    }

    /// Stop (if running) and spawn again with the registered settings.
    ///
    /// `port` replaces the registered port. The config file is re-read so
    /// edits take effect.
    pub async fn restart(
        &self,
        name: &str,
        port: Option<u16>,
        progress: &EventStream<Progress, Error>,
    ) -> Result<RegistryEntry> {
        let entry = self.registry.get(name).ok_or_else(|| Error::NotFound(name.to_string()))?;
        let port = port.unwrap_or(entry.port);

        if self.supervisor.live_port(name) != Some(port) && !self.supervisor.is_port_free(port) {
            return Err(Error::PortConflict(port));
        }

        let config = WingConfig::load(&entry.config_file_path)?;
        progress.emit(Progress::info(format!("Restarting wing \"{name}\"")));

        if self.supervisor.is_live(name) {
            self.stop(name, progress).await?;
        } else if entry.is_active() {
            warn!(name, "Active entry without a live process");
            self.registry.set_stopped(name)?;
        }

        let launched = self
            .supervisor
            .spawn(
                SpawnRequest {
                    name: Some(name.to_string()),
                    port,
                    cwd: entry.cwd.clone(),
                    log_file: LogFile::At(entry.log_file_path.clone()),
                    config_file: entry.config_file_path.clone(),
                    config,
                },
                |_| false,
                progress,
            )
            .await?;

        let updated = self.registry.set_active(name, launched.pid, Some(launched.port))?;
        let updated = self.settle_early_exit(updated)?;
        progress.emit(Progress::Launched(launched));
        Ok(updated)
    }

    /// A wing may die between its handshake and its registration, in which
    /// case the exit was seen before the entry existed.
    fn settle_early_exit(&self, entry: RegistryEntry) -> Result<RegistryEntry> {
        if self.supervisor.is_live(&entry.name) {
            return Ok(entry);
        }
        warn!(name = %entry.name, "Wing exited before it was registered");
        self.registry.set_stopped(&entry.name)
    }

    /// Forget a stopped wing.
    pub async fn delete(&self, name: &str, progress: &EventStream<Progress, Error>) -> Result<RegistryEntry> {
        let entry = self.registry.get(name).ok_or_else(|| Error::NotFound(name.to_string()))?;
        if entry.is_active() {
            return Err(Error::StillActive(name.to_string()));
        }

        let removed = self.registry.delete(name)?;
        progress.emit(Progress::Removed {
            name: name.to_string(),
        });
        Ok(removed)
    }

    /// Stop every live wing, marking each stopped one in the registry.
    pub async fn land(&self) -> Result<()> {
        let names = self.supervisor.live_names();
        info!(count = names.len(), "Landing fleet");

        let outcome = self.supervisor.stop_all().await;
        for name in names {
            if !self.supervisor.is_live(&name) {
                if let Err(err) = self.registry.set_stopped(&name) {
                    debug!(name = %name, %err, "Landed wing not in registry");
                }
            }
        }
        outcome.map(|_| ())
    }
}
