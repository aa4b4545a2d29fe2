//! Process lifecycle of wings.
//!
//! The supervisor owns the live table: the names and ports held by running
//! (or starting) wings and the bookkeeping of every process that completed
//! its handshake. Names and ports are reserved synchronously before a spawn
//! first suspends, so concurrent requests for the same name or port are
//! serialised by the reservation.

use crate::control::{self, ControlChannel};
use crate::error::{Error, Result};
use crate::wing::{Handshake, WingConfig};
use event_stream::EventStream;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Step reported while an operation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Info(String),
    Launched(Launched),
    Stopped { name: String, pid: u32 },
    Removed { name: String },
}

impl Progress {
    pub fn info(msg: impl Into<String>) -> Self {
        Self::Info(msg.into())
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::Info(msg) => write!(f, "{msg}"),
            Progress::Launched(launched) => write!(
                f,
                "Wing \"{}\" launched (PID {}, port {})",
                launched.name, launched.pid, launched.port
            ),
            Progress::Stopped { name, pid } => write!(f, "Wing \"{name}\" stopped (PID {pid})"),
            Progress::Removed { name } => write!(f, "Wing \"{name}\" removed"),
        }
    }
}

/// Executable and arguments that start a wing.
#[derive(Debug, Clone)]
pub struct WingProgram {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl WingProgram {
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// This binary, re-entered through the hidden `internal-wing` command.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, ["internal-wing"]))
    }
}

/// Where a wing writes its output.
#[derive(Debug, Clone)]
pub enum LogFile {
    At(PathBuf),
    /// `<dir>/<name>.log`, once the name is known
    InDir(PathBuf),
}

impl LogFile {
    fn resolve(&self, name: &str) -> PathBuf {
        match self {
            LogFile::At(path) => path.clone(),
            LogFile::InDir(dir) => dir.join(format!("{name}.log")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// Derived from the config file name when absent
    pub name: Option<String>,
    pub port: u16,
    pub cwd: PathBuf,
    pub log_file: LogFile,
    pub config_file: PathBuf,
    pub config: WingConfig,
}

/// A wing that completed its handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Launched {
    pub name: String,
    pub pid: u32,
    pub port: u16,
    pub log_file: PathBuf,
}

/// Emitted on [`Supervisor::exits`] whenever a live wing terminates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exited {
    pub name: String,
    pub pid: u32,
    /// Whether the exit followed a stop request
    pub requested: bool,
    /// Exit code, `None` when killed by a signal
    pub status: Option<i32>,
}

struct LiveProcess {
    pid: u32,
    port: u16,
    stopping: bool,
    exited: watch::Receiver<bool>,
}

#[derive(Default)]
struct LiveTable {
    names: HashSet<String>,
    ports: HashSet<u16>,
    processes: HashMap<String, LiveProcess>,
}

/// Name and port held for a spawn in progress. Released on drop unless
/// promoted to a live process.
struct Reservation {
    table: Arc<Mutex<LiveTable>>,
    name: String,
    port: u16,
    promoted: bool,
}

impl Reservation {
    fn promote(mut self, process: LiveProcess) {
        self.table.lock().processes.insert(self.name.clone(), process);
        self.promoted = true;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.promoted {
            return;
        }
        let mut table = self.table.lock();
        table.names.remove(&self.name);
        table.ports.remove(&self.port);
        debug!(name = %self.name, port = self.port, "Reservation released");
    }
}

pub struct Supervisor {
    program: WingProgram,
    table: Arc<Mutex<LiveTable>>,
    exits: EventStream<Exited, Error>,
}

impl Supervisor {
    pub fn new(program: WingProgram) -> Self {
        Self {
            program,
            table: Arc::new(Mutex::new(LiveTable::default())),
            exits: EventStream::new(),
        }
    }

    /// Terminations of live wings, requested or not.
    pub fn exits(&self) -> EventStream<Exited, Error> {
        self.exits.clone()
    }

    pub fn is_live(&self, name: &str) -> bool {
        self.table.lock().processes.contains_key(name)
    }

    pub fn is_name_free(&self, name: &str) -> bool {
        !self.table.lock().names.contains(name)
    }

    pub fn is_port_free(&self, port: u16) -> bool {
        !self.table.lock().ports.contains(&port)
    }

    /// Port of the live wing called `name`.
    pub fn live_port(&self, name: &str) -> Option<u16> {
        self.table.lock().processes.get(name).map(|p| p.port)
    }

    /// Names of wings that completed their handshake and have not exited.
    pub fn live_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.table.lock().processes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Start a wing and wait for its handshake.
    ///
    /// `is_registered` reports names taken outside the live table. Name and
    /// port are checked and reserved before the first suspension point.
    pub async fn spawn(
        &self,
        request: SpawnRequest,
        is_registered: impl Fn(&str) -> bool,
        progress: &EventStream<Progress, Error>,
    ) -> Result<Launched> {
        let reservation = self.reserve(&request, &is_registered)?;
        let name = reservation.name.clone();
        let port = reservation.port;
        let log_file = request.log_file.resolve(&name);

        progress.emit(Progress::info("Launching new wing:"));
        progress.emit(Progress::info(format!("  Name: {name}")));
        progress.emit(Progress::info(format!("  Port: {port}")));
        progress.emit(Progress::info(format!("  Config: {}", request.config_file.display())));

        let (mut child, channel) = self.launch(&request, port, &log_file)?;

        let handshake = match channel.into_receiver() {
            Ok(receiver) => control::await_handshake::<Handshake>(receiver, &mut child).await,
            Err(err) => Err(err.into()),
        };

        let reported_pid = match handshake {
            Ok(Handshake::Started { pid, port: reported }) => {
                if reported != port {
                    warn!(name = %name, port, reported, "Wing reported a different port");
                }
                pid
            }
            Ok(Handshake::Failure { error }) => {
                reap(&mut child).await;
                return Err(Error::Spawn(error));
            }
            Err(err) => {
                reap(&mut child).await;
                return Err(err);
            }
        };

        let pid = child.id().unwrap_or(reported_pid);
        let (exited_tx, exited_rx) = watch::channel(false);
        reservation.promote(LiveProcess {
            pid,
            port,
            stopping: false,
            exited: exited_rx,
        });

        tokio::spawn(monitor(
            child,
            name.clone(),
            pid,
            Arc::clone(&self.table),
            self.exits.clone(),
            exited_tx,
        ));

        info!(name = %name, pid, port, "Wing launched");
        Ok(Launched {
            name,
            pid,
            port,
            log_file,
        })
    }

    fn reserve(&self, request: &SpawnRequest, is_registered: &impl Fn(&str) -> bool) -> Result<Reservation> {
        let mut table = self.table.lock();

        let name = {
            let taken = |candidate: &str| table.names.contains(candidate) || is_registered(candidate);
            match &request.name {
                Some(name) if taken(name) => return Err(Error::NameConflict(name.clone())),
                Some(name) => name.clone(),
                None => derive_name(&config_stem(&request.config_file), &taken),
            }
        };

        if table.ports.contains(&request.port) {
            return Err(Error::PortConflict(request.port));
        }

        table.names.insert(name.clone());
        table.ports.insert(request.port);
        debug!(name = %name, port = request.port, "Reserved");

        Ok(Reservation {
            table: Arc::clone(&self.table),
            name,
            port: request.port,
            promoted: false,
        })
    }

    fn launch(&self, request: &SpawnRequest, port: u16, log_file: &Path) -> Result<(Child, ControlChannel)> {
        if let Some(parent) = log_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let log = OpenOptions::new().create(true).append(true).open(log_file)?;
        let config = serde_json::to_string(&request.config)?;

        let mut command = Command::new(&self.program.program);
        command
            .args(&self.program.args)
            .current_dir(&request.cwd)
            .env("PORT", port.to_string())
            .env("CONFIG", config)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log));

        let channel = ControlChannel::new()?;
        channel.attach(&mut command);

        let child = command
            .spawn()
            .map_err(|e| Error::spawn(format!("cannot start {}: {e}", self.program.program.display())))?;
        drop(command);

        Ok((child, channel))
    }

    /// Send SIGTERM to `name` and wait until the process is gone.
    ///
    /// Returns the pid of the stopped process. If the signal cannot be
    /// delivered the live table is left untouched.
    pub async fn stop(&self, name: &str) -> Result<u32> {
        let (pid, mut exited) = {
            let mut table = self.table.lock();
            let process = table
                .processes
                .get_mut(name)
                .ok_or_else(|| Error::NotFound(name.to_string()))?;
            process.stopping = true;
            (process.pid, process.exited.clone())
        };

        info!(name, pid, "Stopping wing");
        if let Err(errno) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            if let Some(process) = self.table.lock().processes.get_mut(name) {
                process.stopping = false;
            }
            return Err(Error::Stop {
                pid,
                reason: errno.to_string(),
            });
        }

        // The monitor always reports before dropping its sender.
        let _ = exited.wait_for(|gone| *gone).await;
        Ok(pid)
    }

    /// Stop every live wing concurrently.
    ///
    /// Returns the names that were stopped, or every failure at once.
    pub async fn stop_all(&self) -> Result<Vec<String>> {
        let names = self.live_names();
        let results = futures::future::join_all(names.iter().map(|name| self.stop(name))).await;

        let failures: Vec<Error> = results.into_iter().filter_map(Result::err).collect();
        if failures.is_empty() {
            Ok(names)
        } else {
            Err(Error::StopAll(failures))
        }
    }
}

/// Default wing name: the config file name without its extension.
fn config_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "wing".to_string())
}

/// `base`, or the first free `base-1`, `base-2`, ...
fn derive_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    let mut index = 1;
    loop {
        let candidate = format!("{base}-{index}");
        if !taken(&candidate) {
            return candidate;
        }
        index += 1;
    }
}

async fn reap(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        debug!(%err, "Kill after failed handshake");
    }
    let _ = child.wait().await;
}

async fn monitor(
    mut child: Child,
    name: String,
    pid: u32,
    table: Arc<Mutex<LiveTable>>,
    exits: EventStream<Exited, Error>,
    exited: watch::Sender<bool>,
) {
    let status = child.wait().await;

    let requested = {
        let mut table = table.lock();
        let owned = table.processes.get(&name).is_some_and(|p| p.pid == pid);
        match owned.then(|| table.processes.remove(&name)).flatten() {
            Some(process) => {
                table.ports.remove(&process.port);
                table.names.remove(&name);
                process.stopping
            }
            None => false,
        }
    };

    let code = status.as_ref().ok().and_then(|s| s.code());
    if requested {
        info!(name = %name, pid, ?code, "Wing exited");
    } else {
        warn!(name = %name, pid, ?code, "Wing exited unexpectedly");
    }

    let _ = exited.send(true);
    exits.emit(Exited {
        name,
        pid,
        requested,
        status: code,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_name_probes_suffixes() {
        let taken = ["hook", "hook-1", "hook-2"];
        assert_eq!(derive_name("hook", |n| taken.contains(&n)), "hook-3");
        assert_eq!(derive_name("other", |n| taken.contains(&n)), "other");
    }

    #[test]
    fn test_config_stem() {
        assert_eq!(config_stem(Path::new("/etc/ghh/hook.json")), "hook");
        assert_eq!(config_stem(Path::new("deploy.prod.json")), "deploy.prod");
    }

    #[test]
    fn test_progress_lines() {
        let launched = Progress::Launched(Launched {
            name: "hook".into(),
            pid: 7,
            port: 4000,
            log_file: PathBuf::from("/tmp/hook.log"),
        });
        assert_eq!(launched.to_string(), "Wing \"hook\" launched (PID 7, port 4000)");
        assert_eq!(Progress::info("hi").to_string(), "hi");
    }
}
