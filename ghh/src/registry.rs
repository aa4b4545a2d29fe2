//! Fleet membership: one entry per wing name, persisted as JSON.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WingStatus {
    Active,
    Stopped,
}

impl std::fmt::Display for WingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WingStatus::Active => write!(f, "ACTIVE"),
            WingStatus::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// A registered wing. `pid` is set exactly while the status is `ACTIVE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub name: String,
    pub status: WingStatus,
    pub pid: Option<u32>,
    pub port: u16,
    pub cwd: PathBuf,
    pub log_file_path: PathBuf,
    pub config_file_path: PathBuf,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

impl RegistryEntry {
    /// Entry for a freshly spawned wing.
    pub fn active(
        name: impl Into<String>,
        pid: u32,
        port: u16,
        cwd: impl Into<PathBuf>,
        log_file_path: impl Into<PathBuf>,
        config_file_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            status: WingStatus::Active,
            pid: Some(pid),
            port,
            cwd: cwd.into(),
            log_file_path: log_file_path.into(),
            config_file_path: config_file_path.into(),
            started_at: Some(Utc::now()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == WingStatus::Active
    }

    fn mark_stopped(&mut self) {
        self.status = WingStatus::Stopped;
        self.pid = None;
        self.started_at = None;
    }
}

/// In-memory registry, optionally mirrored to a file.
#[derive(Debug)]
pub struct Registry {
    entries: Mutex<BTreeMap<String, RegistryEntry>>,
    path: Option<PathBuf>,
}

impl Registry {
    /// Registry that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            path: None,
        }
    }

    /// Load `path` if it exists.
    ///
    /// Loaded entries are marked stopped: a freshly started daemon owns no
    /// processes.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut entries = BTreeMap::new();

        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let loaded: Vec<RegistryEntry> = serde_json::from_str(&raw)?;
            for mut entry in loaded {
                entry.mark_stopped();
                entries.insert(entry.name.clone(), entry);
            }
            info!(count = entries.len(), path = %path.display(), "Registry loaded");
        } else {
            debug!(path = %path.display(), "No registry file, starting empty");
        }

        let registry = Self {
            entries: Mutex::new(entries),
            path: Some(path),
        };
        registry.persist(&registry.entries.lock());
        Ok(registry)
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.lock().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<RegistryEntry> {
        self.entries.lock().get(name).cloned()
    }

    /// Every entry, ordered by name.
    pub fn get_all(&self) -> Vec<RegistryEntry> {
        self.entries.lock().values().cloned().collect()
    }

    pub fn add(&self, entry: RegistryEntry) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&entry.name) {
            return Err(Error::AlreadyRegistered(entry.name));
        }
        debug!(name = %entry.name, "Registry add");
        entries.insert(entry.name.clone(), entry);
        self.persist(&entries);
        Ok(())
    }

    /// Mark `name` active with a new pid and, optionally, a new port.
    pub fn set_active(&self, name: &str, pid: u32, port: Option<u16>) -> Result<RegistryEntry> {
        self.update(name, |entry| {
            entry.status = WingStatus::Active;
            entry.pid = Some(pid);
            if let Some(port) = port {
                entry.port = port;
            }
            entry.started_at = Some(Utc::now());
        })
    }

    /// Mark `name` stopped and clear its pid.
    pub fn set_stopped(&self, name: &str) -> Result<RegistryEntry> {
        self.update(name, RegistryEntry::mark_stopped)
    }

    pub fn delete(&self, name: &str) -> Result<RegistryEntry> {
        let mut entries = self.entries.lock();
        let removed = entries.remove(name).ok_or_else(|| Error::NotFound(name.to_string()))?;
        self.persist(&entries);
        Ok(removed)
    }

    fn update(&self, name: &str, apply: impl FnOnce(&mut RegistryEntry)) -> Result<RegistryEntry> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(name).ok_or_else(|| Error::NotFound(name.to_string()))?;
        apply(entry);
        let updated = entry.clone();
        self.persist(&entries);
        Ok(updated)
    }

    /// Memory stays authoritative when the disk write fails.
    ///
    /// Runs synchronously with the entries lock held, so the file always
    /// reflects the latest mutation. The file is a few hundred bytes.
    fn persist(&self, entries: &BTreeMap<String, RegistryEntry>) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(err) = write_atomically(path, entries) {
            warn!(path = %path.display(), error = %err, "Failed to persist registry");
        }
    }
}

fn write_atomically(path: &Path, entries: &BTreeMap<String, RegistryEntry>) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let list: Vec<&RegistryEntry> = entries.values().collect();
    let content = serde_json::to_vec_pretty(&list)?;

    let temp_path = path.with_extension("json.tmp");
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)
}
