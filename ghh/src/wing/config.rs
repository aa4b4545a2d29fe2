//! Shape of a wing config file.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Webhook listener configuration, read from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gh_security_key: Option<String>,
    pub projects: Vec<Project>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repos: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branches: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envs: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gh_security_key: Option<String>,
    pub scripts: Scripts,
}

/// One script or a list of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scripts {
    One(ScriptEntry),
    Many(Vec<ScriptEntry>),
}

/// A bare command line or a script with its own cwd and environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptEntry {
    Command(String),
    Detailed(Script),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub script: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envs: Option<BTreeMap<String, String>>,
}

impl Scripts {
    pub fn entries(&self) -> Vec<&ScriptEntry> {
        match self {
            Scripts::One(entry) => vec![entry],
            Scripts::Many(entries) => entries.iter().collect(),
        }
    }
}

impl WingConfig {
    /// Parse and validate a config document.
    pub fn decode(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw).map_err(|e| Error::ConfigMismatch(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigMismatch(format!("cannot read {}: {e}", path.display())))?;
        Self::decode(&raw)
    }

    /// Route the listener accepts webhooks on.
    pub fn hook_path(&self) -> &str {
        self.hook_path.as_deref().unwrap_or("/")
    }

    fn validate(&self) -> Result<()> {
        let path = self.hook_path();
        if !path.starts_with('/') {
            return Err(Error::ConfigMismatch(format!("hookPath must start with '/', got {path:?}")));
        }
        if path == "/ping" || path.contains(['{', '}', '*']) {
            return Err(Error::ConfigMismatch(format!("hookPath {path:?} is reserved")));
        }
        Ok(())
    }
}
