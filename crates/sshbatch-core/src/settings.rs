//! Persisted connection settings
//!
//! Only the host, user and port are remembered between runs. The credential
//! has no field here and is never written to disk.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use sshbatch_exec::result::ConnectionParams;
use tracing::{debug, warn};

use crate::error::SettingsError;

const APP_DIR: &str = "sshbatch";
const SETTINGS_FILE: &str = "settings.json";

/// Last used connection target; port kept as text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionSettings {
    pub ip: String,
    pub user: String,
    pub port: String,
}

impl ConnectionSettings {
    pub fn new(ip: impl Into<String>, user: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user: user.into(),
            port: port.into(),
        }
    }

    /// Durable part of `params`
    #[must_use]
    pub fn from_params(params: &ConnectionParams) -> Self {
        Self::new(&params.host, &params.user, params.port.to_string())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ip.is_empty() && self.user.is_empty() && self.port.is_empty()
    }
}

/// Reads and writes `ConnectionSettings` at a fixed path
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<config dir>/sshbatch/settings.json`
    ///
    /// # Errors
    /// Returns `SettingsError::NoConfigDir` if the platform has no config directory
    pub fn default_location() -> Result<Self, SettingsError> {
        let dir = dirs::config_dir().ok_or(SettingsError::NoConfigDir)?;
        Ok(Self::new(dir.join(APP_DIR).join(SETTINGS_FILE)))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings; empty settings if the file is missing or unusable
    #[must_use]
    pub fn load(&self) -> ConnectionSettings {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no settings file, using defaults");
                return ConnectionSettings::default();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read settings");
                return ConnectionSettings::default();
            }
        };

        let document: Value = match serde_json::from_str(&content) {
            Ok(document) => document,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to parse settings");
                return ConnectionSettings::default();
            }
        };

        let Value::Object(fields) = document else {
            warn!(path = %self.path.display(), "settings root is not an object, ignoring");
            return ConnectionSettings::default();
        };

        let text = |key: &str| match fields.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };

        ConnectionSettings {
            ip: text("ip"),
            user: text("user"),
            port: text("port"),
        }
    }

    /// Write settings, creating parent directories
    ///
    /// # Errors
    /// Returns `SettingsError::Io` if the directory or file cannot be written
    pub fn save(&self, settings: &ConnectionSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let content = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, content).map_err(|source| SettingsError::Io {
            path: self.path.clone(),
            source,
        })?;

        debug!(path = %self.path.display(), "saved settings");
        Ok(())
    }
}
