//! Configuration loading from `sshbatch.toml`

use std::path::{Path, PathBuf};

use eyre::WrapErr;
use serde::{Deserialize, Serialize};
use sshbatch_core::RunnerConfig;

const CONFIG_ENV: &str = "SSHBATCH_CONFIG";
const CONFIG_FILE: &str = "sshbatch.toml";

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Runner tunables
    #[serde(default)]
    pub runner: RunnerConfig,
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .wrap_err_with(|| format!("invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// Load from `SSHBATCH_CONFIG` or the default paths, else defaults
    ///
    /// # Errors
    /// Returns error if a config file is found but cannot be loaded
    pub fn load_default() -> eyre::Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load(Path::new(&path));
        }
        Self::load_first(&default_paths())
    }

    /// Load the first existing file of `paths`
    fn load_first(paths: &[PathBuf]) -> eyre::Result<Self> {
        for path in paths {
            if path.exists() {
                tracing::debug!(path = %path.display(), "loading config");
                return Self::load(path);
            }
        }

        tracing::debug!("no config file found, using defaults");
        Ok(Config::default())
    }
}

fn default_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("sshbatch").join(CONFIG_FILE));
    }
    paths
}
