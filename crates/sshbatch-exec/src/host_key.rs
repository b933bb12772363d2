//! Server host key verification

use std::path::PathBuf;

use russh::keys::ssh_key::PublicKey;
use russh::keys::check_known_hosts_path;
use russh::keys::known_hosts::learn_known_hosts_path;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ExecError;

/// What to do with the key a server presents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Accept any key without consulting `known_hosts`
    AcceptAll,
    /// Accept and record unknown keys, reject keys that changed
    #[default]
    TrustOnFirstUse,
    /// Accept only keys already present in `known_hosts`
    Strict,
}

/// Applies a `HostKeyPolicy` against a `known_hosts` file
#[derive(Debug, Clone)]
pub struct HostKeyVerifier {
    policy: HostKeyPolicy,
    known_hosts: PathBuf,
}

impl HostKeyVerifier {
    /// Verifier using `known_hosts` at the given path
    pub fn new(policy: HostKeyPolicy, known_hosts: impl Into<PathBuf>) -> Self {
        Self {
            policy,
            known_hosts: known_hosts.into(),
        }
    }

    /// Verifier using `~/.ssh/known_hosts`
    #[must_use]
    pub fn with_default_file(policy: HostKeyPolicy) -> Self {
        Self::new(policy, default_known_hosts())
    }

    #[must_use]
    pub fn policy(&self) -> HostKeyPolicy {
        self.policy
    }

    /// Decide whether to trust `key` for `host:port`
    ///
    /// # Errors
    /// Returns `ExecError::HostKeyRejected` when the policy refuses the key
    pub fn verify(&self, host: &str, port: u16, key: &PublicKey) -> Result<(), ExecError> {
        if self.policy == HostKeyPolicy::AcceptAll {
            warn!(host = %host, port, "host key verification disabled, accepting server key");
            return Ok(());
        }

        let known = check_known_hosts_path(host, port, key, &self.known_hosts)
            .map_err(|e| ExecError::HostKeyRejected(e.to_string()))?;
        if known {
            return Ok(());
        }

        match self.policy {
            HostKeyPolicy::Strict => Err(ExecError::HostKeyRejected(format!(
                "no entry for {host}:{port} in {}",
                self.known_hosts.display()
            ))),
            _ => {
                match learn_known_hosts_path(host, port, key, &self.known_hosts) {
                    Ok(()) => info!(
                        host = %host,
                        port,
                        path = %self.known_hosts.display(),
                        "recorded new host key"
                    ),
                    Err(e) => warn!(
                        host = %host,
                        port,
                        error = %e,
                        "failed to record host key, trusting it for this session"
                    ),
                }
                Ok(())
            }
        }
    }
}

fn default_known_hosts() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".ssh")
        .join("known_hosts")
}
