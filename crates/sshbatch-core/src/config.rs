//! Configuration types for runs

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sshbatch_exec::host_key::HostKeyPolicy;

/// What to do after a command exits non-zero
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Log the failure and run the next command
    #[default]
    Continue,
    /// Stop the sequence and end the run with `Error`
    Abort,
}

/// Tunables for `SessionRunner`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Deadline for connect plus authentication, in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// How long stream readers may keep draining after the exit status, in milliseconds
    #[serde(default = "default_reader_grace_ms")]
    pub reader_grace_ms: u64,
    /// Behaviour on non-zero exit codes
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Server key verification
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,
    /// Custom `known_hosts` file (defaults to `~/.ssh/known_hosts`)
    #[serde(default)]
    pub known_hosts: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            reader_grace_ms: default_reader_grace_ms(),
            failure_policy: FailurePolicy::default(),
            host_key_policy: HostKeyPolicy::default(),
            known_hosts: None,
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    15
}

fn default_reader_grace_ms() -> u64 {
    2000
}

impl RunnerConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub fn reader_grace(&self) -> Duration {
        Duration::from_millis(self.reader_grace_ms)
    }

    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    #[must_use]
    pub fn with_reader_grace(mut self, grace: Duration) -> Self {
        self.reader_grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = timeout.as_secs();
        self
    }
}
