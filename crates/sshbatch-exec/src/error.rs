//! Error types for sshbatch-exec

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while connecting to or executing on a remote host
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// Server rejected the supplied credential
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Credential could not be loaded (key file, env var, passphrase)
    #[error("credential error: {0}")]
    CredentialError(String),

    /// Server host key did not pass the verification policy
    #[error("host key rejected: {0}")]
    HostKeyRejected(String),

    /// SSH protocol level failure
    #[error("SSH protocol error: {0}")]
    Protocol(String),

    /// Connection attempt exceeded its deadline
    #[error("connection timed out{}", after(.timeout))]
    Timeout {
        /// Deadline that was exceeded, when known
        timeout: Option<Duration>,
    },

    /// Socket level failure (DNS, refused, reset, unreachable)
    #[error("network error: {0}")]
    Network(String),

    /// Session is not open
    #[error("not connected")]
    NotConnected,

    /// Anything else, with diagnostic detail
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

/// Invalid connection parameters
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamsError {
    /// Host is empty
    #[error("host must not be empty")]
    EmptyHost,

    /// User is empty
    #[error("user must not be empty")]
    EmptyUser,

    /// Port is not a number in 1..=65535
    #[error("port must be between 1 and 65535, got {0:?}")]
    InvalidPort(String),
}

/// Failure classes surfaced to the consumer of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Authentication,
    Protocol,
    Timeout,
    Network,
    Unexpected,
}

impl ExecError {
    /// Map the error onto the consumer-facing failure taxonomy
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self {
            ExecError::AuthenticationFailed(_) | ExecError::CredentialError(_) => {
                FailureClass::Authentication
            }
            ExecError::HostKeyRejected(_) | ExecError::Protocol(_) => FailureClass::Protocol,
            ExecError::Timeout { .. } => FailureClass::Timeout,
            ExecError::Network(_) => FailureClass::Network,
            ExecError::NotConnected | ExecError::Unexpected(_) => FailureClass::Unexpected,
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureClass::Authentication => "authentication",
            FailureClass::Protocol => "protocol",
            FailureClass::Timeout => "timeout",
            FailureClass::Network => "network",
            FailureClass::Unexpected => "unexpected",
        };
        f.write_str(name)
    }
}

fn after(timeout: &Option<Duration>) -> String {
    timeout
        .map(|timeout| format!(" after {timeout:?}"))
        .unwrap_or_default()
}

impl From<russh::Error> for ExecError {
    fn from(err: russh::Error) -> Self {
        match err {
            russh::Error::IO(e) => ExecError::from(e),
            russh::Error::ConnectionTimeout => ExecError::Timeout { timeout: None },
            russh::Error::UnknownKey => {
                ExecError::HostKeyRejected("server key is not trusted".to_string())
            }
            other => ExecError::Protocol(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ExecError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => ExecError::Timeout { timeout: None },
            _ => ExecError::Network(err.to_string()),
        }
    }
}
