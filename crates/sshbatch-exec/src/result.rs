//! Connection parameters and command outcome types

use std::fmt;

use crate::error::ParamsError;
use crate::keys::Credential;

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// Everything needed to open one session
///
/// Built per run. Only `host`, `port` and `user` are durable; the credential
/// is dropped together with the parameters when the run ends.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    /// Host address
    pub host: String,
    /// Port (default 22)
    pub port: u16,
    /// Username
    pub user: String,
    /// Secret used to authenticate
    pub credential: Credential,
}

impl ConnectionParams {
    /// Create new connection parameters on the default port
    pub fn new(host: impl Into<String>, user: impl Into<String>, credential: Credential) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            user: user.into(),
            credential,
        }
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Check host, user and port
    ///
    /// # Errors
    /// Returns `ParamsError` naming the first invalid field
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.host.trim().is_empty() {
            return Err(ParamsError::EmptyHost);
        }
        if self.user.trim().is_empty() {
            return Err(ParamsError::EmptyUser);
        }
        if self.port == 0 {
            return Err(ParamsError::InvalidPort(self.port.to_string()));
        }
        Ok(())
    }

    /// `user@host:port`, for log lines
    #[must_use]
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Parse a port given as text
///
/// # Errors
/// Returns `ParamsError::InvalidPort` unless the text is an integer in 1..=65535
pub fn parse_port(text: &str) -> Result<u16, ParamsError> {
    match text.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ParamsError::InvalidPort(text.to_string())),
    }
}

/// How a remote command ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandExit {
    /// Exit status reported by the server
    Code(u32),
    /// Terminated by a signal
    Signal(String),
    /// Channel closed without an exit status
    Unknown,
}

impl CommandExit {
    /// Check if command succeeded (exit code 0)
    #[must_use]
    pub fn success(&self) -> bool {
        matches!(self, CommandExit::Code(0))
    }

    /// Numeric code for display; `-1` when there is none
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            CommandExit::Code(code) => i64::from(*code),
            CommandExit::Signal(_) | CommandExit::Unknown => -1,
        }
    }
}

impl fmt::Display for CommandExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandExit::Code(code) => write!(f, "exit code: {code}"),
            CommandExit::Signal(signal) => write!(f, "exit code: -1, signal {signal}"),
            CommandExit::Unknown => f.write_str("exit code: -1"),
        }
    }
}
