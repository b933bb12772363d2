//! Credential handling and SSH key resolution

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use russh::keys::ssh_key::PrivateKey;
use russh::keys::{decode_secret_key, load_secret_key};
use tracing::debug;
use zeroize::Zeroizing;

/// Secret used to authenticate a run
///
/// Never serialized. Secret material is zeroed when the value is dropped.
#[derive(Clone)]
pub enum Credential {
    /// Password authentication
    Password(Zeroizing<String>),
    /// OpenSSH private key file
    KeyFile {
        path: PathBuf,
        passphrase: Option<Zeroizing<String>>,
    },
    /// Base64-encoded private key read from an environment variable
    EnvKey {
        var: String,
        passphrase: Option<Zeroizing<String>>,
    },
}

impl Credential {
    /// Password credential
    pub fn password(secret: impl Into<String>) -> Self {
        Credential::Password(Zeroizing::new(secret.into()))
    }

    /// Key file credential without passphrase
    pub fn key_file(path: impl Into<PathBuf>) -> Self {
        Credential::KeyFile {
            path: path.into(),
            passphrase: None,
        }
    }

    /// Key credential taken from an environment variable
    pub fn env_key(var: impl Into<String>) -> Self {
        Credential::EnvKey {
            var: var.into(),
            passphrase: None,
        }
    }

    /// Attach a passphrase to a key credential; ignored for passwords
    #[must_use]
    pub fn with_passphrase(self, secret: impl Into<String>) -> Self {
        let secret = Some(Zeroizing::new(secret.into()));
        match self {
            Credential::KeyFile { path, .. } => Credential::KeyFile {
                path,
                passphrase: secret,
            },
            Credential::EnvKey { var, .. } => Credential::EnvKey {
                var,
                passphrase: secret,
            },
            password @ Credential::Password(_) => password,
        }
    }

    /// Resolve the credential into something the SSH client can use
    ///
    /// # Errors
    /// Returns `KeyError` if the key cannot be read, decoded or has loose permissions
    pub fn resolve(&self) -> Result<ResolvedCredential, KeyError> {
        match self {
            Credential::Password(secret) => Ok(ResolvedCredential::Password(secret.clone())),
            Credential::KeyFile { path, passphrase } => {
                if !path.exists() {
                    return Err(KeyError::NotFound(path.display().to_string()));
                }
                validate_key_permissions(path)?;
                let key = load_secret_key(path, passphrase.as_ref().map(|p| p.as_str()))
                    .map_err(|e| KeyError::Invalid(e.to_string()))?;
                debug!(path = %path.display(), "loaded private key");
                Ok(ResolvedCredential::Key(key))
            }
            Credential::EnvKey { var, passphrase } => {
                let encoded = env::var(var).map_err(|_| KeyError::EnvNotSet(var.clone()))?;
                let decoded = Zeroizing::new(
                    base64_decode(&encoded).map_err(|_| KeyError::InvalidBase64)?,
                );
                let text =
                    std::str::from_utf8(&decoded).map_err(|_| KeyError::InvalidBase64)?;
                let key = decode_secret_key(text, passphrase.as_ref().map(|p| p.as_str()))
                    .map_err(|e| KeyError::Invalid(e.to_string()))?;
                debug!(var = %var, "decoded private key from environment");
                Ok(ResolvedCredential::Key(key))
            }
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(<redacted>)"),
            Credential::KeyFile { path, passphrase } => f
                .debug_struct("KeyFile")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
            Credential::EnvKey { var, passphrase } => f
                .debug_struct("EnvKey")
                .field("var", var)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

/// Credential ready for authentication
pub enum ResolvedCredential {
    /// Password to send to the server
    Password(Zeroizing<String>),
    /// Decoded private key
    Key(PrivateKey),
}

impl fmt::Debug for ResolvedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedCredential::Password(_) => f.write_str("Password(<redacted>)"),
            ResolvedCredential::Key(key) => write!(f, "Key({})", key.algorithm()),
        }
    }
}

/// Key resolution errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("environment variable {0} not set")]
    EnvNotSet(String),

    #[error("invalid base64 encoding")]
    InvalidBase64,

    #[error("key file permissions too open: {0} (should be 600)")]
    BadPermissions(String),

    #[error("key file not found: {0}")]
    NotFound(String),

    #[error("invalid private key: {0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn base64_decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(input.trim())
}

#[cfg(unix)]
fn validate_key_permissions(path: &Path) -> Result<(), KeyError> {
    use std::os::unix::fs::PermissionsExt;

    let mode = std::fs::metadata(path)?.permissions().mode();

    // group and other bits must be clear
    if mode & 0o77 != 0 {
        return Err(KeyError::BadPermissions(path.display().to_string()));
    }

    Ok(())
}

#[cfg(not(unix))]
fn validate_key_permissions(_path: &Path) -> Result<(), KeyError> {
    Ok(())
}
