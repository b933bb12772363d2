//! SSH transport using russh crate

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::keys::PrivateKeyWithHashAlg;
use russh::keys::ssh_key;
use russh::{Channel, ChannelMsg, Disconnect, client};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::error::ExecError;
use crate::host_key::{HostKeyPolicy, HostKeyVerifier};
use crate::keys::ResolvedCredential;
use crate::process::{ProcessFeed, RemoteProcess, StreamKind};
use crate::result::{CommandExit, ConnectionParams};
use crate::traits::{Connector, RemoteSession};

/// SSH extended data type code for stderr
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// SSH client handler for russh
#[derive(Debug)]
struct SshClientHandler {
    host: String,
    port: u16,
    verifier: HostKeyVerifier,
}

impl client::Handler for SshClientHandler {
    type Error = ExecError;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        self.verifier
            .verify(&self.host, self.port, server_public_key)
            .map(|()| true)
    }
}

/// Opens russh sessions
#[derive(Debug, Clone)]
pub struct SshConnector {
    verifier: HostKeyVerifier,
}

impl SshConnector {
    /// Connector checking keys against `~/.ssh/known_hosts`
    #[must_use]
    pub fn new(policy: HostKeyPolicy) -> Self {
        Self {
            verifier: HostKeyVerifier::with_default_file(policy),
        }
    }

    /// Use a custom `known_hosts` file
    #[must_use]
    pub fn with_known_hosts(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.verifier = HostKeyVerifier::new(self.verifier.policy(), path);
        self
    }

    async fn connect_inner(
        &self,
        params: &ConnectionParams,
    ) -> Result<client::Handle<SshClientHandler>, ExecError> {
        let credential = params
            .credential
            .resolve()
            .map_err(|e| ExecError::CredentialError(e.to_string()))?;

        let config = Arc::new(client::Config::default());
        let handler = SshClientHandler {
            host: params.host.clone(),
            port: params.port,
            verifier: self.verifier.clone(),
        };

        let mut session = client::connect(config, (&params.host[..], params.port), handler).await?;

        let auth_res = match credential {
            ResolvedCredential::Password(password) => {
                session
                    .authenticate_password(&params.user, password.as_str())
                    .await?
            }
            ResolvedCredential::Key(key_pair) => {
                let hash_alg = session
                    .best_supported_rsa_hash()
                    .await
                    .ok()
                    .flatten()
                    .flatten();
                session
                    .authenticate_publickey(
                        &params.user,
                        PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg),
                    )
                    .await?
            }
        };

        if !auth_res.success() {
            return Err(ExecError::AuthenticationFailed(format!(
                "server rejected credentials for user {}",
                params.user
            )));
        }

        Ok(session)
    }
}

#[async_trait]
impl Connector for SshConnector {
    #[instrument(skip(self, params), fields(host = %params.host, port = params.port))]
    async fn connect(
        &self,
        params: &ConnectionParams,
        timeout_duration: Duration,
    ) -> Result<Box<dyn RemoteSession>, ExecError> {
        info!(
            host = %params.host,
            port = params.port,
            user = %params.user,
            policy = ?self.verifier.policy(),
            "connecting to SSH"
        );

        let handle = match timeout(timeout_duration, self.connect_inner(params)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(host = %params.host, timeout = ?timeout_duration, "SSH connect timed out");
                return Err(ExecError::Timeout {
                    timeout: Some(timeout_duration),
                });
            }
        };

        info!(host = %params.host, "SSH connected and authenticated");

        Ok(Box::new(SshSession {
            host: params.host.clone(),
            handle: Some(handle),
        }))
    }

    fn connector_type(&self) -> &'static str {
        "ssh"
    }
}

/// Authenticated russh session
struct SshSession {
    host: String,
    handle: Option<client::Handle<SshClientHandler>>,
}

#[async_trait]
impl RemoteSession for SshSession {
    #[instrument(skip(self, command), fields(host = %self.host))]
    async fn exec(&mut self, command: &str) -> Result<RemoteProcess, ExecError> {
        let handle = self.handle.as_mut().ok_or(ExecError::NotConnected)?;

        debug!(command = %command, "executing remote command");

        let channel = handle.channel_open_session().await?;
        // no request_pty: batch commands run without a terminal
        channel.exec(true, command).await?;

        let (feed, process) = RemoteProcess::channel();
        tokio::spawn(pump_channel(channel, feed));
        Ok(process)
    }

    async fn close(&mut self) -> Result<(), ExecError> {
        if let Some(handle) = self.handle.take() {
            handle
                .disconnect(Disconnect::ByApplication, "", "English")
                .await?;
            info!(host = %self.host, "SSH disconnected");
        }
        Ok(())
    }
}

/// Forward channel messages into the process feed until the channel closes
async fn pump_channel(mut channel: Channel<client::Msg>, mut feed: ProcessFeed) {
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => feed.push(StreamKind::Stdout, &data),
            ChannelMsg::ExtendedData { data, ext } if ext == SSH_EXTENDED_DATA_STDERR => {
                feed.push(StreamKind::Stderr, &data);
            }
            ChannelMsg::ExitStatus { exit_status } => feed.exit(CommandExit::Code(exit_status)),
            ChannelMsg::ExitSignal { signal_name, .. } => {
                feed.exit(CommandExit::Signal(format!("{signal_name:?}")));
            }
            // exit status may still follow EOF
            ChannelMsg::Eof => feed.close_output(),
            ChannelMsg::Close => break,
            _ => {}
        }
    }

    if !feed.has_exited() {
        debug!("channel closed without exit status");
    }
    feed.close_output();
}
