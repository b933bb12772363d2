//! Transport traits

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ExecError;
use crate::process::RemoteProcess;
use crate::result::ConnectionParams;

/// Opens sessions to a host
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and authenticate, giving up after `timeout`
    async fn connect(
        &self,
        params: &ConnectionParams,
        timeout: Duration,
    ) -> Result<Box<dyn RemoteSession>, ExecError>;

    fn connector_type(&self) -> &'static str;
}

/// One open connection, owned by a single run
#[async_trait]
pub trait RemoteSession: Send {
    /// Start `command` without a pseudo-terminal
    async fn exec(&mut self, command: &str) -> Result<RemoteProcess, ExecError>;

    /// Tear the connection down
    async fn close(&mut self) -> Result<(), ExecError>;
}
