//! sshbatch-exec: Remote execution transport
//!
//! Provides the connector/session traits a run is driven through, an SSH
//! implementation on top of russh and a local `sh -c` implementation

pub mod error;
pub mod host_key;
pub mod keys;
pub mod local;
pub mod process;
pub mod result;
pub mod ssh;
pub mod traits;

pub use error::{ExecError, FailureClass, ParamsError};
pub use host_key::{HostKeyPolicy, HostKeyVerifier};
pub use keys::{Credential, KeyError};
pub use local::LocalConnector;
pub use process::{OutputStream, ProcessFeed, RemoteProcess, StreamKind};
pub use result::{CommandExit, ConnectionParams, parse_port};
pub use ssh::SshConnector;
pub use traits::{Connector, RemoteSession};
