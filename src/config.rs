//! Configuration for the file server and its clients.
//!
//! Every size on the wire is bounded: a command line, a client message and
//! a server message each have their own payload maximum. The defaults match
//! the values both sides were historically compiled with, so a default
//! client always talks to a default server.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::anyhow;

/// Length of every message code (`C:001`, `S:200`, ...)
pub const CODE_SIZE: usize = 5;
/// Separator byte between the code and the payload
pub const CODE_PADDING: usize = 1;

/// Default address the server binds to and the client connects to
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:2000";
/// Default maximum payload of a command line
pub const DEFAULT_COMMAND_SIZE: usize = 1000;
/// Default maximum payload of a message sent by the client
pub const DEFAULT_CLIENT_MESSAGE_SIZE: usize = 2000;
/// Default maximum payload of a message sent by the server
pub const DEFAULT_SERVER_MESSAGE_SIZE: usize = 2000;
/// Default bound on a single send or receive
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(60);

/// Payload limits shared by both ends of a connection
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProtocolLimits {
    /// Maximum payload of the command message that opens a connection
    pub command_size: usize,
    /// Maximum payload of any other message sent by the client
    pub client_message_size: usize,
    /// Maximum payload of any message sent by the server
    pub server_message_size: usize,
}

impl Default for ProtocolLimits {
    fn default() -> Self {
        Self {
            command_size: DEFAULT_COMMAND_SIZE,
            client_message_size: DEFAULT_CLIENT_MESSAGE_SIZE,
            server_message_size: DEFAULT_SERVER_MESSAGE_SIZE,
        }
    }
}

fn check_chunk_size(chunk_size: usize, message_size: usize) -> Result<(), anyhow::Error> {
    if chunk_size == 0 {
        return Err(anyhow!("chunk size must be at least one byte"));
    }
    if chunk_size > message_size {
        return Err(anyhow!(
            "chunk size {} exceeds the message payload limit {}",
            chunk_size,
            message_size
        ));
    }
    Ok(())
}

/// Server side configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address in the form "IP:PORT"
    pub bind: String,
    /// Directory holding the `root_1` and `root_2` replicas
    pub storage_root: PathBuf,
    /// Payload limits
    pub limits: ProtocolLimits,
    /// Bytes of file content carried by each `S:206` message the server sends
    pub chunk_size: usize,
    /// Upper bound on any single send or receive, `None` waits forever
    pub io_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let limits = ProtocolLimits::default();
        Self {
            bind: DEFAULT_ADDRESS.to_string(),
            storage_root: PathBuf::from("."),
            chunk_size: limits.server_message_size - 1,
            limits,
            io_timeout: Some(DEFAULT_IO_TIMEOUT),
        }
    }
}

impl ServerConfig {
    pub fn with_bind<S: AsRef<str>>(mut self, bind: S) -> Self {
        self.bind = bind.as_ref().to_string();
        self
    }

    pub fn with_storage_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.storage_root = root.into();
        self
    }

    /// Replaces the limits. The chunk size follows the new server message
    /// size; call [`ServerConfig::with_chunk_size`] afterwards to override it.
    pub fn with_limits(mut self, limits: ProtocolLimits) -> Self {
        self.limits = limits;
        self.chunk_size = limits.server_message_size.saturating_sub(1).max(1);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Checks that the chunk size fits into a server message
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        check_chunk_size(self.chunk_size, self.limits.server_message_size)
    }
}

/// Client side configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Server address in the form "IP:PORT"
    pub server: String,
    /// Payload limits, must agree with the server's
    pub limits: ProtocolLimits,
    /// Bytes of file content carried by each `S:206` message the client sends
    pub chunk_size: usize,
    /// Upper bound on any single send or receive, `None` waits forever
    pub io_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let limits = ProtocolLimits::default();
        Self {
            server: DEFAULT_ADDRESS.to_string(),
            chunk_size: limits.client_message_size - 1,
            limits,
            io_timeout: Some(DEFAULT_IO_TIMEOUT),
        }
    }
}

impl ClientConfig {
    pub fn with_server<S: AsRef<str>>(mut self, server: S) -> Self {
        self.server = server.as_ref().to_string();
        self
    }

    /// Replaces the limits. The chunk size follows the new client message
    /// size; call [`ClientConfig::with_chunk_size`] afterwards to override it.
    pub fn with_limits(mut self, limits: ProtocolLimits) -> Self {
        self.limits = limits;
        self.chunk_size = limits.client_message_size.saturating_sub(1).max(1);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Checks that the chunk size fits into a client message
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        check_chunk_size(self.chunk_size, self.limits.client_message_size)
    }
}
