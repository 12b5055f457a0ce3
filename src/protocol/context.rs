//! Per-connection execution context.
//!
//! Every accepted connection gets its own [`Context`], which hands the
//! command handlers everything they need: who is talking to us, the shared
//! replica manager and the server configuration. The replica manager is the
//! only state shared between connections.

use std::fmt;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::replica::ReplicaManager;

/// Represents the execution context for one client connection
#[derive(Clone)]
pub struct Context {
    /// Client's network address (IP:port) used for logging
    pub client_addr: String,

    /// The two replicas of the namespace, shared by every connection
    pub replicas: Arc<ReplicaManager>,

    /// Server configuration (limits, chunk size, timeouts)
    pub config: Arc<ServerConfig>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("protocol::Context")
            .field("client_addr", &self.client_addr)
            .field("storage_root", &self.replicas.storage_root())
            .finish()
    }
}
