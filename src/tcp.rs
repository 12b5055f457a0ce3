//! The TCP module provides the connection dispatcher of the file server.
//!
//! This module implements a TCP listener that:
//! - Accepts connections from clients
//! - Runs every connection in its own task, so a slow transfer never blocks
//!   other clients
//! - Reads the single command of a connection, rejects malformed ones and
//!   dispatches the rest to their handler
//! - Stops serving once the replica manager reports that no storage is left
//!
//! Failures of one connection (a dropped socket, a timeout, an aborted
//! transfer) only end that connection.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::protocol::codec::{ProtocolError, StatusCode};
use crate::protocol::command::{handle_command, Command};
use crate::protocol::context::Context;
use crate::protocol::wire::MessageStream;
use crate::replica::{ReplicaError, ReplicaManager};

/// TCP connection handler that listens for incoming client connections and
/// serves one command per connection.
pub struct FileServerListener {
    /// TCP Listener for accepting incoming connections
    listener: TcpListener,
    /// Address the listener actually got
    local_addr: SocketAddr,
    /// Both replicas, shared by every connection
    replicas: Arc<ReplicaManager>,
    config: Arc<ServerConfig>,
}

/// Processes an established TCP connection from a client
///
/// This function:
/// - Reads the command message, bounded by the command size limit
/// - Answers `E:404 Invalid command` or `E:406 Invalid path` to commands
///   that cannot be run
/// - Runs the command's handler
/// - Closes the connection
///
/// # Arguments
///
/// * `socket` - The established TCP connection to the client
/// * `context` - Context containing the replicas and the configuration
async fn process_socket(socket: TcpStream, context: Context) -> Result<(), anyhow::Error> {
    let _ = socket.set_nodelay(true);
    let limits = context.config.limits;
    let mut stream = MessageStream::new(socket, limits.command_size, limits.server_message_size)
        .with_timeout(context.config.io_timeout);

    let message = stream.recv().await?;
    stream.set_recv_limit(limits.client_message_size);

    let command = match Command::parse(&message) {
        Ok(command) => command,
        Err(e) => {
            warn!("Rejecting command from {}: {}", context.client_addr, e);
            let (status, text) = match e {
                ProtocolError::InvalidPath(_) => (StatusCode::NotAcceptable, "Invalid path"),
                _ => (StatusCode::NotFound, "Invalid command"),
            };
            stream.send_text(status, text).await?;
            let _ = stream.shutdown().await;
            return Ok(());
        }
    };
    debug!("{} sent {:?}", context.client_addr, command);

    handle_command(&command, &mut stream, &context).await?;
    let _ = stream.shutdown().await;
    Ok(())
}

/// Resolves once the replica manager reports that no replica can serve
async fn storage_lost(mut fatal: watch::Receiver<bool>) {
    loop {
        let lost = *fatal.borrow_and_update();
        if lost || fatal.changed().await.is_err() {
            return;
        }
    }
}

/// Interface for file servers that defines common operations for managing
/// and serving client connections over TCP.
#[async_trait]
pub trait FileServerTcp: Send + Sync {
    /// Returns the actual port number on which the server is listening
    ///
    /// This is especially useful when binding to port 0, which allows the OS
    /// to assign any available port.
    fn get_listen_port(&self) -> u16;

    /// Returns the IP address on which the server is listening
    fn get_listen_ip(&self) -> IpAddr;

    /// Starts the server and processes client connections
    ///
    /// This method:
    /// - Accepts incoming TCP connections
    /// - Creates a new context for each connection
    /// - Spawns an asynchronous task to handle each connection
    ///
    /// Runs until the listener fails or the replica manager reports that no
    /// replica can serve anymore; the latter returns
    /// [`ReplicaError::Unavailable`].
    async fn handle_forever(&self) -> Result<(), anyhow::Error>;
}

impl FileServerListener {
    /// Creates a new listener bound to `config.bind`
    ///
    /// # Arguments
    ///
    /// * `config` - Server configuration, validated here
    /// * `replicas` - The opened replica manager
    ///
    /// # Returns
    ///
    /// The bound listener, or an error if the configuration is invalid or
    /// the address cannot be bound
    pub async fn bind(
        config: ServerConfig,
        replicas: Arc<ReplicaManager>,
    ) -> Result<FileServerListener, anyhow::Error> {
        config.validate()?;
        let listener = TcpListener::bind(&config.bind).await?;
        let local_addr = listener.local_addr()?;
        info!("Listening on {}", local_addr);
        Ok(FileServerListener { listener, local_addr, replicas, config: Arc::new(config) })
    }

    pub fn replicas(&self) -> &Arc<ReplicaManager> {
        &self.replicas
    }

    async fn accept(&self) -> io::Result<()> {
        let (socket, peer) = self.listener.accept().await?;
        let context = Context {
            client_addr: peer.to_string(),
            replicas: self.replicas.clone(),
            config: self.config.clone(),
        };
        info!("Accepting connection from {}", context.client_addr);
        debug!("Accepting socket {:?} {:?}", socket, context);
        tokio::spawn(async move {
            let client_addr = context.client_addr.clone();
            if let Err(e) = process_socket(socket, context).await {
                debug!("Connection from {} closed: {:?}", client_addr, e);
            }
        });
        Ok(())
    }
}

#[async_trait]
impl FileServerTcp for FileServerListener {
    fn get_listen_port(&self) -> u16 {
        self.local_addr.port()
    }

    fn get_listen_ip(&self) -> IpAddr {
        self.local_addr.ip()
    }

    async fn handle_forever(&self) -> Result<(), anyhow::Error> {
        let lost = storage_lost(self.replicas.fatal_signal());
        tokio::pin!(lost);
        loop {
            tokio::select! {
                accepted = self.accept() => accepted?,
                _ = &mut lost => {
                    error!("Storage lost, shutting down");
                    return Err(ReplicaError::Unavailable.into());
                }
            }
        }
    }
}
