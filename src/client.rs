//! Client side of every operation.
//!
//! Like the server, the client uses one connection per command: it
//! connects, sends the command, plays its part of the exchange and hangs
//! up. Local paths are resolved under the client's local root, remote paths
//! are sent as given.
//!
//! Commands are checked before connecting; a command the server would
//! reject with `E:404 Invalid command` or `E:406 Invalid path` never leaves
//! the client.

use std::path::PathBuf;

use anyhow::{anyhow, Context as _};
use tokio::fs::{File, OpenOptions};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::protocol::codec::{Message, StatusCode};
use crate::protocol::command::Command;
use crate::protocol::transfer::{receive_chunks, send_chunks, TransferAborted};
use crate::protocol::wire::MessageStream;

/// Outcome of one command as reported by the server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    /// Final status of the command
    pub status: StatusCode,
    /// Text of the server's answer, the INFO block for `INFO`
    pub message: String,
    /// Content bytes moved by `GET` and `PUT`
    pub bytes: u64,
}

impl Reply {
    fn from_message(message: &Message) -> Result<Self, anyhow::Error> {
        let status = message
            .status()
            .ok_or_else(|| anyhow!("server answered with command {}", message.code))?;
        Ok(Reply { status, message: message.text(), bytes: 0 })
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::Ok
    }
}

/// Talks to one file server
#[derive(Clone, Debug)]
pub struct Client {
    config: ClientConfig,
    local_root: PathBuf,
}

impl Client {
    /// Creates a client. Local paths resolve against the working directory
    /// until [`Client::with_local_root`] says otherwise.
    pub fn new(config: ClientConfig) -> Result<Self, anyhow::Error> {
        config.validate()?;
        Ok(Client { config, local_root: PathBuf::from(".") })
    }

    pub fn with_local_root<P: Into<PathBuf>>(mut self, local_root: P) -> Self {
        self.local_root = local_root.into();
        self
    }

    fn local_path(&self, local: &str) -> PathBuf {
        self.local_root.join(local)
    }

    /// Checks the command like the server would, then connects and sends it
    async fn start(&self, command: &Command) -> Result<MessageStream<TcpStream>, anyhow::Error> {
        let args = command.arguments();
        if args.iter().any(|arg| arg.chars().any(char::is_whitespace)) {
            return Err(anyhow!("paths must not contain whitespace"));
        }
        Command::from_arguments(command.code(), args.iter().map(|a| a.to_string()))?;

        let socket = TcpStream::connect(&self.config.server)
            .await
            .with_context(|| format!("connecting to {}", self.config.server))?;
        let _ = socket.set_nodelay(true);
        let limits = self.config.limits;
        let mut stream = MessageStream::new(socket, limits.server_message_size, limits.command_size)
            .with_timeout(self.config.io_timeout);
        debug!("Sending {:?}", command);
        stream.send(&command.to_message()).await?;
        stream.set_send_limit(limits.client_message_size);
        Ok(stream)
    }

    /// Single round trip commands
    async fn simple(&self, command: Command) -> Result<Reply, anyhow::Error> {
        let mut stream = self.start(&command).await?;
        let reply = Reply::from_message(&stream.recv().await?)?;
        let _ = stream.shutdown().await;
        Ok(reply)
    }

    /// Downloads `remote` into `local` under the local root.
    ///
    /// The local file is only created once the server found the remote one.
    pub async fn get(&self, remote: &str, local: &str) -> Result<Reply, anyhow::Error> {
        let command = Command::Get { remote: remote.to_string(), local: Some(local.to_string()) };
        let mut stream = self.start(&command).await?;

        let found = stream.recv().await?;
        let mut reply = Reply::from_message(&found)?;
        if !reply.is_ok() {
            debug!("GET {} refused: {} {}", remote, found.code, reply.message);
            return Ok(reply);
        }

        let path = self.local_path(local);
        let mut file =
            match OpenOptions::new().write(true).create(true).truncate(true).open(&path).await {
                Ok(file) => file,
                Err(e) => {
                    warn!("Cannot open local file {:?}: {:?}", path, e);
                    stream.send_text(StatusCode::Aborted, "Could not open local file").await?;
                    return Err(anyhow!(e).context(format!("opening {}", path.display())));
                }
            };
        stream.send_text(StatusCode::Continue, "Success Continue").await?;
        reply.bytes = receive_chunks(&mut stream, &mut file).await?;
        reply.message = "File received".to_string();
        info!("GET {} -> {:?}: {} bytes", remote, path, reply.bytes);
        Ok(reply)
    }

    /// Shows what the server knows about `remote`
    pub async fn info(&self, remote: &str) -> Result<Reply, anyhow::Error> {
        self.simple(Command::Info { path: remote.to_string() }).await
    }

    /// Uploads `local` from under the local root to `remote`.
    ///
    /// A missing local file fails before anything is sent.
    pub async fn put(&self, local: &str, remote: &str) -> Result<Reply, anyhow::Error> {
        let path = self.local_path(local);
        let mut file = File::open(&path)
            .await
            .with_context(|| format!("opening local file {}", path.display()))?;
        let command = Command::Put { local: local.to_string(), remote: Some(remote.to_string()) };
        let mut stream = self.start(&command).await?;

        let ready = stream.recv().await?;
        if !ready.is(StatusCode::Continue) {
            debug!("PUT {} refused: {} {}", remote, ready.code, ready.text());
            return Reply::from_message(&ready);
        }

        let sent = send_chunks(&mut stream, &mut file, self.config.chunk_size).await?;
        let done = stream.recv().await?;
        if done.is(StatusCode::Aborted) {
            return Err(TransferAborted::new(done.text()).into());
        }
        let mut reply = Reply::from_message(&done)?;
        reply.bytes = sent;
        info!("PUT {:?} -> {}: {} bytes, {}", path, remote, sent, done.code);
        let _ = stream.shutdown().await;
        Ok(reply)
    }

    /// Creates the directory `remote`
    pub async fn make_dir(&self, remote: &str) -> Result<Reply, anyhow::Error> {
        self.simple(Command::MakeDir { path: remote.to_string() }).await
    }

    /// Removes the file or directory tree `remote`
    pub async fn remove(&self, remote: &str) -> Result<Reply, anyhow::Error> {
        self.simple(Command::Remove { path: remote.to_string() }).await
    }

    /// Says goodbye. The server does not answer.
    pub async fn quit(&self) -> Result<(), anyhow::Error> {
        let mut stream = self.start(&Command::Quit).await?;
        stream.shutdown().await
    }
}
