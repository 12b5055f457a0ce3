//! The five storage commands and their dispatcher.
//!
//! A connection carries exactly one command:
//!
//! 1. GET (`C:001 remote [local]`) - Stream a file to the client
//! 2. INFO (`C:002 remote`) - Describe an entry
//! 3. PUT (`C:003 local [remote]`) - Store a file sent by the client
//! 4. MD (`C:004 folder`) - Create a directory
//! 5. RM (`C:005 path`) - Remove a file or a directory tree
//!
//! plus QUIT (`C:999`), which just ends the connection. Arguments are
//! separated by spaces, so paths cannot contain spaces.
//!
//! Each handler lives in its own module. Handlers acquire replicas through
//! the [`ReplicaManager`](crate::replica::ReplicaManager) and turn every file
//! system failure into a status code on the spot; only transport failures and
//! aborted transfers are returned as errors.

use std::io;

use smallvec::SmallVec;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error};

use crate::fs_util;
use crate::protocol::codec::{Code, CommandCode, Message, ProtocolError, StatusCode};
use crate::protocol::context::Context;
use crate::protocol::wire::MessageStream;
use crate::replica::ReplicaError;

mod get;
mod info;
mod mkdir;
mod put;
mod remove;

use get::command_get;
use info::command_info;
use mkdir::command_mkdir;
use put::command_put;
use remove::command_remove;

/// A parsed client request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Get { remote: String, local: Option<String> },
    Info { path: String },
    Put { local: String, remote: Option<String> },
    MakeDir { path: String },
    Remove { path: String },
    Quit,
}

impl Command {
    pub fn code(&self) -> CommandCode {
        match self {
            Command::Get { .. } => CommandCode::Get,
            Command::Info { .. } => CommandCode::Info,
            Command::Put { .. } => CommandCode::Put,
            Command::MakeDir { .. } => CommandCode::MakeDir,
            Command::Remove { .. } => CommandCode::Remove,
            Command::Quit => CommandCode::Quit,
        }
    }

    /// The namespace path the command operates on
    pub fn remote_path(&self) -> Option<&str> {
        match self {
            Command::Get { remote, .. } => Some(remote.as_str()),
            Command::Put { local, remote } => Some(remote.as_deref().unwrap_or(local)),
            Command::Info { path } | Command::MakeDir { path } | Command::Remove { path } => {
                Some(path.as_str())
            }
            Command::Quit => None,
        }
    }

    /// Arguments in wire order
    pub fn arguments(&self) -> SmallVec<[&str; 2]> {
        let mut args = SmallVec::new();
        match self {
            Command::Get { remote, local } => {
                args.push(remote.as_str());
                args.extend(local.as_deref());
            }
            Command::Put { local, remote } => {
                args.push(local.as_str());
                args.extend(remote.as_deref());
            }
            Command::Info { path } | Command::MakeDir { path } | Command::Remove { path } => {
                args.push(path.as_str())
            }
            Command::Quit => {}
        }
        args
    }

    /// Builds a command from its code and arguments, checking the argument
    /// count and the remote path
    pub fn from_arguments<I>(code: CommandCode, args: I) -> Result<Self, ProtocolError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args: SmallVec<[String; 2]> = args.into_iter().collect();
        let got = args.len();
        let (min, max) = match code {
            CommandCode::Get | CommandCode::Put => (1, 2),
            CommandCode::Info | CommandCode::MakeDir | CommandCode::Remove => (1, 1),
            CommandCode::Quit => (0, 0),
        };
        if got < min || got > max {
            return Err(ProtocolError::WrongArgumentCount { command: code, got });
        }

        let second = if got == 2 { args.pop() } else { None };
        let first = args.pop().unwrap_or_default();
        let command = match code {
            CommandCode::Get => Command::Get { remote: first, local: second },
            CommandCode::Put => Command::Put { local: first, remote: second },
            CommandCode::Info => Command::Info { path: first },
            CommandCode::MakeDir => Command::MakeDir { path: first },
            CommandCode::Remove => Command::Remove { path: first },
            CommandCode::Quit => Command::Quit,
        };
        if let Some(path) = command.remote_path() {
            fs_util::validate_remote_path(path)?;
        }
        Ok(command)
    }

    /// Parses the command message that opens a connection
    pub fn parse(message: &Message) -> Result<Self, ProtocolError> {
        let code = match message.code {
            Code::Command(code) => code,
            other => return Err(ProtocolError::NotACommand(other)),
        };
        let text = message.text();
        Command::from_arguments(code, text.split_ascii_whitespace().map(str::to_string))
    }

    /// Encodes the command for sending
    pub fn to_message(&self) -> Message {
        Message::new(self.code(), self.arguments().join(" "))
    }
}

/// Maps a failed file system call to the status reported to the client
pub(crate) fn io_status(e: &io::Error) -> StatusCode {
    match e.kind() {
        io::ErrorKind::NotFound => StatusCode::NotFound,
        _ => StatusCode::NotAcceptable,
    }
}

/// Tells the client that storage is gone and hands the error back to the
/// dispatcher
pub(crate) async fn report_unavailable<S>(
    stream: &mut MessageStream<S>,
    e: ReplicaError,
) -> Result<(), anyhow::Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    error!("Storage unavailable: {}", e);
    stream.send_text(StatusCode::Aborted, "Storage unavailable").await?;
    Err(e.into())
}

/// Runs one parsed command to completion
///
/// # Arguments
///
/// * `command` - The request read from the connection
/// * `stream` - The connection, for responses and chunk exchange
/// * `context` - Server context containing the replicas
///
/// # Returns
///
/// * `Result<(), anyhow::Error>` - Ok(()) once a response was sent, or a
///   transport error / aborted transfer
pub async fn handle_command<S>(
    command: &Command,
    stream: &mut MessageStream<S>,
    context: &Context,
) -> Result<(), anyhow::Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    match command {
        Command::Get { remote, .. } => command_get(remote, stream, context).await?,
        Command::Info { path } => command_info(path, stream, context).await?,
        Command::Put { .. } => {
            let remote = command.remote_path().unwrap_or_default();
            command_put(remote, stream, context).await?
        }
        Command::MakeDir { path } => command_mkdir(path, stream, context).await?,
        Command::Remove { path } => command_remove(path, stream, context).await?,
        Command::Quit => debug!("{} quit", context.client_addr),
    }
    Ok(())
}
