//! Protocol module implements the fget file transfer protocol.
//!
//! This module contains the following components:
//!
//! - `codec`: the five byte message codes and the framing of one message
//!   (`<code> <payload>`).
//!
//! - `wire`: [`MessageStream`], which carries codec messages over a byte
//!   stream in length prefixed records and bounds every send and receive.
//!
//! - `transfer`: the chunked transfer handshake used by `GET` and `PUT` to
//!   move file content larger than one message.
//!
//! - `command`: parsing of the command that opens a connection and one
//!   handler per command.
//!
//! - `context`: the per-connection state handed to every handler.
//!
//! A connection carries a single command. The client sends it, both sides
//! exchange whatever messages the command needs, and the connection is
//! closed.

pub mod codec;
pub mod command;
pub mod context;
pub mod transfer;
pub mod wire;

pub use codec::{Code, CommandCode, Message, ProtocolError, StatusCode};
pub use command::{handle_command, Command};
pub use context::Context;
pub use transfer::{receive_chunks, send_chunks, ChunkSink, TransferAborted};
pub use wire::MessageStream;
