//! fget - A replicated remote file storage server in Rust
//!
//! This library serves a namespace of files and directories to remote
//! clients over TCP. The namespace is stored twice on the server's disk, in
//! two replica directories (`root_1` and `root_2`), and every change is
//! applied to both. A replica that disappears is rebuilt from the other one
//! as soon as it shows up again.
//!
//! ## Supported Operations
//!
//! - `GET`: download a file in chunks
//! - `INFO`: owner, permissions, size and timestamps of an entry
//! - `PUT`: upload a file in chunks, written to both replicas
//! - `MD`: create a directory
//! - `RM`: remove a file or a directory tree
//!
//! ## Main Components
//!
//! - `tcp`: the connection dispatcher; accepts connections and runs one
//!   command per connection in its own task.
//!
//! - `protocol`: the message codec, the chunked transfer handshake and the
//!   command handlers.
//!
//! - `replica`: the replica manager, which serializes access to the two
//!   replicas and keeps them in sync.
//!
//! - `client`: the client side of every operation.
//!
//! - `config`: payload limits, chunk size and timeouts of both sides.
//!
//! - `fs_util`: path checks, INFO formatting and whole-tree mirroring.
//!
//! ## Usage
//!
//! Open a [`replica::ReplicaManager`] on a storage directory, bind a
//! [`tcp::FileServerListener`] and call
//! [`handle_forever`](tcp::FileServerTcp::handle_forever). Use
//! [`client::Client`] to talk to it.

pub mod client;
pub mod config;
pub mod fs_util;
pub mod protocol;
pub mod replica;
pub mod tcp;

pub use client::{Client, Reply};
pub use config::{ClientConfig, ProtocolLimits, ServerConfig};
pub use replica::ReplicaManager;
