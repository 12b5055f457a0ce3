//! Message transmission over a byte stream.
//!
//! A byte stream has no message boundaries, so every codec message is
//! carried in a record: a 4-byte big-endian header holding the body length,
//! followed by the body itself. The receiver learns the exact length up
//! front, which keeps payloads binary safe (zero bytes and code-like
//! substrings inside a chunk are never mistaken for a boundary) and lets an
//! oversized record be refused before a single body byte is buffered.
//!
//! Every send and receive may be bounded by a timeout. A timed out or failed
//! operation is a transport failure: the caller drops the connection.

use std::future::Future;
use std::time::Duration;

use anyhow::anyhow;
use byteorder::{BigEndian, WriteBytesExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::config::{CODE_PADDING, CODE_SIZE};
use crate::protocol::codec::{self, Message};

/// Size of the record header
pub const RECORD_HEADER_SIZE: usize = 4;

/// Sends and receives framed messages over one connection
#[derive(Debug)]
pub struct MessageStream<S> {
    stream: S,
    /// Largest payload accepted from the peer
    recv_limit: usize,
    /// Largest payload this side may send
    send_limit: usize,
    timeout: Option<Duration>,
    /// Reused for every outgoing record
    out: Vec<u8>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> MessageStream<S> {
    /// Wraps `stream`, accepting payloads up to `recv_limit` bytes and
    /// sending payloads up to `send_limit` bytes
    pub fn new(stream: S, recv_limit: usize, send_limit: usize) -> Self {
        Self { stream, recv_limit, send_limit, timeout: None, out: Vec::new() }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Changes the largest payload accepted from the peer
    pub fn set_recv_limit(&mut self, recv_limit: usize) {
        self.recv_limit = recv_limit;
    }

    /// Changes the largest payload this side may send
    pub fn set_send_limit(&mut self, send_limit: usize) {
        self.send_limit = send_limit;
    }

    pub fn send_limit(&self) -> usize {
        self.send_limit
    }

    async fn bounded<T, F>(timeout: Option<Duration>, what: &str, fut: F) -> anyhow::Result<T>
    where
        F: Future<Output = std::io::Result<T>>,
    {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(res) => Ok(res?),
                Err(_) => Err(anyhow!("{} timed out after {:?}", what, limit)),
            },
            None => Ok(fut.await?),
        }
    }

    /// Sends one message
    pub async fn send(&mut self, message: &Message) -> Result<(), anyhow::Error> {
        self.out.clear();
        self.out.extend_from_slice(&[0; RECORD_HEADER_SIZE]);
        codec::encode_into(message, self.send_limit, &mut self.out)?;
        let body_len = self.out.len() - RECORD_HEADER_SIZE;
        (&mut self.out[..RECORD_HEADER_SIZE]).write_u32::<BigEndian>(body_len as u32)?;
        trace!("Sending {} with {} payload bytes", message.code, message.payload.len());

        let Self { stream, out, timeout, .. } = self;
        Self::bounded(*timeout, "send", async {
            stream.write_all(&out[..]).await?;
            stream.flush().await
        })
        .await
    }

    /// Sends a status or command with a text payload
    pub async fn send_text<C: Into<codec::Code>>(
        &mut self,
        code: C,
        text: &str,
    ) -> Result<(), anyhow::Error> {
        self.send(&Message::new(code, text.as_bytes())).await
    }

    /// Receives one message.
    ///
    /// Fails if the peer closed the connection, the record announces a body
    /// longer than the receive limit allows, or the body is not a valid
    /// message.
    pub async fn recv(&mut self) -> Result<Message, anyhow::Error> {
        let max_body = CODE_SIZE + CODE_PADDING + self.recv_limit;
        let Self { stream, timeout, .. } = self;

        let mut header = [0_u8; RECORD_HEADER_SIZE];
        Self::bounded(*timeout, "receive", stream.read_exact(&mut header)).await?;
        let length = u32::from_be_bytes(header) as usize;
        if length > max_body {
            return Err(anyhow!("record length {} exceeds max {}", length, max_body));
        }

        let mut body = vec![0_u8; length];
        Self::bounded(*timeout, "receive", stream.read_exact(&mut body)).await?;
        let message = codec::decode(&body)?;
        trace!("Received {} with {} payload bytes", message.code, message.payload.len());
        Ok(message)
    }

    /// Flushes and shuts down the write half
    pub async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        let Self { stream, timeout, .. } = self;
        Self::bounded(*timeout, "shutdown", stream.shutdown()).await
    }
}

