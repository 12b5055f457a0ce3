//! Chunked transfer of file content.
//!
//! A file can be far larger than one message, so its content travels as a
//! sequence of `S:206` chunks in a strict ping-pong:
//!
//! ```text
//! sender                          receiver
//!   |  <-------- S:100 ----------   |   permission to start
//!   |  --------- S:206 chunk ---->  |
//!   |  <-------- S:100 ----------   |   next, please
//!   |            ...                |
//!   |  --------- S:200 ---------->  |   end of content
//! ```
//!
//! Only one chunk is ever in flight, so neither side can overrun the other's
//! receive limit. Either side may answer `E:500` instead of the expected
//! message to abandon the transfer.
//!
//! The opening exchange differs per command (GET answers `S:200` first and
//! waits for `S:100`; PUT's server answers `S:100` right away), so callers
//! perform it and these functions take over once the sender is allowed to
//! send its first chunk.

use std::fmt;
use std::io;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

use crate::protocol::codec::{Message, StatusCode};
use crate::protocol::wire::MessageStream;

/// The peer stopped cooperating in the middle of a chunked transfer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferAborted {
    /// What the peer sent, or why this side gave up
    pub reason: String,
}

impl TransferAborted {
    pub fn new<S: Into<String>>(reason: S) -> Self {
        Self { reason: reason.into() }
    }
}

impl fmt::Display for TransferAborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transfer aborted: {}", self.reason)
    }
}

impl std::error::Error for TransferAborted {}

/// Destination of received chunks
#[async_trait]
pub trait ChunkSink: Send {
    /// Stores the next chunk. Chunks arrive in order.
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// Called once after the last chunk
    async fn finish(&mut self) -> io::Result<()>;
}

#[async_trait]
impl ChunkSink for tokio::fs::File {
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.write_all(chunk).await
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.flush().await?;
        self.sync_all().await
    }
}

/// Reads until `buf` is full or the source is exhausted
async fn read_chunk<R: AsyncRead + Unpin>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Streams `source` to the peer in chunks of at most `chunk_size` bytes.
///
/// Must be called once the peer has granted permission with `S:100`. Every
/// chunk is followed by a wait for the next `S:100`; any other answer aborts
/// the transfer with [`TransferAborted`]. At the end of the source a terminal
/// `S:200` is sent and nothing further is awaited.
///
/// Returns the number of content bytes sent.
pub async fn send_chunks<S, R>(
    stream: &mut MessageStream<S>,
    source: &mut R,
    chunk_size: usize,
) -> Result<u64, anyhow::Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    if chunk_size == 0 || chunk_size > stream.send_limit() {
        return Err(anyhow!(
            "chunk size {} does not fit the payload limit {}",
            chunk_size,
            stream.send_limit()
        ));
    }

    let mut buf = vec![0_u8; chunk_size];
    let mut sent: u64 = 0;
    let mut chunks: u64 = 0;
    loop {
        let n = match read_chunk(source, &mut buf).await {
            Ok(n) => n,
            Err(e) => {
                warn!("Source read failed after {} bytes: {:?}", sent, e);
                stream.send_text(StatusCode::Aborted, "Could not read file").await?;
                return Err(anyhow!(e).context("reading transfer source"));
            }
        };
        if n == 0 {
            stream.send_text(StatusCode::Ok, "File sent successfully").await?;
            debug!("Sent {} bytes in {} chunks", sent, chunks);
            return Ok(sent);
        }

        stream.send(&Message::new(StatusCode::PartialContent, &buf[..n])).await?;
        sent += n as u64;
        chunks += 1;
        trace!("Chunk {} of {} bytes sent", chunks, n);

        let reply = stream.recv().await?;
        if !reply.is(StatusCode::Continue) {
            warn!("Peer stopped the transfer with {}: {}", reply.code, reply.text());
            return Err(TransferAborted::new(format!("{} {}", reply.code, reply.text())).into());
        }
    }
}

/// Receives chunks from the peer into `sink` until the terminal `S:200`.
///
/// Must be called right after this side has sent the `S:100` that lets the
/// sender start. Each `S:206` chunk is stored and acknowledged with `S:100`.
/// An `E:500` from the sender aborts with [`TransferAborted`]. If the sink
/// fails, `E:500` is sent to stop the sender and the error is returned.
///
/// Returns the number of content bytes received.
pub async fn receive_chunks<S, K>(
    stream: &mut MessageStream<S>,
    sink: &mut K,
) -> Result<u64, anyhow::Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
    K: ChunkSink + ?Sized,
{
    let mut received: u64 = 0;
    loop {
        let message = stream.recv().await?;
        match message.status() {
            Some(StatusCode::PartialContent) => {
                if let Err(e) = sink.write_chunk(&message.payload).await {
                    warn!("Could not store chunk after {} bytes: {:?}", received, e);
                    stream.send_text(StatusCode::Aborted, "Could not write file").await?;
                    return Err(anyhow!(e).context("storing received chunk"));
                }
                received += message.payload.len() as u64;
                trace!("Stored chunk of {} bytes", message.payload.len());
                stream.send_text(StatusCode::Continue, "Success Continue").await?;
            }
            Some(StatusCode::Ok) => {
                if let Err(e) = sink.finish().await {
                    warn!("Could not complete the file after {} bytes: {:?}", received, e);
                    stream.send_text(StatusCode::Aborted, "Could not write file").await?;
                    return Err(anyhow!(e).context("completing received file"));
                }
                debug!("Received {} bytes", received);
                return Ok(received);
            }
            Some(StatusCode::Aborted) => {
                warn!("Sender aborted the transfer: {}", message.text());
                return Err(TransferAborted::new(message.text()).into());
            }
            _ => {
                warn!("Unexpected {} during transfer", message.code);
                stream.send_text(StatusCode::Aborted, "Unexpected message").await?;
                return Err(TransferAborted::new(format!("unexpected {}", message.code)).into());
            }
        }
    }
}
