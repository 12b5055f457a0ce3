//! Implementation of the `PUT` command (`C:003 local [remote]`).
//!
//! `PUT` stores a file sent by the client on every initialized replica.
//! Both replicas are held for the whole upload so that nobody reads a half
//! written file, and every chunk is written to all of them concurrently, in
//! the order it arrived.
//!
//! The exchange is:
//! - server `S:100 Ready to receive`, or `E:404` if a destination cannot be
//!   opened
//! - the chunked transfer from the client, ending with its `S:200`
//! - server `S:200 File received`, or `E:406` if some replica missed content
//!
//! A replica that fails a write is dropped from the upload and the other one
//! carries on. Nothing is rolled back.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use futures::future::join_all;
use smallvec::SmallVec;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, warn};

use super::report_unavailable;
use crate::fs_util;
use crate::protocol::codec::StatusCode;
use crate::protocol::context::Context;
use crate::protocol::transfer::{receive_chunks, ChunkSink};
use crate::protocol::wire::MessageStream;
use crate::replica::ReplicaId;

/// One destination file per replica, written in lockstep
struct MirroredFile {
    files: SmallVec<[(ReplicaId, File); 2]>,
    failed: SmallVec<[ReplicaId; 2]>,
}

impl MirroredFile {
    /// Drops every replica whose operation failed
    fn settle(&mut self, results: Vec<io::Result<()>>) -> io::Result<()> {
        let mut last_error = None;
        let mut index = 0;
        for result in results {
            match result {
                Ok(()) => index += 1,
                Err(e) => {
                    let (id, _) = self.files.remove(index);
                    error!("Write to {} failed, dropping it from the upload: {:?}", id, e);
                    self.failed.push(id);
                    last_error = Some(e);
                }
            }
        }
        match (self.files.is_empty(), last_error) {
            (true, Some(e)) => Err(e),
            (true, None) => Err(io::Error::other("no replica left to write to")),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ChunkSink for MirroredFile {
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        let results = join_all(self.files.iter_mut().map(|(_, file)| file.write_all(chunk))).await;
        self.settle(results)
    }

    async fn finish(&mut self) -> io::Result<()> {
        let results = join_all(self.files.iter_mut().map(|(_, file)| async move {
            file.flush().await?;
            file.sync_all().await
        }))
        .await;
        self.settle(results)
    }
}

/// Empties a regular file. Devices and pipes are written as they are.
async fn truncate(file: &mut File) -> io::Result<()> {
    if file.metadata().await?.is_file() {
        file.set_len(0).await?;
    }
    Ok(())
}

/// Handles the `PUT` command
///
/// # Arguments
///
/// * `remote` - Namespace path the file is stored at
/// * `stream` - The client connection
/// * `context` - Server context containing the replicas
///
/// # Returns
///
/// * `Result<(), anyhow::Error>` - Ok(()) once the final status was sent, an
///   error if the connection failed or the client aborted
pub async fn command_put<S>(
    remote: &str,
    stream: &mut MessageStream<S>,
    context: &Context,
) -> Result<(), anyhow::Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let replicas = match context.replicas.acquire_initialized().await {
        Ok(replicas) => replicas,
        Err(e) => return report_unavailable(stream, e).await,
    };
    debug!("command_put({}) from {} on {} replica(s)", remote, context.client_addr, replicas.len());

    // check every destination before truncating any of them
    for replica in replicas.iter() {
        let path = replica.resolve(remote);
        let parent_ok = match path.parent() {
            Some(parent) => fs_util::is_dir(parent).await,
            None => false,
        };
        if !parent_ok || fs_util::is_dir(&path).await {
            warn!("Cannot store {:?} on {}", path, replica.id());
            stream.send_text(StatusCode::NotFound, "Remote location not found").await?;
            return Ok(());
        }
    }

    // open everything first, truncate only once every open succeeded
    let mut sink = MirroredFile { files: SmallVec::new(), failed: SmallVec::new() };
    let mut created: SmallVec<[PathBuf; 2]> = SmallVec::new();
    for replica in replicas.iter() {
        let path = replica.resolve(remote);
        let existed = fs_util::exists_no_traverse(&path);
        match OpenOptions::new().write(true).create(true).truncate(false).open(&path).await {
            Ok(file) => {
                if !existed {
                    created.push(path);
                }
                sink.files.push((replica.id(), file));
            }
            Err(e) => {
                error!("Cannot open {:?} for writing: {:?}", path, e);
                for path in created {
                    let _ = tokio::fs::remove_file(&path).await;
                }
                stream.send_text(StatusCode::NotFound, "Remote location not found").await?;
                return Ok(());
            }
        }
    }
    for (id, file) in sink.files.iter_mut() {
        if let Err(e) = truncate(file).await {
            error!("Cannot truncate the upload target on {}: {:?}", id, e);
            stream.send_text(StatusCode::NotAcceptable, "Remote file could not be replaced").await?;
            return Ok(());
        }
    }

    stream.send_text(StatusCode::Continue, "Ready to receive").await?;
    let received = receive_chunks(stream, &mut sink).await?;

    if sink.failed.is_empty() {
        debug!("command_put({}) stored {} bytes", remote, received);
        stream.send_text(StatusCode::Ok, "File received").await?;
    } else {
        let failed: Vec<String> = sink.failed.iter().map(ToString::to_string).collect();
        warn!("command_put({}) incomplete on {}", remote, failed.join(", "));
        let text = format!("File not stored on {}", failed.join(", "));
        stream.send_text(StatusCode::NotAcceptable, &text).await?;
    }
    Ok(())
}
