//! Implementation of the `GET` command (`C:001 remote [local]`).
//!
//! `GET` streams one regular file to the client. It needs a single replica:
//! whichever is free first serves the read, so two downloads can run at the
//! same time when both replicas are healthy.
//!
//! The exchange is:
//! - server `S:200 File found`, or `E:404` / `E:406`
//! - client `S:100`, granting permission to send
//! - the chunked transfer, ending with `S:200`
//!
//! The second argument names the client's local file and is ignored here.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use super::{io_status, report_unavailable};
use crate::protocol::codec::StatusCode;
use crate::protocol::context::Context;
use crate::protocol::transfer::{send_chunks, TransferAborted};
use crate::protocol::wire::MessageStream;

/// Handles the `GET` command
///
/// # Arguments
///
/// * `remote` - Namespace path of the file to send
/// * `stream` - The client connection
/// * `context` - Server context containing the replicas
///
/// # Returns
///
/// * `Result<(), anyhow::Error>` - Ok(()) on success or a status response,
///   an error if the connection or the transfer failed
pub async fn command_get<S>(
    remote: &str,
    stream: &mut MessageStream<S>,
    context: &Context,
) -> Result<(), anyhow::Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let replica = match context.replicas.acquire_any().await {
        Ok(replica) => replica,
        Err(e) => return report_unavailable(stream, e).await,
    };
    let path = replica.resolve(remote);
    debug!("command_get({}) from {} on {}", remote, context.client_addr, replica.id());

    let mut file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            warn!("Cannot open {:?}: {:?}", path, e);
            let status = io_status(&e);
            let text = match status {
                StatusCode::NotFound => "File not found",
                _ => "File cannot be read",
            };
            stream.send_text(status, text).await?;
            return Ok(());
        }
    };
    match file.metadata().await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => {
            stream.send_text(StatusCode::NotAcceptable, "Not a regular file").await?;
            return Ok(());
        }
        Err(e) => {
            warn!("Cannot stat {:?}: {:?}", path, e);
            stream.send_text(io_status(&e), "File cannot be read").await?;
            return Ok(());
        }
    }

    stream.send_text(StatusCode::Ok, "File found").await?;
    let go = stream.recv().await?;
    if !go.is(StatusCode::Continue) {
        warn!("Client declined the download with {}", go.code);
        return Err(TransferAborted::new(format!("{} {}", go.code, go.text())).into());
    }

    let sent = send_chunks(stream, &mut file, context.config.chunk_size).await?;
    debug!("command_get({}) sent {} bytes", remote, sent);
    Ok(())
}
