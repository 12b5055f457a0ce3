//! Implementation of the `INFO` command (`C:002 remote`).
//!
//! Describes one namespace entry from a single replica. The entry itself is
//! inspected, symlinks are not followed.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use super::{io_status, report_unavailable};
use crate::fs_util;
use crate::protocol::codec::StatusCode;
use crate::protocol::context::Context;
use crate::protocol::wire::MessageStream;

/// Handles the `INFO` command
///
/// Answers `S:200` with the block rendered by [`fs_util::format_info`], or
/// `E:404` if the entry does not exist.
pub async fn command_info<S>(
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
    debug!("command_info({}) from {} on {}", remote, context.client_addr, replica.id());

    match tokio::fs::symlink_metadata(&path).await {
        Ok(meta) => {
            let block = fs_util::format_info(remote, &meta);
            stream.send_text(StatusCode::Ok, &block).await?;
        }
        Err(e) => {
            warn!("Cannot stat {:?}: {:?}", path, e);
            let text = match io_status(&e) {
                StatusCode::NotFound => "File not found",
                _ => "File cannot be inspected",
            };
            stream.send_text(io_status(&e), text).await?;
        }
    }
    Ok(())
}
