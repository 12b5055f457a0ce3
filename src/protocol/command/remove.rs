//! Implementation of the `RM` command (`C:005 path`).
//!
//! Removes a file, or a directory with everything below it, from every
//! initialized replica. The entry must exist with the same type on all of
//! them; otherwise nothing is touched.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, warn};

use super::report_unavailable;
use crate::protocol::codec::StatusCode;
use crate::protocol::context::Context;
use crate::protocol::wire::MessageStream;

/// Handles the `RM` command
///
/// Answers `E:404` if the entry is missing on any replica, `E:406` on a type
/// mismatch between replicas or a failed removal, `S:200` otherwise.
pub async fn command_remove<S>(
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
    debug!("command_remove({}) from {}", remote, context.client_addr);

    let mut is_dir = None;
    for replica in replicas.iter() {
        let path = replica.resolve(remote);
        let meta = match tokio::fs::symlink_metadata(&path).await {
            Ok(meta) => meta,
            Err(e) => {
                debug!("{:?} not removable on {}: {:?}", path, replica.id(), e);
                stream.send_text(StatusCode::NotFound, "File not found").await?;
                return Ok(());
            }
        };
        match is_dir {
            None => is_dir = Some(meta.is_dir()),
            Some(expected) if expected != meta.is_dir() => {
                warn!("{} has a different type on {}", remote, replica.id());
                stream.send_text(StatusCode::NotAcceptable, "Replicas disagree on type").await?;
                return Ok(());
            }
            Some(_) => {}
        }
    }

    let is_dir = is_dir.unwrap_or(false);
    let mut failed = false;
    for replica in replicas.iter() {
        let path = replica.resolve(remote);
        let result = if is_dir {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        if let Err(e) = result {
            error!("Cannot remove {:?}: {:?}", path, e);
            failed = true;
        }
    }

    if failed {
        stream.send_text(StatusCode::NotAcceptable, "Could not remove").await?;
    } else {
        stream.send_text(StatusCode::Ok, "Removed").await?;
    }
    Ok(())
}
