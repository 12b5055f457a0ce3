//! Implementation of the `MD` command (`C:004 folder`).
//!
//! Creates a directory on every initialized replica. The parent must
//! already exist. If the entry exists on any replica nothing is created
//! anywhere, so `MD` on an existing folder always answers `E:406` and
//! leaves the folder alone.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error};

use super::report_unavailable;
use crate::fs_util;
use crate::protocol::codec::StatusCode;
use crate::protocol::context::Context;
use crate::protocol::wire::MessageStream;

/// Handles the `MD` command
///
/// # Arguments
///
/// * `folder` - Namespace path of the directory to create
/// * `stream` - The client connection
/// * `context` - Server context containing the replicas
///
/// # Returns
///
/// * `Result<(), anyhow::Error>` - Ok(()) once a status was sent
pub async fn command_mkdir<S>(
    folder: &str,
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
    debug!("command_mkdir({}) from {}", folder, context.client_addr);

    if replicas.iter().any(|r| fs_util::exists_no_traverse(&r.resolve(folder))) {
        stream.send_text(StatusCode::NotAcceptable, "Folder already exists").await?;
        return Ok(());
    }

    let mut failed = false;
    for replica in replicas.iter() {
        let path = replica.resolve(folder);
        if let Err(e) = tokio::fs::create_dir(&path).await {
            error!("Cannot create {:?}: {:?}", path, e);
            failed = true;
        }
    }

    if failed {
        stream.send_text(StatusCode::NotAcceptable, "Folder could not be created").await?;
    } else {
        stream.send_text(StatusCode::Ok, "Folder created").await?;
    }
    Ok(())
}
