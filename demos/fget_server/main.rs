use std::path::PathBuf;
use std::sync::Arc;

use fget::config::ServerConfig;
use fget::replica::ReplicaManager;
use fget::tcp::{FileServerListener, FileServerTcp};

const USAGE: &str = "Usage: fget_server [--bind IP:PORT] [--root DIRECTORY] [--chunk-size BYTES]\n\
                     \n\
                     Options:\n\
                       --bind IP:PORT        Address to listen on (default: 127.0.0.1:2000)\n\
                       --root DIRECTORY      Directory holding root_1 and root_2 (default: .)\n\
                       --chunk-size BYTES    Content bytes per chunk sent to clients\n\
                       -h, --help            Show this help and exit";

fn fail(message: &str) -> ! {
    eprintln!("{message}");
    eprintln!("Run with --help for usage.");
    std::process::exit(2);
}

/// Main entry point of the file server
///
/// Initializes the tracing subscriber, reads the options, opens (and if
/// needed rebuilds) the replicas, then serves clients until the storage is
/// lost.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(std::io::stderr)
        .init();

    let mut config = ServerConfig::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--bind" => {
                let Some(bind) = args.next() else { fail("--bind needs an address") };
                config = config.with_bind(bind);
            }
            "--root" => {
                let Some(root) = args.next() else { fail("--root needs a directory") };
                config = config.with_storage_root(PathBuf::from(root));
            }
            "--chunk-size" => {
                let Some(size) = args.next().and_then(|s| s.parse::<usize>().ok()) else {
                    fail("--chunk-size needs a number of bytes")
                };
                config = config.with_chunk_size(size);
            }
            "--help" | "-h" => {
                eprintln!("{USAGE}");
                return;
            }
            _ => fail(&format!("Unexpected argument: {arg}")),
        }
    }

    let replicas = match ReplicaManager::open(config.storage_root.clone()).await {
        Ok(replicas) => Arc::new(replicas),
        Err(e) => {
            eprintln!("Cannot open the replicas: {e:?}");
            std::process::exit(1);
        }
    };
    let listener = match FileServerListener::bind(config, replicas).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Cannot start the server: {e:?}");
            std::process::exit(1);
        }
    };
    if let Err(e) = listener.handle_forever().await {
        eprintln!("Server stopped: {e}");
        std::process::exit(1);
    }
}
