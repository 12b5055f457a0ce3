use std::path::PathBuf;

use fget::client::{Client, Reply};
use fget::config::ClientConfig;

const USAGE: &str = "Usage: fget [OPTIONS] COMMAND ARGS...\n\
                     \n\
                     Commands:\n\
                       GET remote [local]    Download a file\n\
                       INFO remote           Show details of a file or folder\n\
                       PUT local [remote]    Upload a file\n\
                       MD folder             Create a folder\n\
                       RM path               Remove a file or folder\n\
                     \n\
                     Options:\n\
                       --server IP:PORT      Server address (default: 127.0.0.1:2000)\n\
                       --local-root DIR      Directory local paths are relative to (default: .)\n\
                       --chunk-size BYTES    Content bytes per uploaded chunk\n\
                       -h, --help            Show this help and exit";

fn fail(message: &str) -> ! {
    eprintln!("{message}");
    eprintln!("Run with --help for usage.");
    std::process::exit(2);
}

fn print_reply(operation: &str, reply: &Reply) {
    if reply.is_ok() {
        println!("{operation}: {}", reply.message);
    } else {
        println!("{operation} ERROR ({:?}): {}", reply.status, reply.message);
    }
}

/// Main entry point of the command line client
///
/// Runs one command against the server and prints the outcome.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_writer(std::io::stderr)
        .init();

    let mut config = ClientConfig::default();
    let mut local_root = PathBuf::from(".");
    let mut words = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--server" => {
                let Some(server) = args.next() else { fail("--server needs an address") };
                config = config.with_server(server);
            }
            "--local-root" => {
                let Some(root) = args.next() else { fail("--local-root needs a directory") };
                local_root = PathBuf::from(root);
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
            _ if arg.starts_with('-') => fail(&format!("Unknown flag: {arg}")),
            _ => words.push(arg),
        }
    }

    let client = match Client::new(config) {
        Ok(client) => client.with_local_root(local_root),
        Err(e) => fail(&format!("Invalid configuration: {e}")),
    };

    let words: Vec<&str> = words.iter().map(String::as_str).collect();
    let result = match words.as_slice() {
        ["GET", remote] => client.get(remote, remote).await,
        ["GET", remote, local] => client.get(remote, local).await,
        ["INFO", remote] => client.info(remote).await,
        ["PUT", local] => client.put(local, local).await,
        ["PUT", local, remote] => client.put(local, remote).await,
        ["MD", folder] => client.make_dir(folder).await,
        ["RM", path] => client.remove(path).await,
        [] => fail("No command given"),
        [command, ..] => fail(&format!("Incorrect command provided: {command}")),
    };

    match result {
        Ok(reply) => {
            print_reply(words[0], &reply);
            if !reply.is_ok() {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("{} failed: {e:#}", words[0]);
            std::process::exit(1);
        }
    }
}
