#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::task::JoinHandle;
use walkdir::WalkDir;

use fget::client::Client;
use fget::config::{ClientConfig, ServerConfig};
use fget::replica::{ReplicaId, ReplicaManager};
use fget::tcp::{FileServerListener, FileServerTcp};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A server on a loopback port, serving replicas in a temporary directory
pub struct TestServer {
    pub storage: TempDir,
    pub local: TempDir,
    pub addr: String,
    pub replicas: Arc<ReplicaManager>,
    pub task: Option<JoinHandle<Result<(), anyhow::Error>>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(ServerConfig::default()).await
    }

    pub async fn start_with(config: ServerConfig) -> Self {
        let storage = tempfile::tempdir().expect("storage dir");
        let local = tempfile::tempdir().expect("local dir");
        let opened = Arc::new(ReplicaManager::open(storage.path()).await.expect("open replicas"));
        let config = config.with_bind("127.0.0.1:0").with_storage_root(storage.path());
        let listener = FileServerListener::bind(config, opened).await.expect("bind listener");
        let replicas = listener.replicas().clone();
        let addr = format!("127.0.0.1:{}", listener.get_listen_port());
        let task = tokio::spawn(async move { listener.handle_forever().await });
        TestServer { storage, local, addr, replicas, task: Some(task) }
    }

    pub fn client(&self) -> Client {
        self.client_with(ClientConfig::default())
    }

    pub fn client_with(&self, config: ClientConfig) -> Client {
        Client::new(config.with_server(&self.addr))
            .expect("client config")
            .with_local_root(self.local.path())
    }

    pub fn replica_root(&self, id: ReplicaId) -> PathBuf {
        self.storage.path().join(id.dir_name())
    }

    pub fn local_path(&self, name: &str) -> PathBuf {
        self.local.path().join(name)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Deterministic content with zero bytes and protocol codes mixed in
pub fn test_content(len: usize) -> Vec<u8> {
    let mut content: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
    for (offset, marker) in [(3, &b"S:200 "[..]), (40, &b"E:500\0"[..]), (90, &b"C:001 "[..])] {
        if offset + marker.len() <= content.len() {
            content[offset..offset + marker.len()].copy_from_slice(marker);
        }
    }
    content
}

/// Every entry below `root` with the content of regular files, sorted
pub fn snapshot(root: &Path) -> Vec<(PathBuf, Option<Vec<u8>>)> {
    WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .map(|entry| {
            let entry = entry.expect("walk replica");
            let relative = entry.path().strip_prefix(root).expect("relative").to_path_buf();
            let content = if entry.file_type().is_file() {
                Some(std::fs::read(entry.path()).expect("read file"))
            } else {
                None
            };
            (relative, content)
        })
        .collect()
}

/// Asserts both replicas hold exactly the same tree
pub fn assert_converged(server: &TestServer) {
    let first = snapshot(&server.replica_root(ReplicaId::First));
    let second = snapshot(&server.replica_root(ReplicaId::Second));
    assert_eq!(first, second, "replicas diverged");
}
