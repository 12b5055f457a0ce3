//! Replica Manager: two on-disk copies of the namespace.
//!
//! The served namespace lives twice, in `root_1` and `root_2` under the
//! storage root. Reads are served from whichever replica is free; writes go
//! to every replica that currently exists. The manager owns, per replica:
//!
//! - `initialized`: the root directory exists on disk (re-checked lazily on
//!   every access, since an operator may rename or delete it at any time)
//! - `available`: initialized and not held by any command
//! - an exclusivity lock, held for the whole duration of a command
//!
//! When a replica that was gone reappears, it is rebuilt by mirroring the
//! other replica onto it before anyone may use it. Locks are always taken
//! in the order `root_1`, `root_2`, so commands needing both never deadlock.
//!
//! Holding a replica is represented by a [`ReplicaGuard`]; dropping the
//! guard releases the replica on every exit path.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use smallvec::SmallVec;
use tokio::sync::{watch, Notify, OwnedMutexGuard};
use tracing::{debug, error, info, warn};
use tracing_attributes::instrument;

use crate::fs_util::{self, MirrorStats};

/// Identifies one of the two replicas
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReplicaId {
    First,
    Second,
}

impl ReplicaId {
    /// Both replicas, in lock order
    pub const ALL: [ReplicaId; 2] = [ReplicaId::First, ReplicaId::Second];

    fn index(self) -> usize {
        match self {
            ReplicaId::First => 0,
            ReplicaId::Second => 1,
        }
    }

    /// Name of the replica's root directory under the storage root
    pub fn dir_name(self) -> &'static str {
        match self {
            ReplicaId::First => "root_1",
            ReplicaId::Second => "root_2",
        }
    }

    /// The other replica
    pub fn peer(self) -> ReplicaId {
        match self {
            ReplicaId::First => ReplicaId::Second,
            ReplicaId::Second => ReplicaId::First,
        }
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// No replica is left to serve storage operations
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplicaError {
    /// Both replicas are gone, or one came back with no peer to rebuild it from
    Unavailable,
}

impl fmt::Display for ReplicaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaError::Unavailable => write!(f, "no replica can serve storage operations"),
        }
    }
}

impl std::error::Error for ReplicaError {}

#[derive(Debug)]
struct ReplicaState {
    initialized: bool,
    available: bool,
}

#[derive(Debug)]
struct Replica {
    id: ReplicaId,
    root: PathBuf,
    /// Guarded separately from `lock` so the flags can be read while a
    /// command holds the replica
    state: Mutex<ReplicaState>,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Replica {
    fn new(id: ReplicaId, root: PathBuf) -> Self {
        Self {
            id,
            root,
            state: Mutex::new(ReplicaState { initialized: true, available: true }),
            lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn state(&self) -> MutexGuard<'_, ReplicaState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive hold on one replica, released on drop
pub struct ReplicaGuard {
    replica: Arc<Replica>,
    released: Arc<Notify>,
    lock: Option<OwnedMutexGuard<()>>,
}

impl ReplicaGuard {
    pub fn id(&self) -> ReplicaId {
        self.replica.id
    }

    /// Root directory of the held replica
    pub fn root(&self) -> &Path {
        &self.replica.root
    }

    /// Path of a namespace entry inside the held replica
    pub fn resolve(&self, relative: &str) -> PathBuf {
        fs_util::resolve(&self.replica.root, relative)
    }
}

impl fmt::Debug for ReplicaGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicaGuard").field("id", &self.replica.id).finish()
    }
}

impl Drop for ReplicaGuard {
    fn drop(&mut self) {
        {
            let mut state = self.replica.state();
            state.available = state.initialized;
        }
        // unlock before waking waiters, or they could miss the release
        drop(self.lock.take());
        debug!("Released {}", self.replica.id);
        self.released.notify_waiters();
    }
}

/// Every replica that was initialized when a command started, held in lock
/// order
#[derive(Debug)]
pub struct ReplicaSet {
    guards: SmallVec<[ReplicaGuard; 2]>,
}

impl ReplicaSet {
    pub fn guards(&self) -> &[ReplicaGuard] {
        &self.guards
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReplicaGuard> {
        self.guards.iter()
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// True when one of the replicas is missing and the command runs on the
    /// other alone
    pub fn is_degraded(&self) -> bool {
        self.guards.len() < ReplicaId::ALL.len()
    }
}

/// Owns both replicas and serializes access to them
#[derive(Debug)]
pub struct ReplicaManager {
    storage_root: PathBuf,
    replicas: [Arc<Replica>; 2],
    /// Signalled by every release
    released: Arc<Notify>,
    /// Serializes the rebuild of reappearing replicas
    restore_lock: tokio::sync::Mutex<()>,
    /// Set once no replica can serve anymore
    fatal: watch::Sender<bool>,
}

impl ReplicaManager {
    /// Opens (creating where needed) `root_1` and `root_2` under
    /// `storage_root`.
    ///
    /// If exactly one of them already exists, the freshly created one is
    /// filled by mirroring the existing one.
    pub async fn open<P: Into<PathBuf>>(storage_root: P) -> Result<Self, anyhow::Error> {
        let storage_root = storage_root.into();
        tokio::fs::create_dir_all(&storage_root).await?;

        let mut existed = [false; 2];
        for id in ReplicaId::ALL {
            let root = storage_root.join(id.dir_name());
            existed[id.index()] = fs_util::is_dir(&root).await;
            if !existed[id.index()] {
                info!("Creating replica {:?}", root);
                tokio::fs::create_dir_all(&root).await?;
            }
        }

        let (fatal, _) = watch::channel(false);
        let manager = Self {
            replicas: ReplicaId::ALL
                .map(|id| Arc::new(Replica::new(id, storage_root.join(id.dir_name())))),
            storage_root,
            released: Arc::new(Notify::new()),
            restore_lock: tokio::sync::Mutex::new(()),
            fatal,
        };

        match existed {
            [true, false] => {
                manager.resync(ReplicaId::First, ReplicaId::Second).await?;
            }
            [false, true] => {
                manager.resync(ReplicaId::Second, ReplicaId::First).await?;
            }
            _ => {}
        }
        Ok(manager)
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Root directory of a replica
    pub fn root(&self, id: ReplicaId) -> &Path {
        &self.replica(id).root
    }

    fn replica(&self, id: ReplicaId) -> &Arc<Replica> {
        &self.replicas[id.index()]
    }

    /// Receiver that turns `true` once no replica can serve anymore
    pub fn fatal_signal(&self) -> watch::Receiver<bool> {
        self.fatal.subscribe()
    }

    fn raise_fatal(&self) -> ReplicaError {
        error!("No replica left to serve storage operations");
        self.fatal.send_replace(true);
        ReplicaError::Unavailable
    }

    /// Re-checks whether the replica exists on disk.
    ///
    /// A replica that vanished is marked uninitialized. A replica that was
    /// uninitialized and exists again is rebuilt from its peer first; if the
    /// peer cannot serve as the source, the service has lost its storage and
    /// [`ReplicaError::Unavailable`] is returned.
    ///
    /// Must not be called while holding any replica.
    pub async fn is_initialized(&self, id: ReplicaId) -> Result<bool, ReplicaError> {
        let replica = self.replica(id);
        let on_disk = fs_util::is_dir(&replica.root).await;
        let was_initialized = replica.state().initialized;
        match (was_initialized, on_disk) {
            (true, true) => Ok(true),
            (false, false) => Ok(false),
            (true, false) => {
                warn!("Replica {} vanished from {:?}", id, replica.root);
                let mut state = replica.state();
                state.initialized = false;
                state.available = false;
                Ok(false)
            }
            (false, true) => self.restore(id).await,
        }
    }

    /// True if the replica is initialized and nobody holds it
    pub async fn is_available(&self, id: ReplicaId) -> Result<bool, ReplicaError> {
        Ok(self.is_initialized(id).await? && self.replica(id).state().available)
    }

    async fn restore(&self, id: ReplicaId) -> Result<bool, ReplicaError> {
        let _restoring = self.restore_lock.lock().await;
        let replica = self.replica(id);
        if replica.state().initialized {
            // someone else rebuilt it while we waited
            return Ok(true);
        }

        let peer = self.replica(id.peer());
        let peer_on_disk = fs_util::is_dir(&peer.root).await;
        if !peer_on_disk {
            let mut state = peer.state();
            state.initialized = false;
            state.available = false;
        }
        if !peer_on_disk || !peer.state().initialized {
            warn!("Replica {} reappeared but {} cannot be cloned from", id, peer.id);
            return Err(self.raise_fatal());
        }

        info!("Replica {} is back, cloning from {}", id, peer.id);
        let guards = self.acquire_ordered(&ReplicaId::ALL).await;
        let (source, destination) = match id {
            ReplicaId::First => (&guards[1], &guards[0]),
            ReplicaId::Second => (&guards[0], &guards[1]),
        };
        match self.resync_held(source, destination).await {
            Ok(_) => {
                replica.state().initialized = true;
                Ok(true)
            }
            Err(e) => {
                error!("Clone into {} failed, keeping it offline: {:?}", id, e);
                Ok(false)
            }
        }
    }

    /// Waits for exclusive access to a replica
    pub async fn acquire(&self, id: ReplicaId) -> ReplicaGuard {
        let replica = self.replica(id).clone();
        let lock = replica.lock.clone().lock_owned().await;
        replica.state().available = false;
        debug!("Acquired {}", id);
        ReplicaGuard { replica, released: self.released.clone(), lock: Some(lock) }
    }

    /// Takes the replica if nobody holds it right now
    pub fn try_acquire(&self, id: ReplicaId) -> Option<ReplicaGuard> {
        let replica = self.replica(id).clone();
        let lock = replica.lock.clone().try_lock_owned().ok()?;
        replica.state().available = false;
        debug!("Acquired {}", id);
        Some(ReplicaGuard { replica, released: self.released.clone(), lock: Some(lock) })
    }

    async fn acquire_ordered(&self, ids: &[ReplicaId]) -> SmallVec<[ReplicaGuard; 2]> {
        let mut ids: SmallVec<[ReplicaId; 2]> = ids.iter().copied().collect();
        ids.sort();
        let mut guards = SmallVec::new();
        for id in ids {
            guards.push(self.acquire(id).await);
        }
        guards
    }

    /// Holds any one initialized replica, `root_1` first.
    ///
    /// When every initialized replica is held, waits for the next release
    /// instead of polling.
    pub async fn acquire_any(&self) -> Result<ReplicaGuard, ReplicaError> {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            // check both, so a returning replica gets rebuilt even when the
            // other one could serve
            let mut initialized: SmallVec<[ReplicaId; 2]> = SmallVec::new();
            for id in ReplicaId::ALL {
                if self.is_initialized(id).await? {
                    initialized.push(id);
                }
            }
            if initialized.is_empty() {
                return Err(self.raise_fatal());
            }
            for id in initialized {
                if let Some(guard) = self.try_acquire(id) {
                    return Ok(guard);
                }
            }
            debug!("All replicas busy, waiting for a release");
            released.await;
        }
    }

    /// Holds every currently initialized replica, in lock order.
    ///
    /// With one replica missing the command runs degraded on the other.
    pub async fn acquire_initialized(&self) -> Result<ReplicaSet, ReplicaError> {
        let mut ids: SmallVec<[ReplicaId; 2]> = SmallVec::new();
        for id in ReplicaId::ALL {
            if self.is_initialized(id).await? {
                ids.push(id);
            }
        }
        if ids.is_empty() {
            return Err(self.raise_fatal());
        }
        if ids.len() < ReplicaId::ALL.len() {
            warn!("Running degraded on {} only", ids[0]);
        }
        Ok(ReplicaSet { guards: self.acquire_ordered(&ids).await })
    }

    /// Mirrors the whole `source` replica onto `destination`, holding both
    /// exclusively for the duration
    pub async fn resync(
        &self,
        source: ReplicaId,
        destination: ReplicaId,
    ) -> Result<MirrorStats, anyhow::Error> {
        if source == destination {
            return Err(anyhow::anyhow!("cannot resync {} onto itself", source));
        }
        let guards = self.acquire_ordered(&[source, destination]).await;
        let (src, dst) = if source < destination {
            (&guards[0], &guards[1])
        } else {
            (&guards[1], &guards[0])
        };
        self.resync_held(src, dst).await
    }

    #[instrument(skip_all, fields(source = %source.id(), destination = %destination.id()))]
    async fn resync_held(
        &self,
        source: &ReplicaGuard,
        destination: &ReplicaGuard,
    ) -> Result<MirrorStats, anyhow::Error> {
        let stats = fs_util::mirror_tree(source.root(), destination.root()).await?;
        info!(
            "CLONE SUCCESSFUL: {} files, {} directories, {} bytes, {} stale entries removed",
            stats.files, stats.directories, stats.bytes, stats.removed
        );
        Ok(stats)
    }
}
