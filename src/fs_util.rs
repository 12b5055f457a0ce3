//! File System Utilities module provides helper functions for working with the
//! replica directories.
//!
//! This module contains functions for:
//! - Validating and resolving namespace-relative paths
//! - Checking entry existence without traversing symlinks
//! - Rendering file metadata for the INFO command
//! - Mirroring one replica tree onto another

use std::fs::Metadata;
use std::io;
#[cfg(unix)]
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use chrono::{Local, TimeZone};
use filetime::FileTime;
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::protocol::codec::ProtocolError;

/// Layout used by C `ctime()`, e.g. `Thu Oct 16 09:03:27 2026`
const CTIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Rejects remote paths that could leave the namespace in the obvious ways:
/// empty paths, paths starting with `.` or `/`, and `..` components (`a/..`
/// would name the replica root itself).
///
/// This is not a sandbox. Symlinks inside a replica are followed.
pub fn validate_remote_path(path: &str) -> Result<(), ProtocolError> {
    if path.is_empty()
        || path.starts_with('.')
        || path.starts_with('/')
        || path.split('/').any(|component| component == "..")
    {
        return Err(ProtocolError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Joins a namespace-relative path onto a replica root
pub fn resolve(root: &Path, relative: &str) -> PathBuf {
    root.join(relative)
}

/// Checks if a path exists without traversing symlinks
///
/// # Arguments
///
/// * `path` - The path to check
///
/// # Returns
///
/// `true` if the path exists (as a file, directory, or symlink), `false` otherwise
pub fn exists_no_traverse(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

/// Returns `true` if `path` currently is a directory
pub async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

/// Human readable kind of a file system entry
pub fn entry_kind(meta: &Metadata) -> &'static str {
    let ftype = meta.file_type();
    if ftype.is_file() {
        "file"
    } else if ftype.is_dir() {
        "directory"
    } else if ftype.is_symlink() {
        "symlink"
    } else {
        "other"
    }
}

/// Formats a Unix timestamp the way C `ctime()` does, in local time
pub fn ctime_string(seconds: i64) -> String {
    match Local.timestamp_opt(seconds, 0).single() {
        Some(time) => time.format(CTIME_FORMAT).to_string(),
        None => format!("{seconds} seconds since epoch"),
    }
}

#[cfg(unix)]
fn ownership(meta: &Metadata) -> (String, String, String) {
    (meta.uid().to_string(), meta.gid().to_string(), format!("{:o}", meta.mode() & 0o7777))
}

#[cfg(not(unix))]
fn ownership(meta: &Metadata) -> (String, String, String) {
    let mode = if meta.permissions().readonly() { "readonly" } else { "writable" };
    ("n/a".to_string(), "n/a".to_string(), mode.to_string())
}

#[cfg(unix)]
fn timestamps(meta: &Metadata) -> (i64, i64) {
    (meta.atime(), meta.mtime())
}

#[cfg(not(unix))]
fn timestamps(meta: &Metadata) -> (i64, i64) {
    let secs = |t: io::Result<std::time::SystemTime>| {
        t.ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    };
    (secs(meta.accessed()), secs(meta.modified()))
}

/// Renders the block returned by INFO for the entry at `path`
pub fn format_info(path: &str, meta: &Metadata) -> String {
    let (uid, gid, mode) = ownership(meta);
    let (atime, mtime) = timestamps(meta);
    format!(
        "Path: {}\nType: {}\nOwner ID: {}\nGroup ID: {}\nPermissions: {}\nFile size: {} bytes\nLast accessed: {}\nLast modified: {}\n",
        path,
        entry_kind(meta),
        uid,
        gid,
        mode,
        meta.len(),
        ctime_string(atime),
        ctime_string(mtime)
    )
}

/// What a mirror pass changed in the destination
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MirrorStats {
    pub directories: u64,
    pub files: u64,
    pub bytes: u64,
    pub removed: u64,
}

/// Makes `destination` an exact copy of `source`.
///
/// Entries of `destination` that are missing from `source`, or that have a
/// different type there, are removed. Directories are created, regular
/// files copied over with their modification time, symlinks recreated.
/// Runs on the blocking pool.
pub async fn mirror_tree(source: &Path, destination: &Path) -> io::Result<MirrorStats> {
    let source = source.to_path_buf();
    let destination = destination.to_path_buf();
    tokio::task::spawn_blocking(move || mirror_tree_blocking(&source, &destination))
        .await
        .map_err(io::Error::other)?
}

fn same_kind(a: &std::fs::FileType, b: &std::fs::FileType) -> bool {
    a.is_dir() == b.is_dir() && a.is_file() == b.is_file() && a.is_symlink() == b.is_symlink()
}

fn mirror_tree_blocking(source: &Path, destination: &Path) -> io::Result<MirrorStats> {
    let mut stats = MirrorStats::default();
    std::fs::create_dir_all(destination)?;

    // prune what the source does not have
    let mut stale = Vec::new();
    let mut walker = WalkDir::new(destination).min_depth(1).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry.path().strip_prefix(destination).map_err(io::Error::other)?;
        let keep = match source.join(relative).symlink_metadata() {
            Ok(meta) => same_kind(&meta.file_type(), &entry.file_type()),
            Err(_) => false,
        };
        if !keep {
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            stale.push((entry.path().to_path_buf(), entry.file_type().is_dir()));
        }
    }
    for (path, is_dir) in stale {
        trace!("mirror: removing {:?}", path);
        if is_dir {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
        stats.removed += 1;
    }

    // copy everything over, parents before children
    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry.path().strip_prefix(source).map_err(io::Error::other)?;
        let target = destination.join(relative);
        let ftype = entry.file_type();
        if ftype.is_dir() {
            std::fs::create_dir_all(&target)?;
            stats.directories += 1;
        } else if ftype.is_file() {
            stats.bytes += std::fs::copy(entry.path(), &target)?;
            let meta = entry.metadata().map_err(io::Error::from)?;
            filetime::set_file_mtime(&target, FileTime::from_last_modification_time(&meta))?;
            stats.files += 1;
        } else if ftype.is_symlink() {
            copy_symlink(entry.path(), &target)?;
            stats.files += 1;
        }
    }

    debug!("mirror {:?} -> {:?}: {:?}", source, destination, stats);
    Ok(stats)
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    let points_to = std::fs::read_link(link)?;
    if exists_no_traverse(target) {
        std::fs::remove_file(target)?;
    }
    std::os::unix::fs::symlink(points_to, target)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, _target: &Path) -> io::Result<()> {
    debug!("mirror: skipping symlink {:?}", link);
    Ok(())
}
