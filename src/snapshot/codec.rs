//! # Snapshot and blob codec.
//!
//! Serialization is self-describing JSON with the version string as the
//! leading field. Writes are atomic: the bytes land in a sibling `.tmp`
//! file (owner read/write only) which is then renamed over the target, so
//! a crash mid-write never replaces an intact snapshot with a partial one.
//!
//! Blob files carry each subsystem's opaque state next to the primary
//! snapshot. The engine never parses blob contents; subsystems read and
//! delete their own files during restore. An unreadable or malformed blob
//! is skipped with a warning, never aborting recovery.

use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{SnapshotError, SubsystemError};
use crate::snapshot::types::Snapshot;

/// Serializes a snapshot to its on-disk representation.
pub fn encode(snapshot: &Snapshot) -> Result<Vec<u8>, SnapshotError> {
    serde_json::to_vec_pretty(snapshot).map_err(SnapshotError::Encode)
}

/// Reconstructs a snapshot from on-disk bytes.
///
/// Fields unknown to this build are discarded with a warning; missing
/// fields fall to typed defaults.
pub fn decode(bytes: &[u8]) -> Result<Snapshot, SnapshotError> {
    let mut snapshot: Snapshot =
        serde_json::from_slice(bytes).map_err(SnapshotError::Malformed)?;
    if !snapshot.unknown.is_empty() {
        let fields: Vec<&str> = snapshot.unknown.keys().map(String::as_str).collect();
        tracing::warn!(
            version = %snapshot.version,
            ?fields,
            "snapshot carries unknown fields; discarding"
        );
        snapshot.unknown.clear();
    }
    Ok(snapshot)
}

fn write_file_0600(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Atomically writes the snapshot to `path`.
///
/// The bytes go to `path.tmp` first; the rename replaces the target in one
/// step. A failure at any point leaves any previous intact file in place.
pub fn write_atomic(path: &Path, snapshot: &Snapshot) -> Result<(), SnapshotError> {
    let bytes = encode(snapshot)?;
    let tmp = tmp_path(path);
    write_file_0600(&tmp, &bytes)?;
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(SnapshotError::Io(err));
    }
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

/// Reads and decodes the snapshot at `path`.
pub fn read_snapshot(path: &Path) -> Result<Snapshot, SnapshotError> {
    let bytes = fs::read(path)?;
    decode(&bytes)
}

/// Removes a stale snapshot left behind by a previous run.
///
/// Called at startup when the snapshot file exists but the inheritance
/// environment marker is absent. Returns whether a file was removed.
pub fn clean_stale(cfg: &Config) -> bool {
    let path = cfg.snapshot_path();
    if !path.exists() {
        return false;
    }
    match fs::remove_file(&path) {
        Ok(()) => {
            tracing::warn!(path = %path.display(), "removed stale copyover snapshot");
            true
        }
        Err(err) => {
            tracing::error!(path = %path.display(), error = %err, "failed to remove stale snapshot");
            false
        }
    }
}

/// Writes a subsystem's blob (owner read/write only).
pub fn write_blob(cfg: &Config, subsystem: &str, bytes: &[u8]) -> Result<(), SubsystemError> {
    let path = cfg.blob_path(subsystem);
    write_file_0600(&path, bytes)?;
    Ok(())
}

/// Reads a subsystem's blob. `Ok(None)` when no blob was written.
pub fn read_blob(cfg: &Config, subsystem: &str) -> Result<Option<Vec<u8>>, SubsystemError> {
    let path = cfg.blob_path(subsystem);
    match fs::read(&path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(SubsystemError::Io(err)),
    }
}

/// Removes a subsystem's blob after a successful restore.
pub fn remove_blob(cfg: &Config, subsystem: &str) {
    let path = cfg.blob_path(subsystem);
    if let Err(err) = fs::remove_file(&path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %err, "failed to remove blob");
        }
    }
}
