//! # Durable last-known-state snapshot.
//!
//! Every mutation of a persisted supervisor field produces one
//! [`Snapshot`] delivered to the configured [`SnapshotSink`]. The
//! built-in [`SnapshotFile`] sink writes it as a single JSON object so
//! status tooling can report the last known state while the service is
//! down.
//!
//! File mode is `0600` and the parent directory is created with `0700`;
//! the snapshot can mention forward specs and exit reasons that should
//! not be world-readable.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Last-known supervisor state, persisted on every change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Human-readable reason of the last exit.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_exit: String,
    /// Classification label of the last exit.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_class: String,
    /// Reason of the last restart trigger, accepted or not.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_trigger: String,
    /// Unix time the child last survived the success grace period.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success_unix: Option<i64>,
    /// Unix time this snapshot was written. Stamped by the file sink.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub updated_unix: i64,
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

/// Receives snapshots from the supervision core.
///
/// Invoked after the supervisor releases its locks; implementations
/// must not call back into it.
pub trait SnapshotSink: Send + Sync {
    /// Persists one snapshot. Errors are the sink's problem; the
    /// supervisor never blocks on them.
    fn write(&self, snap: &Snapshot);
}

/// File-backed snapshot sink.
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    /// Creates a sink writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Writes `snap` to the configured path, stamping `updated_unix`.
    pub fn write_snapshot(&self, snap: &Snapshot) -> io::Result<()> {
        let mut snap = snap.clone();
        snap.updated_unix = unix_now();

        if let Some(dir) = self.path.parent() {
            create_private_dir(dir)?;
        }
        let data = serde_json::to_vec(&snap)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        write_private_file(&self.path, &data)
    }
}

impl SnapshotSink for SnapshotFile {
    fn write(&self, snap: &Snapshot) {
        // Snapshot persistence is best-effort; a failed write must not
        // disturb the restart loop.
        let _ = self.write_snapshot(snap);
    }
}

/// Reads the last snapshot back, for offline status reporting.
pub fn read(path: impl AsRef<Path>) -> io::Result<Snapshot> {
    let data = fs::read(path)?;
    serde_json::from_slice(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    if dir.as_os_str().is_empty() || dir.exists() {
        return Ok(());
    }
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    if dir.as_os_str().is_empty() || dir.exists() {
        return Ok(());
    }
    fs::create_dir_all(dir)
}

#[cfg(unix)]
fn write_private_file(path: &Path, data: &[u8]) -> io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(data)
}

#[cfg(not(unix))]
fn write_private_file(path: &Path, data: &[u8]) -> io::Result<()> {
    fs::write(path, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("agent.json");
        let sink = SnapshotFile::new(&path);

        let snap = Snapshot {
            last_exit: "exit status 255 (dns)".to_string(),
            last_class: "dns".to_string(),
            last_trigger: "network change".to_string(),
            last_success_unix: Some(1_700_000_000),
            updated_unix: 0,
        };
        sink.write_snapshot(&snap).unwrap();

        let loaded = read(&path).unwrap();
        assert_eq!(loaded.last_exit, snap.last_exit);
        assert_eq!(loaded.last_class, snap.last_class);
        assert_eq!(loaded.last_trigger, snap.last_trigger);
        assert_eq!(loaded.last_success_unix, snap.last_success_unix);
        assert!(loaded.updated_unix > 0, "write must stamp updated_unix");
    }

    #[test]
    fn empty_fields_are_omitted() {
        let json = serde_json::to_string(&Snapshot::default()).unwrap();
        assert_eq!(json, "{}");
    }

    #[cfg(unix)]
    #[test]
    fn snapshot_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("client.json");
        SnapshotFile::new(&path)
            .write_snapshot(&Snapshot::default())
            .unwrap();

        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);

        let dir_mode = fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn read_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, b"not json").unwrap();
        assert!(read(&path).is_err());
    }
}
