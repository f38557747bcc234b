use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::BidsMode;
use crate::error::{Error, FilesystemError, Result};

/// Advisory lock over the whole BIDS dataset root, held while top-level
/// files are read-modify-written. No ecosystem file-locking crate is used
/// here; the lock is a sentinel file created with `O_EXCL` semantics via
/// [`std::fs::OpenOptions::create_new`], polled until it can be created or
/// the configured timeout elapses.
pub struct DatasetLock {
    path: PathBuf,
}

impl DatasetLock {
    pub fn acquire(dataset_root: &Path, timeout: Duration, poll_interval: Duration) -> Result<Self> {
        let path = dataset_root.join(".heudiconv.lock");
        let deadline = Instant::now() + timeout;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(Error::Filesystem(FilesystemError::LockTimeout(timeout)));
                    }
                    debug!("Dataset lock held, waiting: {}", path.display());
                    std::thread::sleep(poll_interval);
                }
                Err(e) => return Err(Error::Filesystem(FilesystemError::Io(e))),
            }
        }
    }
}

impl Drop for DatasetLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to release dataset lock {}: {}", self.path.display(), e);
        }
    }
}

/// Writes a file only if it doesn't already exist, unless `overwrite` is
/// set; a user-edited top-level file is never silently clobbered (§4.7).
fn write_unless_present(path: &Path, contents: &[u8], overwrite: bool) -> Result<()> {
    if path.exists() && !overwrite {
        debug!("Top-level file already present, leaving as-is: {}", path.display());
        return Ok(());
    }
    std::fs::write(path, contents).map_err(Error::Io)
}

/// Ensures `dataset_description.json`, `CHANGES`, `README`, and
/// `participants.json` exist at the dataset root (§4.7). Skipped entirely
/// in [`BidsMode::EnabledNoTop`].
pub fn ensure_dataset_files(dataset_root: &Path, bids: BidsMode, overwrite: bool) -> Result<()> {
    if !bids.writes_top_level() {
        debug!("Top-level writes suppressed for this run (bids=notop)");
        return Ok(());
    }
    std::fs::create_dir_all(dataset_root).map_err(Error::Io)?;

    let description = json!({
        "Name": "Untitled",
        "BIDSVersion": "1.8.0",
        "DatasetType": "raw",
    });
    write_unless_present(
        &dataset_root.join("dataset_description.json"),
        &serde_json::to_vec_pretty(&description)?,
        overwrite,
    )?;

    write_unless_present(
        &dataset_root.join("CHANGES"),
        b"0.0.1\n- Initial conversion\n",
        overwrite,
    )?;
    write_unless_present(
        &dataset_root.join("README"),
        b"Generated by an automated DICOM-to-BIDS conversion run.\n",
        overwrite,
    )?;
    write_unless_present(
        &dataset_root.join("participants.json"),
        &serde_json::to_vec_pretty(&json!({
            "age": {"Description": "age of the participant", "Units": "years"},
            "sex": {"Description": "sex of the participant"},
        }))?,
        overwrite,
    )?;
    Ok(())
}

/// Ensures a `task-<name>_bold.json` sidecar exists at the dataset root
/// carrying shared functional-run metadata (§4.5, §4.7).
pub fn ensure_task_sidecar(
    dataset_root: &Path,
    task_name: &str,
    metadata: &serde_json::Map<String, Value>,
    overwrite: bool,
) -> Result<()> {
    let path = dataset_root.join(format!("task-{task_name}_bold.json"));
    write_unless_present(&path, &serde_json::to_vec_pretty(metadata)?, overwrite)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_times_out_when_already_held() {
        let dir = tempfile::tempdir().unwrap();
        let _held = DatasetLock::acquire(dir.path(), Duration::from_secs(5), Duration::from_millis(5)).unwrap();
        let err = DatasetLock::acquire(dir.path(), Duration::from_millis(20), Duration::from_millis(5));
        assert!(matches!(err, Err(Error::Filesystem(FilesystemError::LockTimeout(_)))));
    }

    #[test]
    fn dataset_files_are_not_overwritten_without_the_flag() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README"), b"custom readme").unwrap();
        ensure_dataset_files(dir.path(), BidsMode::Enabled, false).unwrap();
        let contents = std::fs::read_to_string(dir.path().join("README")).unwrap();
        assert_eq!(contents, "custom readme");
    }

    #[test]
    fn notop_mode_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        ensure_dataset_files(dir.path(), BidsMode::EnabledNoTop, false).unwrap();
        assert!(!dir.path().join("dataset_description.json").exists());
    }
}
