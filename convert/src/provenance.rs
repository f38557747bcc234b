use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::seqinfo::{self, SeqInfo};

/// The `.heudiconv/<SID>[/ses-<SES>]/info/` bookkeeping directory for one
/// (subject, session) (§4.8, C8).
pub struct ProvenanceStore {
    info_dir: PathBuf,
}

/// Which series a set of output files was produced from, keyed by the
/// relative output path (without extension).
pub type FileGroup = HashMap<String, Vec<String>>;

/// One append-only rerun log entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RerunEntry {
    pub timestamp: String,
    pub heuristic_name: String,
    pub series_converted: usize,
    pub heuristic_changed: bool,
}

impl ProvenanceStore {
    pub fn open(dataset_root: &Path, subject: &str, session: Option<&str>) -> Result<Self> {
        let mut info_dir = dataset_root.join(".heudiconv").join(subject);
        if let Some(session) = session {
            info_dir = info_dir.join(format!("ses-{session}"));
        }
        info_dir = info_dir.join("info");
        std::fs::create_dir_all(&info_dir).map_err(Error::Io)?;
        Ok(Self { info_dir })
    }

    pub fn dicominfo_path(&self) -> PathBuf {
        self.info_dir.join("dicominfo.tsv")
    }

    fn filegroup_path(&self) -> PathBuf {
        self.info_dir.join("filegroup.json")
    }

    /// The heuristic is frozen verbatim under this exact name regardless of
    /// its original filename or whether it was the compiled `reference`
    /// heuristic (§4.8, §6).
    fn heuristic_snapshot_path(&self) -> PathBuf {
        self.info_dir.join("heuristic.py")
    }

    /// Engine-derived key → series mapping, one file per rerun-local group,
    /// regenerated every run (§4.8).
    fn auto_dir(&self) -> PathBuf {
        self.info_dir.join("auto")
    }

    /// Hand-edited overrides a reviewer leaves for the next rerun to pick
    /// up; never written by the engine itself (§4.8).
    fn edit_dir(&self) -> PathBuf {
        self.info_dir.join("edit")
    }

    fn rerun_log_path(&self) -> PathBuf {
        self.info_dir.join("rerun.log.jsonl")
    }

    /// Persists the series summary used to drive this run's conversion.
    pub fn write_dicominfo(&self, seqinfos: &[SeqInfo]) -> Result<()> {
        seqinfo::write_tsv(seqinfos, self.dicominfo_path())
    }

    /// Records which series produced which output files.
    pub fn write_filegroup(&self, groups: &FileGroup) -> Result<()> {
        let pretty = serde_json::to_vec_pretty(groups)?;
        std::fs::write(self.filegroup_path(), pretty).map_err(Error::Io)
    }

    pub fn read_filegroup(&self) -> Result<FileGroup> {
        if !self.filegroup_path().exists() {
            return Ok(FileGroup::new());
        }
        let text = std::fs::read_to_string(self.filegroup_path()).map_err(Error::Io)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Writes the engine-derived key→series mapping for this run into
    /// `auto/`, one text file per key holding its series ids, one per line
    /// (§4.8).
    pub fn write_auto_mapping(&self, groups: &FileGroup) -> Result<()> {
        let dir = self.auto_dir();
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;
        for (key, series_ids) in groups {
            let path = dir.join(sanitize_key(key));
            std::fs::write(&path, series_ids.join("\n")).map_err(Error::Io)?;
        }
        Ok(())
    }

    /// Reads back any hand-edited overrides left in `edit/` for this
    /// (subject, session), keyed the same way `write_auto_mapping` writes
    /// them. A reviewer drops a file here to steer the next rerun instead of
    /// trusting the heuristic's own mapping (§4.8).
    pub fn read_edit_overrides(&self) -> Result<FileGroup> {
        let dir = self.edit_dir();
        if !dir.exists() {
            return Ok(FileGroup::new());
        }
        let mut overrides = FileGroup::new();
        for entry in std::fs::read_dir(&dir).map_err(Error::Io)? {
            let entry = entry.map_err(Error::Io)?;
            if !entry.path().is_file() {
                continue;
            }
            let key = desanitize_key(&entry.file_name().to_string_lossy());
            let contents = std::fs::read_to_string(entry.path()).map_err(Error::Io)?;
            let series_ids: Vec<String> =
                contents.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect();
            overrides.insert(key, series_ids);
        }
        Ok(overrides)
    }

    /// Compares the heuristic's current content against the last snapshot
    /// recorded for this (subject, session). A mismatch means the
    /// heuristic drifted since the last run and forces reconversion instead
    /// of trusting the resume cache (§4.8, §9).
    pub fn heuristic_drifted(&self, heuristic_source: &str) -> bool {
        match std::fs::read_to_string(self.heuristic_snapshot_path()) {
            Ok(existing) => existing != heuristic_source,
            Err(_) => true,
        }
    }

    pub fn snapshot_heuristic(&self, heuristic_source: &str) -> Result<()> {
        std::fs::write(self.heuristic_snapshot_path(), heuristic_source).map_err(Error::Io)
    }

    /// Appends one entry to the rerun log. Never truncates or rewrites
    /// earlier entries.
    pub fn append_rerun_log(&self, entry: &RerunEntry) -> Result<()> {
        use std::io::Write as _;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.rerun_log_path())
            .map_err(Error::Io)?;
        writeln!(file, "{}", serde_json::to_string(entry)?).map_err(Error::Io)
    }

    /// Given the previous filegroup and the set of series ids the current
    /// heuristic pass produced, returns the output keys that can be
    /// skipped because their inputs are unchanged and the heuristic has
    /// not drifted.
    pub fn unchanged_outputs(&self, current: &FileGroup, heuristic_source: &str) -> Vec<String> {
        if self.heuristic_drifted(heuristic_source) {
            return Vec::new();
        }
        let previous = self.read_filegroup().unwrap_or_default();
        current
            .iter()
            .filter(|(key, series_ids)| previous.get(*key).is_some_and(|p| p == *series_ids))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

/// `auto/`/`edit/` entries are named after the output key with path
/// separators replaced, since a key like `anat/sub-01_T1w` can't itself be a
/// filename.
fn sanitize_key(key: &str) -> String {
    key.replace('/', "__")
}

fn desanitize_key(name: &str) -> String {
    name.replace("__", "/")
}

pub fn rerun_entry_now(heuristic_name: &str, series_converted: usize, heuristic_changed: bool) -> RerunEntry {
    RerunEntry {
        timestamp: Utc::now().to_rfc3339(),
        heuristic_name: heuristic_name.to_string(),
        series_converted,
        heuristic_changed,
    }
}

pub fn log_rerun(store: &ProvenanceStore, entry: &RerunEntry) -> Result<()> {
    info!(
        "Rerun at {}: {} series converted via '{}' (heuristic changed: {})",
        entry.timestamp, entry.series_converted, entry.heuristic_name, entry.heuristic_changed
    );
    store.append_rerun_log(entry)
}
