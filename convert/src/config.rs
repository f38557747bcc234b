use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Environment variable read for the dataset-root advisory lock timeout,
/// overriding [`EngineConfig::filelock_timeout_secs`]'s default.
pub const ENV_FILELOCK_TIMEOUT: &str = "HEUDICONVERT_FILELOCK_TIMEOUT";

/// How the top-level dataset files (§4.7) participate in a run.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default, Serialize, Deserialize)]
pub enum BidsMode {
    #[default]
    Disabled,
    Enabled,
    /// `bids=notop`: suppress all top-level writes for this run.
    EnabledNoTop,
}

impl BidsMode {
    pub fn is_enabled(self) -> bool {
        matches!(self, BidsMode::Enabled | BidsMode::EnabledNoTop)
    }

    pub fn writes_top_level(self) -> bool {
        matches!(self, BidsMode::Enabled)
    }
}

/// Series-grouping strategy (§4.2).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingMode {
    #[default]
    AccessionNumber,
    StudyUid,
    All,
    Custom,
}

impl std::str::FromStr for GroupingMode {
    type Err = crate::error::UsageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accession_number" => Ok(GroupingMode::AccessionNumber),
            "studyUID" | "study_uid" => Ok(GroupingMode::StudyUid),
            "all" => Ok(GroupingMode::All),
            "custom" => Ok(GroupingMode::Custom),
            other => Err(crate::error::UsageError::UnknownGroupingMode(
                other.to_string(),
            )),
        }
    }
}

/// The external DICOM→volume transcoder to drive (§6).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Converter {
    Dcm2niix { executable: PathBuf },
    /// Skip transcoding; only produce the `info/` provenance artefacts.
    None,
}

impl Default for Converter {
    fn default() -> Self {
        Converter::Dcm2niix {
            executable: PathBuf::from("dcm2niix"),
        }
    }
}

/// External batch-queue delegation (§6, §9): when set, the engine spawns one
/// `heudicomvert` invocation per (subject, session) instead of converting
/// in-process for more than one at a time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub queue: String,
    pub queue_args: Vec<String>,
}

/// Retry/backoff knobs for top-level file writes and transient I/O, in the
/// same shape the sorting service keeps for its own copy/remove retries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub write_attempts: usize,
    pub io_retry_delay_millisec: u64,
    pub lock_poll_interval_millisec: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            write_attempts: 5,
            io_retry_delay_millisec: 100,
            lock_poll_interval_millisec: 200,
        }
    }
}

/// Recognized engine options (§6).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub bids: BidsMode,
    pub grouping: GroupingMode,
    pub converter: Converter,
    /// Restrict sidecar JSONs to the BIDS-declared vocabulary.
    pub minmeta: bool,
    pub overwrite: bool,
    pub random_seed: Option<u64>,
    pub queue: Option<QueueConfig>,
    pub filelock_timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let filelock_timeout_secs = std::env::var(ENV_FILELOCK_TIMEOUT)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300);
        Self {
            bids: BidsMode::Enabled,
            grouping: GroupingMode::AccessionNumber,
            converter: Converter::default(),
            minmeta: false,
            overwrite: false,
            random_seed: None,
            queue: None,
            filelock_timeout_secs,
            retry: RetryConfig::default(),
        }
    }
}
