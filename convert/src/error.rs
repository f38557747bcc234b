use std::path::PathBuf;

/// Errors raised while discovering and extracting input DICOM files (C1).
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Failed to extract archive {0}: {1}")]
    Extraction(PathBuf, String),
    #[error("IO error while discovering inputs: {0}")]
    Io(#[from] std::io::Error),
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),
}

/// Fatal consistency violations detected while grouping DICOMs into series (C2).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StudyConsistencyError {
    #[error(
        "Conflicting Study Instance UIDs within a single session: expected {expected}, found {found}"
    )]
    ConflictingStudyUid { expected: String, found: String },
    #[error("Subject identifier mismatch: expected patient ID {expected}, found {found}")]
    SubjectMismatch { expected: String, found: String },
}

/// Errors raised by the heuristic host (C3).
#[derive(Debug, thiserror::Error)]
pub enum HeuristicError {
    #[error("Heuristic '{0}' could not be resolved by path or by name")]
    NotFound(String),
    #[error("Heuristic returned an empty template")]
    EmptyTemplate,
    #[error("Heuristic returned an unsupported output kind: {0}")]
    UnknownOutKind(String),
    #[error("Heuristic referenced a series id not present in the input: {0}")]
    UnknownSeriesId(String),
    #[error("Heuristic raised an error: {0}")]
    Raised(String),
    #[error("Failed to read heuristic definition: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse declarative heuristic: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid regular expression in declarative heuristic rule: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Errors raised by an external transcoder invocation (C4).
#[derive(Debug, thiserror::Error)]
pub enum TranscoderError {
    #[error("Transcoder exited with status {status}: {stderr}")]
    NonZeroExit { status: i32, stderr: String },
    #[error("Transcoder produced no output files for {0}")]
    EmptyOutput(PathBuf),
    #[error("Failed to launch transcoder: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Transcoder executable not found in PATH")]
    ExecutableNotFound,
}

/// Recoverable sidecar JSON failures (C5); the original transcoder output is kept.
#[derive(Debug, thiserror::Error)]
pub enum SidecarError {
    #[error("Failed to read back sidecar JSON at {0}: {1}")]
    ReadBack(PathBuf, String),
    #[error("Pretty-printing sidecar JSON at {0} would alter its content")]
    PrettyPrintMismatch(PathBuf),
}

/// Transient filesystem failures, retried with backoff before surfacing (C7).
#[derive(Debug, thiserror::Error)]
pub enum FilesystemError {
    #[error("Timed out waiting for the dataset lock after {0:?}")]
    LockTimeout(std::time::Duration),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Refusing to overwrite user-owned file: {0}")]
    RefusingOverwrite(PathBuf),
}

/// Usage-level configuration errors, fatal with no side effects on disk.
#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("Unknown grouping mode: {0}")]
    UnknownGroupingMode(String),
    #[error("No heuristic specified")]
    MissingHeuristic,
    #[error("Conflicting options: {0}")]
    ConflictingOptions(String),
}

/// The aggregate error type returned by fallible engine operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    StudyConsistency(#[from] StudyConsistencyError),
    #[error(transparent)]
    Heuristic(#[from] HeuristicError),
    #[error(transparent)]
    Transcoder(#[from] TranscoderError),
    #[error(transparent)]
    Sidecar(#[from] SidecarError),
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
    #[error("DICOM read error: {0}")]
    DicomRead(#[from] dicom_object::ReadError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
