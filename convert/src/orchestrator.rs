use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use crate::config::{Converter, RetryConfig};
use crate::error::{Error, Result, TranscoderError};
use crate::grouping::Series;
use crate::heuristic::{ConversionKey, InfoToDict, OutKind};

/// One series resolved to a concrete, disambiguated output location (§4.4).
#[derive(Clone, Debug)]
pub struct ConversionJob {
    pub series_id: String,
    /// Relative path (no extension) under the BIDS subject directory.
    pub relative_path: PathBuf,
    pub out_kind: OutKind,
}

/// Expands `{subject}`/`{session}`/`{item}` placeholders and resolves
/// same-path collisions for every series a heuristic assigned to a key,
/// producing the concrete job list the transcoder stage will run (C4).
pub fn plan(subject: &str, session: Option<&str>, dict: &InfoToDict) -> Vec<ConversionJob> {
    let mut jobs = Vec::new();
    for (key, series_ids) in dict {
        let mut ordered = series_ids.clone();
        ordered.sort();
        let mut rendered_counts: HashMap<String, usize> = HashMap::new();
        for (item, series_id) in ordered.iter().enumerate() {
            let base = substitute(&key.template, subject, session, item + 1);
            let count = rendered_counts.entry(base.clone()).or_insert(0);
            *count += 1;
            let relative_path = if *count == 1 {
                PathBuf::from(&base)
            } else {
                PathBuf::from(insert_dup_marker(&base, *count - 1))
            };
            jobs.push(ConversionJob {
                series_id: series_id.clone(),
                relative_path,
                out_kind: key.out_kind,
            });
        }
    }
    jobs.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    jobs
}

/// Disambiguates a second (or later) collision on the same rendered path by
/// inserting `__dup-NN` immediately before the filename's BIDS suffix, so
/// the whole group of files the collision belongs to stays addressable
/// under one recognizable stem (§4.4, §8).
fn insert_dup_marker(base: &str, n: usize) -> String {
    let path = Path::new(base);
    let file_name = path.file_name().map(|f| f.to_string_lossy().to_string()).unwrap_or_else(|| base.to_string());
    let marked = match file_name.rsplit_once('_') {
        Some((stem, suffix)) => format!("{stem}__dup-{n:02}_{suffix}"),
        None => format!("{file_name}__dup-{n:02}"),
    };
    match path.parent() {
        Some(parent) if parent != Path::new("") => parent.join(marked).to_string_lossy().to_string(),
        _ => marked,
    }
}

fn substitute(template: &str, subject: &str, session: Option<&str>, item: usize) -> String {
    let session_part = session.map(|s| format!("ses-{s}/")).unwrap_or_default();
    template
        .replace("{subject}", subject)
        .replace("{session}", &session_part)
        .replace("{item}", &item.to_string())
}

/// Files a completed transcoder invocation produced for one job.
#[derive(Clone, Debug, Default)]
pub struct TranscodeOutcome {
    pub produced_files: Vec<PathBuf>,
}

/// Runs the configured converter against one series' DICOM files in an
/// isolated working directory named with a random `_heudiconv<token>`
/// prefix, so a crash mid-run never leaves half-written files at the final
/// BIDS path (§4.4, §9).
pub fn convert_series(
    converter: &Converter,
    series: &Series,
    work_root: &Path,
    retry: &RetryConfig,
    rng_seed: Option<u64>,
) -> Result<TranscodeOutcome> {
    let token = working_token(rng_seed);
    let work_dir = work_root.join(format!("_heudiconv{token}"));
    std::fs::create_dir_all(&work_dir)?;

    match converter {
        Converter::None => {
            debug!("Converter disabled, skipping transcode for series {}", series.seqinfo.series_id);
            Ok(TranscodeOutcome::default())
        }
        Converter::Dcm2niix { executable } => {
            let outcome = heudicomvert_common::retry::with_backoff(
                backoff_from(retry),
                |attempt| run_dcm2niix(executable, series, &work_dir, attempt),
            )
            .map_err(Error::Transcoder)?;
            Ok(outcome)
        }
    }
}

fn backoff_from(retry: &RetryConfig) -> heudicomvert_common::retry::Backoff {
    heudicomvert_common::retry::Backoff {
        attempts: retry.write_attempts,
        initial_delay: std::time::Duration::from_millis(retry.io_retry_delay_millisec),
        multiplier: 2.0,
    }
}

fn run_dcm2niix(
    executable: &Path,
    series: &Series,
    work_dir: &Path,
    attempt: usize,
) -> std::result::Result<TranscodeOutcome, TranscoderError> {
    if attempt > 0 {
        warn!("Retrying dcm2niix for series {} (attempt {attempt})", series.seqinfo.series_id);
    }
    if attempt == 0 {
        let name = executable.to_string_lossy().to_string();
        heudicomvert_common::system::which(&name).map_err(|_| TranscoderError::ExecutableNotFound)?;
    }
    let source_dir = series
        .headers
        .first()
        .and_then(|h| h.path.parent())
        .unwrap_or_else(|| Path::new("."));

    let output = Command::new(executable)
        .arg("-z")
        .arg("y")
        .arg("-f")
        .arg("%p_%s")
        .arg("-o")
        .arg(work_dir)
        .arg(source_dir)
        .output()?;

    if !output.status.success() {
        return Err(TranscoderError::NonZeroExit {
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    let produced_files: Vec<PathBuf> = std::fs::read_dir(work_dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect()
        })
        .unwrap_or_default();

    if produced_files.is_empty() {
        return Err(TranscoderError::EmptyOutput(source_dir.to_path_buf()));
    }
    info!("dcm2niix produced {} file(s) for series {}", produced_files.len(), series.seqinfo.series_id);
    Ok(TranscodeOutcome { produced_files })
}

fn working_token(seed: Option<u64>) -> String {
    match seed {
        Some(seed) => format!("{seed:016x}"),
        None => nanoid::nanoid!(8),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristic::ConversionKey;

    #[test]
    fn item_counter_is_assigned_in_series_id_order() {
        let mut dict = InfoToDict::new();
        dict.insert(
            ConversionKey {
                template: "sub-{subject}/{session}func/sub-{subject}_{session}run-{item}_bold".to_string(),
                out_kind: OutKind::NiiGz,
            },
            vec!["2".to_string(), "1".to_string()],
        );
        let jobs = plan("01", None, &dict);
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().any(|j| j.relative_path.to_string_lossy().contains("run-1")));
        assert!(jobs.iter().any(|j| j.relative_path.to_string_lossy().contains("run-2")));
    }

    #[test]
    fn colliding_fixed_templates_get_dup_suffixes() {
        let mut dict = InfoToDict::new();
        dict.insert(
            ConversionKey {
                template: "sub-{subject}/{session}anat/sub-{subject}_{session}T1w".to_string(),
                out_kind: OutKind::NiiGz,
            },
            vec!["1".to_string(), "2".to_string()],
        );
        let jobs = plan("01", None, &dict);
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().any(|j| j.relative_path == PathBuf::from("sub-01/anat/sub-01_T1w")));
        assert!(jobs.iter().any(|j| j.relative_path == PathBuf::from("sub-01/anat/sub-01__dup-01_T1w")));
    }

    #[test]
    fn session_placeholder_expands_to_a_session_subdirectory() {
        let mut dict = InfoToDict::new();
        dict.insert(
            ConversionKey {
                template: "sub-{subject}/{session}anat/sub-{subject}_{session}T1w".to_string(),
                out_kind: OutKind::NiiGz,
            },
            vec!["1".to_string()],
        );
        let jobs = plan("01", Some("pre"), &dict);
        assert_eq!(jobs[0].relative_path, PathBuf::from("sub-01/ses-pre/anat/sub-01_ses-pre_T1w"));
    }
}
