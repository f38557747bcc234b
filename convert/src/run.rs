use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rayon::prelude::*;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::associator::{self, FieldmapCandidate};
use crate::bids::{sidecar, tables, BidsName};
use crate::config::EngineConfig;
use crate::discovery::{discover, DiscoveryRequest};
use crate::error::{Error, Result};
use crate::grouping::{acq_time_field, group, read_header, DicomHeader, Series};
use crate::heuristic::{HeuristicHost, OutKind};
use crate::orchestrator::{convert_series, plan, ConversionJob};
use crate::provenance::{self, FileGroup, ProvenanceStore};
use crate::toplevel;

/// Everything needed to convert one (subject, session) pair (§4, C1-C8).
pub struct RunRequest {
    pub dataset_root: PathBuf,
    pub subject: String,
    pub session: Option<String>,
    pub templates: Vec<String>,
    pub explicit_paths: Vec<PathBuf>,
    pub heuristic_spec: String,
    pub config: EngineConfig,
}

/// Per-(subject, session) outcome, aggregated across a batch run so one
/// failing session never hides the results of the others (§7).
#[derive(Debug, Default)]
pub struct RunReport {
    pub converted: Vec<String>,
    pub skipped_unchanged: Vec<String>,
    pub discovery_failures: usize,
    pub errors: Vec<String>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// One rendered output this run produced, kept around after conversion so
/// `IntendedFor` association, task-sidecar aggregation, and `scans.tsv`
/// can all be settled once every job has landed (§4.6, §4.7).
struct ConvertedJob {
    series_id: String,
    task: Option<String>,
    /// Rendered stem (no extension), relative to `dataset_root`.
    rendered_relative: PathBuf,
    dest_stem: PathBuf,
    /// Extension of the produced volume file, when this job transcoded one
    /// (as opposed to a raw DICOM copy), e.g. `.nii.gz`.
    image_extension: Option<String>,
    sidecar: Map<String, Value>,
    scan_row: tables::ScanRow,
}

/// Runs the full pipeline for one (subject, session): discovery, grouping,
/// heuristic resolution, conversion, BIDS emission, top-level bookkeeping,
/// and provenance (§4, §7).
pub fn run(request: &RunRequest) -> Result<RunReport> {
    let mut report = RunReport::default();

    let discovery = discover(&DiscoveryRequest {
        subject: request.subject.clone(),
        session: request.session.clone(),
        templates: request.templates.clone(),
        explicit_paths: request.explicit_paths.clone(),
    });
    report.discovery_failures = discovery.failures.len();
    for failure in &discovery.failures {
        warn!("Discovery failure: {failure}");
    }

    let read_results: Vec<_> = discovery
        .files
        .par_iter()
        .map(|path| (path, read_header(path)))
        .collect();
    let mut headers: Vec<DicomHeader> = Vec::new();
    for (path, result) in read_results {
        match result {
            Ok(header) => headers.push(header),
            Err(e) => warn!("Skipping unreadable file {}: {}", path.display(), e),
        }
    }
    if headers.is_empty() {
        report.errors.push("no readable DICOM headers discovered".to_string());
        return Ok(report);
    }

    // Resolved before grouping so `GroupingMode::Custom` can delegate to the
    // heuristic's own grouping attribute (§4.2, §4.3).
    let host = HeuristicHost::resolve(&request.heuristic_spec).map_err(Error::Heuristic)?;
    let heuristic_source = describe_heuristic(&request.heuristic_spec)?;
    let grouping_spec = host.grouping();

    let series_list = group(request.config.grouping, &request.subject, headers, grouping_spec.as_ref())?;
    let seqinfos: Vec<_> = series_list.iter().map(|s| s.seqinfo.clone()).collect();

    let provenance = ProvenanceStore::open(&request.dataset_root, &request.subject, request.session.as_deref())?;
    provenance.write_dicominfo(&seqinfos)?;

    let dict = host.convert(&seqinfos).map_err(Error::Heuristic)?;

    let jobs = plan(&request.subject, request.session.as_deref(), &dict);
    let series_by_id: HashMap<&str, &Series> =
        series_list.iter().map(|s| (s.seqinfo.series_id.as_str(), s)).collect();

    let mut filegroup: FileGroup = HashMap::new();
    for job in &jobs {
        filegroup.insert(job.relative_path.to_string_lossy().to_string(), vec![job.series_id.clone()]);
    }
    let unchanged = provenance.unchanged_outputs(&filegroup, &heuristic_source);

    {
        let _lock = toplevel::DatasetLock::acquire(
            &request.dataset_root,
            Duration::from_secs(request.config.filelock_timeout_secs),
            Duration::from_millis(request.config.retry.lock_poll_interval_millisec),
        )?;
        toplevel::ensure_dataset_files(&request.dataset_root, request.config.bids, request.config.overwrite)?;
        if request.config.bids.writes_top_level() {
            if let Some(first_series) = series_list.first() {
                let header = &first_series.headers[0];
                tables::upsert_participant(
                    &request.dataset_root.join("participants.tsv"),
                    tables::ParticipantRow {
                        participant_id: format!("sub-{}", request.subject),
                        age: tables::parse_age_years(&header.patient_age),
                        sex: header.patient_sex.clone(),
                        group: "n/a".to_string(),
                    },
                )?;
            }
        }
    }

    let work_root = request.dataset_root.join(".heudiconv-work");
    std::fs::create_dir_all(&work_root).map_err(Error::Io)?;

    let mut converted: Vec<ConvertedJob> = Vec::new();
    for job in &jobs {
        let key = job.relative_path.to_string_lossy().to_string();
        if unchanged.contains(&key) {
            report.skipped_unchanged.push(key);
            continue;
        }
        let Some(series) = series_by_id.get(job.series_id.as_str()) else {
            report.errors.push(format!("heuristic referenced unknown series {}", job.series_id));
            continue;
        };
        match convert_one(request, &host, series, job, &work_root) {
            Ok(outputs) => {
                report.converted.push(key);
                converted.extend(outputs);
            }
            Err(e) => {
                error!("Failed to convert series {}: {}", job.series_id, e);
                report.errors.push(format!("{}: {e}", job.series_id));
            }
        }
    }

    apply_intended_for(request, &host, &series_by_id, &mut converted);
    write_task_sidecars(&request.dataset_root, &mut converted)?;
    write_scan_rows(request, &converted)?;

    let heuristic_changed = provenance.heuristic_drifted(&heuristic_source);
    provenance.write_filegroup(&filegroup)?;
    provenance.write_auto_mapping(&filegroup)?;
    provenance.snapshot_heuristic(&heuristic_source)?;
    let entry = provenance::rerun_entry_now(&request.heuristic_spec, jobs.len(), heuristic_changed);
    provenance::log_rerun(&provenance, &entry)?;

    info!(
        "Converted {} series, skipped {} unchanged, {} errors",
        report.converted.len(),
        report.skipped_unchanged.len(),
        report.errors.len()
    );
    Ok(report)
}

fn describe_heuristic(spec: &str) -> Result<String> {
    let path = Path::new(spec);
    if path.is_file() {
        std::fs::read_to_string(path).map_err(Error::Io)
    } else {
        Ok(spec.to_string())
    }
}

fn modality_dir_of(relative_path: &Path) -> String {
    relative_path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Applies the modality default, legacy `rec` rewrite, and (when splitting)
/// the `echo-N` entity, then renders the final filename stem (§4.5).
fn render_stem(relative_path: &Path, modality_dir: &str, echo: Option<i32>) -> PathBuf {
    let file_stem = relative_path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let mut bids_name = BidsName::parse(&file_stem);
    bids_name.apply_modality_default(modality_dir);
    bids_name.normalize_legacy_rec();
    if let Some(echo) = echo {
        bids_name.set("echo", &echo.to_string());
    }
    let rendered = bids_name.render();
    match relative_path.parent() {
        Some(parent) if parent != Path::new("") => parent.join(rendered),
        _ => PathBuf::from(rendered),
    }
}

/// Distinct non-zero `EchoNumber` values present in a series, in ascending
/// order; empty when the series isn't multi-echo.
fn echo_labels(headers: &[DicomHeader]) -> Vec<i32> {
    let mut labels: Vec<i32> = headers.iter().map(|h| h.echo_number).filter(|&n| n > 0).collect();
    labels.sort_unstable();
    labels.dedup();
    if labels.len() < 2 {
        Vec::new()
    } else {
        labels
    }
}

fn is_image_extension(ext: &str) -> bool {
    ext.ends_with(".nii") || ext.ends_with(".nii.gz")
}

/// dcm2niix marks each echo of a split multi-echo series with an `_eN`
/// token before the extension; used to route produced files back to the
/// echo group that requested the split (§4.4, §9 "best-effort" note).
fn echo_index_from_filename(name: &str) -> Option<usize> {
    let mut search_from = 0;
    while let Some(pos) = name[search_from..].find("_e") {
        let start = search_from + pos + 2;
        let digits_end = name[start..]
            .find(|c: char| !c.is_ascii_digit())
            .map(|i| start + i)
            .unwrap_or(name.len());
        if digits_end > start {
            return name[start..digits_end].parse::<usize>().ok();
        }
        search_from = start;
        if search_from >= name.len() {
            break;
        }
    }
    None
}

fn random_token(seed: Option<u64>) -> String {
    match seed {
        Some(seed) => format!("{seed:016x}"),
        None => nanoid::nanoid!(8),
    }
}

fn convert_one(
    request: &RunRequest,
    host: &HeuristicHost,
    series: &Series,
    job: &ConversionJob,
    work_root: &Path,
) -> Result<Vec<ConvertedJob>> {
    let modality_dir = modality_dir_of(&job.relative_path);
    let dest_dir = request.dataset_root.join(job.relative_path.parent().unwrap_or(Path::new(".")));
    std::fs::create_dir_all(&dest_dir).map_err(Error::Io)?;

    let echoes = if host.should_split_by_echo() { echo_labels(&series.headers) } else { Vec::new() };

    if job.out_kind == OutKind::Dicom {
        if echoes.is_empty() {
            let rendered_relative = render_stem(&job.relative_path, &modality_dir, None);
            let dest_stem = request.dataset_root.join(&rendered_relative);
            copy_raw_dicom_series(&series.headers, &dest_stem, request.config.overwrite)?;
            return Ok(vec![finalize_job(request, job, &series.headers, rendered_relative, dest_stem, None)]);
        }
        let mut out = Vec::new();
        for echo in &echoes {
            let echo_headers: Vec<DicomHeader> =
                series.headers.iter().filter(|h| h.echo_number == *echo).cloned().collect();
            let rendered_relative = render_stem(&job.relative_path, &modality_dir, Some(*echo));
            let dest_stem = request.dataset_root.join(&rendered_relative);
            copy_raw_dicom_series(&echo_headers, &dest_stem, request.config.overwrite)?;
            out.push(finalize_job(request, job, &echo_headers, rendered_relative, dest_stem, None));
        }
        return Ok(out);
    }

    let outcome =
        convert_series(&request.config.converter, series, work_root, &request.config.retry, request.config.random_seed)?;

    if echoes.is_empty() {
        let rendered_relative = render_stem(&job.relative_path, &modality_dir, None);
        let dest_stem = request.dataset_root.join(&rendered_relative);
        let mut image_extension = None;
        for produced in &outcome.produced_files {
            if let Some(ext) = extension_after_stem(produced) {
                let dest = PathBuf::from(format!("{}{ext}", dest_stem.display()));
                if dest.exists() && !request.config.overwrite {
                    return Err(Error::Filesystem(crate::error::FilesystemError::RefusingOverwrite(dest)));
                }
                std::fs::rename(produced, &dest)
                    .or_else(|_| std::fs::copy(produced, &dest).map(|_| ()))
                    .map_err(Error::Io)?;
                if is_image_extension(&ext) {
                    image_extension = Some(ext);
                }
            }
        }
        return Ok(vec![finalize_job(request, job, &series.headers, rendered_relative, dest_stem, image_extension)]);
    }

    let mut dest_stems = Vec::with_capacity(echoes.len());
    let mut rendered = Vec::with_capacity(echoes.len());
    for echo in &echoes {
        let rendered_relative = render_stem(&job.relative_path, &modality_dir, Some(*echo));
        dest_stems.push(request.dataset_root.join(&rendered_relative));
        rendered.push(rendered_relative);
    }
    let mut image_extensions = vec![None; echoes.len()];
    for produced in &outcome.produced_files {
        let Some(ext) = extension_after_stem(produced) else { continue };
        let name = produced.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let idx = match echo_index_from_filename(&name) {
            Some(n) if n >= 1 && n <= echoes.len() => n - 1,
            _ => {
                warn!("Could not map produced file {} to an echo group, assigning to the first", name);
                0
            }
        };
        let dest = PathBuf::from(format!("{}{ext}", dest_stems[idx].display()));
        if dest.exists() && !request.config.overwrite {
            return Err(Error::Filesystem(crate::error::FilesystemError::RefusingOverwrite(dest)));
        }
        std::fs::rename(produced, &dest)
            .or_else(|_| std::fs::copy(produced, &dest).map(|_| ()))
            .map_err(Error::Io)?;
        if is_image_extension(&ext) {
            image_extensions[idx] = Some(ext);
        }
    }

    let mut out = Vec::new();
    for (i, echo) in echoes.iter().enumerate() {
        let echo_headers: Vec<DicomHeader> =
            series.headers.iter().filter(|h| h.echo_number == *echo).cloned().collect();
        out.push(finalize_job(
            request,
            job,
            &echo_headers,
            rendered[i].clone(),
            dest_stems[i].clone(),
            image_extensions[i].clone(),
        ));
    }
    Ok(out)
}

fn finalize_job(
    request: &RunRequest,
    job: &ConversionJob,
    headers: &[DicomHeader],
    rendered_relative: PathBuf,
    dest_stem: PathBuf,
    image_extension: Option<String>,
) -> ConvertedJob {
    let file_stem = rendered_relative.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let bids_name = BidsName::parse(&file_stem);
    let task = bids_name.get("task").map(str::to_string);

    let mut sidecar = sidecar::build(headers, task.as_deref(), request.config.minmeta);
    if let Some(echo) = bids_name.get("echo").and_then(|v| v.parse::<i32>().ok()) {
        let echo_time = headers.first().map(|h| h.echo_time).unwrap_or(f64::NAN);
        sidecar = sidecar::with_echo(sidecar, echo, echo_time);
    }

    let filename = format!("{}{}", rendered_relative.display(), image_extension.clone().unwrap_or_default());
    let acq_time = headers.first().map(acq_time_field).unwrap_or_else(|| "n/a".to_string());
    let scan_row = tables::ScanRow {
        filename,
        acq_time,
        operator: "n/a".to_string(),
        randstr: random_token(request.config.random_seed),
    };

    ConvertedJob { series_id: job.series_id.clone(), task, rendered_relative, dest_stem, image_extension, sidecar, scan_row }
}

/// For series routed to `OutKind::Dicom` the original files are kept as-is
/// rather than handed to the transcoder (§4.4: some secondary-capture or
/// non-image series have no meaningful volume representation).
fn copy_raw_dicom_series(headers: &[DicomHeader], dest_stem: &Path, overwrite: bool) -> Result<()> {
    for (i, header) in headers.iter().enumerate() {
        let dest = PathBuf::from(format!("{}_{:04}.dcm", dest_stem.display(), i + 1));
        if dest.exists() && !overwrite {
            return Err(Error::Filesystem(crate::error::FilesystemError::RefusingOverwrite(dest)));
        }
        std::fs::copy(&header.path, &dest).map_err(Error::Io)?;
    }
    Ok(())
}

fn strip_subject_prefix(path: &Path, subject: &str, session: Option<&str>) -> PathBuf {
    let mut prefix = PathBuf::from(format!("sub-{subject}"));
    if let Some(session) = session {
        prefix = prefix.join(format!("ses-{session}"));
    }
    path.strip_prefix(&prefix).map(Path::to_path_buf).unwrap_or_else(|_| path.to_path_buf())
}

/// Populates `IntendedFor` in each fieldmap's sidecar once every job in the
/// session has a rendered output path, using the heuristic's declared
/// association rule and tie-break criterion (§4.6, C6).
fn apply_intended_for(
    request: &RunRequest,
    host: &HeuristicHost,
    series_by_id: &HashMap<&str, &Series>,
    converted: &mut [ConvertedJob],
) {
    let Some(opts) = host.populate_intended_for_opts() else { return };

    let candidate_targets: Vec<(&Series, PathBuf, String)> = converted
        .iter()
        .filter(|c| !modality_dir_of(&c.rendered_relative).eq_ignore_ascii_case("fmap"))
        .filter_map(|c| {
            let ext = c.image_extension.clone()?;
            let series = *series_by_id.get(c.series_id.as_str())?;
            Some((series, c.rendered_relative.clone(), ext))
        })
        .collect();
    let extension_by_path: HashMap<PathBuf, String> =
        candidate_targets.iter().map(|(_, p, ext)| (p.clone(), ext.clone())).collect();

    let fieldmap_indices: Vec<usize> = converted
        .iter()
        .enumerate()
        .filter(|(_, c)| modality_dir_of(&c.rendered_relative).eq_ignore_ascii_case("fmap"))
        .map(|(i, _)| i)
        .collect();
    if fieldmap_indices.is_empty() {
        return;
    }

    let fieldmap_candidates: Vec<(usize, FieldmapCandidate)> = fieldmap_indices
        .iter()
        .filter_map(|&i| {
            let fieldmap_series = *series_by_id.get(converted[i].series_id.as_str())?;
            Some((
                i,
                FieldmapCandidate {
                    fieldmap: fieldmap_series,
                    fieldmap_output: converted[i].rendered_relative.clone(),
                    candidates: candidate_targets.iter().map(|(s, p, _)| (*s, p.clone())).collect(),
                },
            ))
        })
        .collect();

    let mut updates: Vec<(usize, Vec<String>)> = Vec::new();
    for (n, (fmap_idx, candidate)) in fieldmap_candidates.iter().enumerate() {
        let others: Vec<&FieldmapCandidate> =
            fieldmap_candidates.iter().enumerate().filter(|(j, _)| *j != n).map(|(_, (_, c))| c).collect();
        let targets = associator::intended_for(&opts.rule, opts.criterion, candidate, &others);
        let entries: Vec<String> = targets
            .into_iter()
            .filter_map(|stem| {
                let ext = extension_by_path.get(&stem)?;
                let relative = strip_subject_prefix(&stem, &request.subject, request.session.as_deref());
                Some(format!("{}{}", relative.display(), ext))
            })
            .collect();
        if !entries.is_empty() {
            updates.push((*fmap_idx, entries));
        }
    }

    for (idx, entries) in updates {
        converted[idx]
            .sidecar
            .insert("IntendedFor".to_string(), Value::Array(entries.into_iter().map(Value::String).collect()));
    }
}

/// Hoists fields shared identically across every per-run sidecar feeding a
/// task into the task-level `task-<name>_bold.json`, then strips them from
/// the per-run sidecars so each one only carries what is unique to that run
/// (§4.7).
fn write_task_sidecars(dataset_root: &Path, converted: &mut [ConvertedJob]) -> Result<()> {
    let mut by_task: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, job) in converted.iter().enumerate() {
        if let Some(task) = &job.task {
            by_task.entry(task.clone()).or_default().push(i);
        }
    }

    for (task, indices) in &by_task {
        // With a single run feeding the task there is nothing to generalize
        // against yet; leave that run's sidecar untouched rather than
        // hoisting its entire content into the task-level file.
        if indices.len() < 2 {
            continue;
        }
        let sidecars: Vec<&Map<String, Value>> = indices.iter().map(|&i| &converted[i].sidecar).collect();
        let common = common_fields(&sidecars);
        if !common.is_empty() {
            toplevel::ensure_task_sidecar(dataset_root, task, &common, true)?;
        }
        for &i in indices {
            for key in common.keys() {
                converted[i].sidecar.remove(key);
            }
        }
    }

    for job in converted.iter() {
        if job.sidecar.is_empty() {
            continue;
        }
        let path = PathBuf::from(format!("{}.json", job.dest_stem.display()));
        sidecar::write_pretty(&path, &job.sidecar)?;
    }
    Ok(())
}

fn common_fields(sidecars: &[&Map<String, Value>]) -> Map<String, Value> {
    let Some(first) = sidecars.first() else { return Map::new() };
    let mut common = Map::new();
    for (key, value) in first.iter() {
        if sidecars.iter().all(|m| m.get(key) == Some(value)) {
            common.insert(key.clone(), value.clone());
        }
    }
    common
}

fn write_scan_rows(request: &RunRequest, converted: &[ConvertedJob]) -> Result<()> {
    if converted.is_empty() {
        return Ok(());
    }
    let scans_path = scans_tsv_path(&request.dataset_root, &request.subject, request.session.as_deref());
    if let Some(parent) = scans_path.parent() {
        std::fs::create_dir_all(parent).map_err(Error::Io)?;
    }
    let rows: Vec<tables::ScanRow> = converted.iter().map(|c| c.scan_row.clone()).collect();
    tables::append_scans(&scans_path, &rows)
}

fn scans_tsv_path(dataset_root: &Path, subject: &str, session: Option<&str>) -> PathBuf {
    let mut dir = dataset_root.join(format!("sub-{subject}"));
    let mut stem = format!("sub-{subject}");
    if let Some(session) = session {
        dir = dir.join(format!("ses-{session}"));
        stem.push_str(&format!("_ses-{session}"));
    }
    dir.join(format!("{stem}_scans.tsv"))
}

fn extension_after_stem(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_string_lossy().to_string();
    name.find('.').map(|idx| name[idx..].to_string())
}
