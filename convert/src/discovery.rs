use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::error::DiscoveryError;

/// One (subject, session) worth of input: an ordered list of path templates
/// with `{subject}`/`{session}` placeholders, plus any paths given verbatim.
#[derive(Clone, Debug, Default)]
pub struct DiscoveryRequest {
    pub subject: String,
    pub session: Option<String>,
    pub templates: Vec<String>,
    pub explicit_paths: Vec<PathBuf>,
}

impl DiscoveryRequest {
    /// Expands `{subject}`/`{session}` in every template against this
    /// request's subject and session.
    fn expand_templates(&self) -> Vec<PathBuf> {
        self.templates
            .iter()
            .map(|t| {
                let expanded = t
                    .replace("{subject}", &self.subject)
                    .replace("{session}", self.session.as_deref().unwrap_or(""));
                PathBuf::from(expanded)
            })
            .collect()
    }
}

/// Result of a discovery pass: the flat list of candidate DICOM paths plus
/// any per-archive extraction failures, which never abort the overall scan.
pub struct DiscoveryOutcome {
    pub files: Vec<PathBuf>,
    pub failures: Vec<DiscoveryError>,
    /// Scratch directory backing any extracted archives; kept alive for the
    /// lifetime of the outcome so the returned paths stay valid.
    pub scratch: Option<TempDir>,
}

/// Runs file discovery and archive extraction for one request (C1).
pub fn discover(request: &DiscoveryRequest) -> DiscoveryOutcome {
    let mut roots = request.expand_templates();
    roots.extend(request.explicit_paths.iter().cloned());

    let mut files = Vec::new();
    let mut failures = Vec::new();
    let mut scratch: Option<TempDir> = None;
    let mut archive_index = 0usize;

    for root in &roots {
        if !root.exists() {
            warn!("Discovery root does not exist, skipping: {}", root.display());
            continue;
        }
        if root.is_dir() {
            collect_directory(root, &mut files, &mut failures, &mut scratch, &mut archive_index);
        } else if is_archive(root) {
            extract_archive(root, &mut files, &mut failures, &mut scratch, &mut archive_index);
        } else {
            files.push(root.clone());
        }
    }

    DiscoveryOutcome { files, failures, scratch }
}

fn collect_directory(
    dir: &Path,
    files: &mut Vec<PathBuf>,
    failures: &mut Vec<DiscoveryError>,
    scratch: &mut Option<TempDir>,
    archive_index: &mut usize,
) {
    for entry in WalkDir::new(dir) {
        match entry {
            Ok(entry) => {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                if is_archive(path) {
                    extract_archive(path, files, failures, scratch, archive_index);
                } else {
                    files.push(path.to_path_buf());
                }
            }
            Err(e) => {
                error!("Failed to traverse directory: {}", e);
                failures.push(DiscoveryError::WalkDir(e));
            }
        }
    }
}

fn is_archive(path: &Path) -> bool {
    let name = path.to_string_lossy().to_ascii_lowercase();
    name.ends_with(".tar")
        || name.ends_with(".tar.gz")
        || name.ends_with(".tgz")
        || name.ends_with(".zip")
}

fn ensure_scratch(scratch: &mut Option<TempDir>) -> std::io::Result<&TempDir> {
    if scratch.is_none() {
        *scratch = Some(tempfile::Builder::new().prefix("heudicomvert-").tempdir()?);
    }
    Ok(scratch.as_ref().unwrap())
}

/// Extracts one archive into its own subdirectory of the shared scratch
/// root, so file names from separate archives never collide.
fn extract_archive(
    archive: &Path,
    files: &mut Vec<PathBuf>,
    failures: &mut Vec<DiscoveryError>,
    scratch: &mut Option<TempDir>,
    archive_index: &mut usize,
) {
    let dest = match ensure_scratch(scratch) {
        Ok(dir) => {
            let subdir = dir.path().join(format!("archive_{archive_index:04}"));
            *archive_index += 1;
            subdir
        }
        Err(e) => {
            failures.push(DiscoveryError::Extraction(archive.to_path_buf(), e.to_string()));
            return;
        }
    };
    if let Err(e) = std::fs::create_dir_all(&dest) {
        failures.push(DiscoveryError::Extraction(archive.to_path_buf(), e.to_string()));
        return;
    }
    info!("Extracting {} to {}", archive.display(), dest.display());
    let result = if archive.to_string_lossy().to_ascii_lowercase().ends_with(".zip") {
        extract_zip(archive, &dest)
    } else {
        extract_tar(archive, &dest)
    };
    match result {
        Ok(()) => {
            for entry in WalkDir::new(&dest).into_iter().filter_map(|e| e.ok()) {
                if entry.path().is_file() {
                    files.push(entry.path().to_path_buf());
                }
            }
        }
        Err(e) => {
            debug!("Extraction failure for {}: {}", archive.display(), e);
            failures.push(DiscoveryError::Extraction(archive.to_path_buf(), e.to_string()));
        }
    }
}

fn extract_tar(archive: &Path, dest: &Path) -> std::io::Result<()> {
    let file = File::open(archive)?;
    let name = archive.to_string_lossy().to_ascii_lowercase();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        let decoder = flate2::read::GzDecoder::new(BufReader::new(file));
        tar::Archive::new(decoder).unpack(dest)
    } else {
        tar::Archive::new(BufReader::new(file)).unpack(dest)
    }
}

fn extract_zip(archive: &Path, dest: &Path) -> std::io::Result<()> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file))
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    zip.extract(dest).map_err(|e| std::io::Error::other(e.to_string()))
}
