use std::path::PathBuf;
use std::str::FromStr;

use heudicomvert_convert::config::{BidsMode, Converter, EngineConfig, GroupingMode};
use heudicomvert_convert::run::RunRequest;
use serde::{Deserialize, Serialize};

use crate::cli::ConvertArgs;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to read config file {0}: {1}")]
    Read(String, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Engine(#[from] heudicomvert_convert::error::Error),
}

/// The on-disk shape a `--config <path>` TOML file must have, merged with
/// `ConvertArgs` the way `dcm_file_sort_service::Config` merges a config
/// file over manual CLI flags.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    pub output_dir: Option<String>,
    pub subject: Option<String>,
    pub session: Option<String>,
    #[serde(default)]
    pub templates: Vec<String>,
    #[serde(default)]
    pub explicit_paths: Vec<String>,
    pub heuristic: Option<String>,
    pub grouping: Option<String>,
    pub minmeta: Option<bool>,
    pub overwrite: Option<bool>,
    pub notop: Option<bool>,
    pub random_seed: Option<u64>,
    pub converter: Option<String>,
    pub dcm2niix_path: Option<String>,
}

pub fn load_file_config(path: &str) -> Result<FileConfig, Error> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::Read(path.to_string(), e))?;
    Ok(toml::from_str(&text)?)
}

/// Builds the engine's `RunRequest` from manual CLI flags, optionally
/// overridden by a loaded `FileConfig` (file values win, matching the
/// sorting service's config-over-flags precedence).
pub fn build_request(args: &ConvertArgs, file: Option<FileConfig>) -> Result<RunRequest, Error> {
    let file = file.unwrap_or_default();

    let output_dir = file.output_dir.unwrap_or_else(|| args.output_dir.clone());
    let subject = file.subject.unwrap_or_else(|| args.subject.clone());
    let session = file.session.or_else(|| args.session.clone());
    let templates = if file.templates.is_empty() { args.templates.clone() } else { file.templates };
    let explicit_paths = if file.explicit_paths.is_empty() {
        args.explicit_paths.clone()
    } else {
        file.explicit_paths
    };
    let heuristic_spec = file.heuristic.unwrap_or_else(|| args.heuristic.clone());
    let grouping_str = file.grouping.unwrap_or_else(|| args.grouping.clone());
    let minmeta = file.minmeta.unwrap_or(args.minmeta);
    let overwrite = file.overwrite.unwrap_or(args.overwrite);
    let notop = file.notop.unwrap_or(args.notop);
    let random_seed = file.random_seed.or(args.random_seed);
    let converter_kind = file.converter.unwrap_or_else(|| args.converter.clone());
    let dcm2niix_path = file.dcm2niix_path.unwrap_or_else(|| args.dcm2niix_path.clone());

    let grouping = GroupingMode::from_str(&grouping_str)
        .map_err(heudicomvert_convert::error::Error::from)?;
    let bids = if notop { BidsMode::EnabledNoTop } else { BidsMode::Enabled };
    let converter = match converter_kind.as_str() {
        "none" => Converter::None,
        _ => Converter::Dcm2niix { executable: PathBuf::from(dcm2niix_path) },
    };

    let config = EngineConfig { bids, grouping, converter, minmeta, overwrite, random_seed, ..EngineConfig::default() };

    Ok(RunRequest {
        dataset_root: PathBuf::from(output_dir),
        subject,
        session,
        templates,
        explicit_paths: explicit_paths.into_iter().map(PathBuf::from).collect(),
        heuristic_spec,
        config,
    })
}
