mod declarative;
mod reference;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub use declarative::DeclarativeHeuristic;
pub use reference::ReferenceHeuristic;

use crate::associator::{AssociationRule, Criterion};
use crate::error::HeuristicError;
use crate::seqinfo::SeqInfo;

/// The file formats a conversion target can be emitted as (§4.4).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutKind {
    Nii,
    NiiGz,
    Dicom,
}

/// A BIDS filename template plus the formats it should be emitted as. The
/// template uses `{item}` for the disambiguation counter (§4.4) and BIDS
/// entity placeholders (`sub-{subject}`, `ses-{session}`, ...).
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, serde::Serialize, serde::Deserialize)]
pub struct ConversionKey {
    pub template: String,
    pub out_kind: OutKind,
}

/// Maps every produced key to the series ids that should be converted into it.
pub type InfoToDict = BTreeMap<ConversionKey, Vec<String>>;

/// A heuristic-supplied subject/session/output-root override, resolved from
/// the discovered seqinfo rows instead of the caller's command-line
/// arguments (§4.3).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InfoToIds {
    pub subject: Option<String>,
    pub session: Option<String>,
    pub output_dir: Option<PathBuf>,
}

/// How `GroupingMode::Custom` partitions discovered headers into sessions
/// (§4.2, §4.3).
#[derive(Clone, Debug)]
pub enum GroupingSpec {
    /// Partition by the textual value of one DICOM header field.
    Attribute(String),
}

/// One fieldmap-association rule plus its tie-break criterion, as returned
/// by a heuristic that wants `IntendedFor` populated (§4.6).
#[derive(Clone, Debug)]
pub struct IntendedForOpts {
    pub rule: AssociationRule,
    pub criterion: Criterion,
}

/// Host-side contract for a heuristic: given the seqinfo rows discovered for
/// one (subject, session), decide where each series belongs (C3). Every
/// method beyond `infotodict` is optional and defaults to a no-op so
/// existing heuristics keep compiling as the contract grows.
pub trait Heuristic: Send + Sync {
    fn name(&self) -> &str;
    fn infotodict(&self, seqinfos: &[SeqInfo]) -> std::result::Result<InfoToDict, HeuristicError>;

    /// Lets the heuristic override the subject/session/output root inferred
    /// from the discovered series instead of the caller-supplied ones.
    fn infotoids(&self, _seqinfos: &[SeqInfo], _outdir: &Path) -> Option<InfoToIds> {
        None
    }

    /// Filters discovered file paths before they are even opened.
    fn filter_files(&self, _path: &Path) -> bool {
        false
    }

    /// Filters already-read series out of the conversion entirely.
    fn filter_dicom(&self, _seqinfo: &SeqInfo) -> bool {
        false
    }

    /// Overrides how `GroupingMode::Custom` partitions input headers.
    fn grouping(&self) -> Option<GroupingSpec> {
        None
    }

    /// Whether multi-echo series should be split into per-echo BIDS outputs.
    fn should_split_by_echo(&self) -> bool {
        false
    }

    /// Enables fieldmap↔image `IntendedFor` population for this heuristic.
    fn populate_intended_for_opts(&self) -> Option<IntendedForOpts> {
        None
    }
}

/// Resolves a heuristic by path (a declarative TOML rule file) first, then
/// falls back to the small compiled registry, mirroring the sorting
/// service's factory-over-enum dispatch.
pub struct HeuristicHost {
    heuristic: Box<dyn Heuristic>,
}

impl HeuristicHost {
    /// `spec` is either a filesystem path to a declarative rule file or the
    /// name of a compiled heuristic (currently only `"reference"`).
    pub fn resolve(spec: &str) -> std::result::Result<Self, HeuristicError> {
        let path = Path::new(spec);
        if path.is_file() {
            let heuristic = DeclarativeHeuristic::load(path)?;
            return Ok(Self { heuristic: Box::new(heuristic) });
        }
        match spec {
            "reference" => Ok(Self { heuristic: Box::new(ReferenceHeuristic) }),
            other => Err(HeuristicError::NotFound(other.to_string())),
        }
    }

    pub fn name(&self) -> &str {
        self.heuristic.name()
    }

    pub fn grouping(&self) -> Option<GroupingSpec> {
        self.heuristic.grouping()
    }

    pub fn should_split_by_echo(&self) -> bool {
        self.heuristic.should_split_by_echo()
    }

    pub fn populate_intended_for_opts(&self) -> Option<IntendedForOpts> {
        self.heuristic.populate_intended_for_opts()
    }

    /// Runs the heuristic and validates the result before handing it back
    /// to the orchestrator: every referenced series id must exist in the
    /// input, and every template must be non-empty. Series the heuristic
    /// filters out are dropped before this point (§4.3).
    pub fn convert(&self, seqinfos: &[SeqInfo]) -> std::result::Result<InfoToDict, HeuristicError> {
        let seqinfos: Vec<SeqInfo> = seqinfos
            .iter()
            .filter(|s| !self.heuristic.filter_dicom(s))
            .cloned()
            .collect();
        let dict = self.heuristic.infotodict(&seqinfos)?;
        let known_ids: std::collections::HashSet<&str> =
            seqinfos.iter().map(|s| s.series_id.as_str()).collect();
        for (key, series_ids) in &dict {
            if key.template.trim().is_empty() {
                return Err(HeuristicError::EmptyTemplate);
            }
            for id in series_ids {
                if !known_ids.contains(id.as_str()) {
                    return Err(HeuristicError::UnknownSeriesId(id.clone()));
                }
            }
        }
        Ok(dict)
    }
}
