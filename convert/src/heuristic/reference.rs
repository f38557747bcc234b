use super::{ConversionKey, Heuristic, InfoToDict, IntendedForOpts, OutKind};
use crate::associator::{AssociationRule, Criterion};
use crate::error::HeuristicError;
use crate::seqinfo::SeqInfo;

/// The one heuristic bundled with the engine. It recognizes a handful of
/// protocol-name conventions common to the example datasets (anatomical,
/// resting/task BOLD, diffusion, field maps, scout) and otherwise falls the
/// series through to `extra_data/` so nothing discovered is silently
/// dropped. Sites with their own naming conventions are expected to bring a
/// declarative rule file instead (§4.3).
pub struct ReferenceHeuristic;

impl Heuristic for ReferenceHeuristic {
    fn name(&self) -> &str {
        "reference"
    }

    fn infotodict(&self, seqinfos: &[SeqInfo]) -> std::result::Result<InfoToDict, HeuristicError> {
        let mut dict: InfoToDict = InfoToDict::new();
        for s in seqinfos {
            if is_scout(s) {
                continue;
            }
            let (template, out_kind) = classify(s);
            dict.entry(ConversionKey { template, out_kind })
                .or_default()
                .push(s.series_id.clone());
        }
        Ok(dict)
    }

    fn populate_intended_for_opts(&self) -> Option<IntendedForOpts> {
        Some(IntendedForOpts { rule: AssociationRule::Force, criterion: Criterion::Closest })
    }
}

fn is_scout(s: &SeqInfo) -> bool {
    let protocol = s.protocol_name.to_ascii_lowercase();
    protocol.contains("scout") || protocol.contains("localizer")
}

fn classify(s: &SeqInfo) -> (String, OutKind) {
    let protocol = s.protocol_name.to_ascii_lowercase();
    let template = if protocol.contains("dwi") || protocol.contains("dti") {
        "sub-{subject}/{session}dwi/sub-{subject}_{session}dwi".to_string()
    } else if protocol.contains("fieldmap") || protocol.contains("fmap") {
        "sub-{subject}/{session}fmap/sub-{subject}_{session}run-{item}_fieldmap".to_string()
    } else if protocol.contains("t1") {
        "sub-{subject}/{session}anat/sub-{subject}_{session}T1w".to_string()
    } else if protocol.contains("t2") {
        "sub-{subject}/{session}anat/sub-{subject}_{session}T2w".to_string()
    } else if protocol.contains("bold") {
        let task = protocol
            .strip_prefix("bold_")
            .map(str::to_string)
            .unwrap_or_else(|| {
                let stripped = protocol.replace("bold", "");
                let stripped = stripped.trim_matches('_');
                if stripped.is_empty() { "rest".to_string() } else { stripped.to_string() }
            });
        format!("sub-{{subject}}/{{session}}func/sub-{{subject}}_{{session}}task-{task}_run-{{item}}_bold")
    } else {
        format!(
            "sub-{{subject}}/{{session}}extra_data/sub-{{subject}}_{{session}}{}_run-{{item}}",
            sanitize(&s.series_description)
        )
    };
    (template, OutKind::NiiGz)
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}
