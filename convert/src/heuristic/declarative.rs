use std::path::Path;

use regex::Regex;
use serde::Deserialize;

use super::{ConversionKey, GroupingSpec, Heuristic, InfoToDict, OutKind};
use crate::error::HeuristicError;
use crate::seqinfo::SeqInfo;

/// A TOML-declared matching rule: the first rule whose filters all match a
/// series wins. Absent filters are treated as wildcards. `*_matches` filters
/// take a regular expression; `*_contains` filters are a plain, case-folded
/// substring check for sites that don't need the extra power.
#[derive(Clone, Debug, Deserialize)]
struct RawRule {
    #[serde(default)]
    protocol_name_contains: Option<String>,
    #[serde(default)]
    protocol_name_matches: Option<String>,
    #[serde(default)]
    series_description_contains: Option<String>,
    template: String,
    #[serde(default = "default_out_kind")]
    out_kind: OutKind,
}

fn default_out_kind() -> OutKind {
    OutKind::NiiGz
}

#[derive(Clone, Debug, Deserialize)]
struct RuleFile {
    /// DICOM attribute name to partition on under `grouping = custom` (§4.2).
    #[serde(default)]
    grouping_attribute: Option<String>,
    #[serde(rename = "rule", default)]
    rules: Vec<RawRule>,
}

struct Rule {
    protocol_name_contains: Option<String>,
    protocol_name_matches: Option<Regex>,
    series_description_contains: Option<String>,
    template: String,
    out_kind: OutKind,
}

impl Rule {
    fn compile(raw: RawRule) -> std::result::Result<Self, HeuristicError> {
        let protocol_name_matches = raw
            .protocol_name_matches
            .as_deref()
            .map(Regex::new)
            .transpose()?;
        Ok(Self {
            protocol_name_contains: raw.protocol_name_contains,
            protocol_name_matches,
            series_description_contains: raw.series_description_contains,
            template: raw.template,
            out_kind: raw.out_kind,
        })
    }

    fn matches(&self, s: &SeqInfo) -> bool {
        let protocol_contains_ok = self.protocol_name_contains.as_ref().is_none_or(|needle| {
            s.protocol_name.to_ascii_lowercase().contains(&needle.to_ascii_lowercase())
        });
        let protocol_matches_ok = self
            .protocol_name_matches
            .as_ref()
            .is_none_or(|re| re.is_match(&s.protocol_name));
        let description_ok = self.series_description_contains.as_ref().is_none_or(|needle| {
            s.series_description
                .to_ascii_lowercase()
                .contains(&needle.to_ascii_lowercase())
        });
        protocol_contains_ok && protocol_matches_ok && description_ok
    }
}

/// A heuristic driven entirely by a user-supplied TOML rule file instead of
/// compiled Rust, for sites whose naming conventions aren't covered by the
/// bundled [`super::ReferenceHeuristic`] (§4.3, §9).
pub struct DeclarativeHeuristic {
    name: String,
    rules: Vec<Rule>,
    grouping_attribute: Option<String>,
}

impl DeclarativeHeuristic {
    pub fn load(path: &Path) -> std::result::Result<Self, HeuristicError> {
        let text = std::fs::read_to_string(path)?;
        let file: RuleFile = toml::from_str(&text)?;
        let rules = file
            .rules
            .into_iter()
            .map(Rule::compile)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self {
            name: path.display().to_string(),
            rules,
            grouping_attribute: file.grouping_attribute,
        })
    }
}

impl Heuristic for DeclarativeHeuristic {
    fn name(&self) -> &str {
        &self.name
    }

    fn infotodict(&self, seqinfos: &[SeqInfo]) -> std::result::Result<InfoToDict, HeuristicError> {
        let mut dict: InfoToDict = InfoToDict::new();
        for s in seqinfos {
            let Some(rule) = self.rules.iter().find(|r| r.matches(s)) else {
                continue;
            };
            dict.entry(ConversionKey { template: rule.template.clone(), out_kind: rule.out_kind })
                .or_default()
                .push(s.series_id.clone());
        }
        Ok(dict)
    }

    fn grouping(&self) -> Option<GroupingSpec> {
        self.grouping_attribute.clone().map(GroupingSpec::Attribute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(series_id: &str, protocol_name: &str, series_description: &str) -> SeqInfo {
        SeqInfo {
            total_files_till_now: 1,
            example_dcm_file: "/data/1.dcm".into(),
            series_id: series_id.to_string(),
            dcm_dir_name: "dir".to_string(),
            unspecified2: String::new(),
            unspecified3: String::new(),
            dim1: 64,
            dim2: 64,
            dim3: 32,
            dim4: 1,
            tr: 2.0,
            te: 30.0,
            protocol_name: protocol_name.to_string(),
            is_motion_corrected: false,
            is_derived: false,
            patient_id: "sub-01".to_string(),
            study_description: "study".to_string(),
            referring_physician_name: String::new(),
            series_description: series_description.to_string(),
            image_type: vec!["ORIGINAL".to_string()],
            accession_number: "ACC1".to_string(),
            patient_age: "030Y".to_string(),
            patient_sex: "F".to_string(),
            date: "20240101".to_string(),
            series_uid: "1.2.3".to_string(),
            time: "120000".to_string(),
        }
    }

    #[test]
    fn loads_and_matches_a_rule_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heuristic.toml");
        std::fs::write(
            &path,
            r#"
            [[rule]]
            protocol_name_contains = "siemens_custom_bold"
            template = "sub-{subject}/{session}func/sub-{subject}_{session}task-custom_bold"
            out_kind = "nii_gz"
            "#,
        )
        .unwrap();
        let heuristic = DeclarativeHeuristic::load(&path).unwrap();
        let dict = heuristic
            .infotodict(&[sample("1", "siemens_custom_bold", "whatever")])
            .unwrap();
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn regex_filter_matches_a_protocol_naming_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heuristic.toml");
        std::fs::write(
            &path,
            r#"
            [[rule]]
            protocol_name_matches = "^ep2d_.*_p[23]$"
            template = "sub-{subject}/{session}dwi/sub-{subject}_{session}dwi"
            "#,
        )
        .unwrap();
        let heuristic = DeclarativeHeuristic::load(&path).unwrap();
        let matching = heuristic.infotodict(&[sample("1", "ep2d_diff_mddw_p2", "whatever")]).unwrap();
        assert_eq!(matching.len(), 1);
        let non_matching = heuristic.infotodict(&[sample("1", "ep2d_diff_mddw_p4", "whatever")]).unwrap();
        assert!(non_matching.is_empty());
    }

    #[test]
    fn invalid_regex_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heuristic.toml");
        std::fs::write(
            &path,
            r#"
            [[rule]]
            protocol_name_matches = "("
            template = "whatever"
            "#,
        )
        .unwrap();
        assert!(DeclarativeHeuristic::load(&path).is_err());
    }

    #[test]
    fn unmatched_series_are_skipped_rather_than_erroring() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heuristic.toml");
        std::fs::write(&path, "").unwrap();
        let heuristic = DeclarativeHeuristic::load(&path).unwrap();
        let dict = heuristic.infotodict(&[sample("1", "anything", "anything")]).unwrap();
        assert!(dict.is_empty());
    }
}
