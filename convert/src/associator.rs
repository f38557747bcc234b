use std::path::{Path, PathBuf};

use crate::bids::BidsName;
use crate::grouping::{self, Series};

/// How a fieldmap's `IntendedFor` targets are selected (§4.6).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AssociationRule {
    /// Every non-fieldmap image in the session.
    Shims,
    /// Every image sharing the fieldmap's acquisition volume (rows/columns).
    ImagingVolume,
    /// Images whose task/acquisition label matches a fixed label.
    ModalityAcquisitionLabel(String),
    /// A user-supplied predicate over candidate relative paths.
    CustomAcquisitionLabel(Vec<String>),
    /// Always associate with everything, overriding other rules.
    Force,
}

/// Resolves ties between multiple equally-eligible fieldmaps for the same
/// target image: the nearer fieldmap wins, with the lower series number as
/// the tie-break when two fieldmaps are equally near in acquisition time
/// (§9).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Criterion {
    First,
    Closest,
}

/// One fieldmap and the candidate images it might cover.
pub struct FieldmapCandidate<'a> {
    pub fieldmap: &'a Series,
    pub fieldmap_output: PathBuf,
    pub candidates: Vec<(&'a Series, PathBuf)>,
}

/// Computes `IntendedFor` entries for one fieldmap given the rule and
/// tie-break criterion in effect (C6).
pub fn intended_for(
    rule: &AssociationRule,
    criterion: Criterion,
    candidate: &FieldmapCandidate,
    other_fieldmaps: &[&FieldmapCandidate],
) -> Vec<PathBuf> {
    let eligible: Vec<&(&Series, PathBuf)> = candidate
        .candidates
        .iter()
        .filter(|(series, path)| matches_rule(rule, candidate.fieldmap, &candidate.fieldmap_output, series, path))
        .collect();

    eligible
        .into_iter()
        .filter(|(series, _)| owns_target(criterion, candidate, series, other_fieldmaps))
        .map(|(_, path)| path.clone())
        .collect()
}

fn matches_rule(
    rule: &AssociationRule,
    fieldmap: &Series,
    fieldmap_path: &Path,
    target: &Series,
    target_path: &Path,
) -> bool {
    match rule {
        AssociationRule::Force => true,
        AssociationRule::Shims => shims_match(fieldmap, target),
        AssociationRule::ImagingVolume => {
            fieldmap.seqinfo.dim1 == target.seqinfo.dim1 && fieldmap.seqinfo.dim2 == target.seqinfo.dim2
        }
        AssociationRule::ModalityAcquisitionLabel(label) => {
            let target_name = BidsName::parse(stem(target_path));
            modality_matches(label, &dir_name(target_path), &target_name.suffix)
        }
        AssociationRule::CustomAcquisitionLabel(labels) => {
            let Some(fieldmap_acq) = BidsName::parse(stem(fieldmap_path)).get("acq").map(str::to_string) else {
                return false;
            };
            if !labels.is_empty() && !labels.iter().any(|l| l.eq_ignore_ascii_case(&fieldmap_acq)) {
                return false;
            }
            let target_name = BidsName::parse(stem(target_path));
            let target_label = if dir_name(target_path).eq_ignore_ascii_case("func") {
                target_name.get("task")
            } else {
                target_name.get("acq")
            };
            target_label.is_some_and(|t| t.eq_ignore_ascii_case(&fieldmap_acq))
        }
    }
}

/// Compares two headers' `ShimSetting` arrays for an exact match, the
/// marker that two acquisitions shared the same scanner shim state (§4.6).
fn shims_match(fieldmap: &Series, target: &Series) -> bool {
    let a = &fieldmap.headers[0].shim_setting;
    let b = &target.headers[0].shim_setting;
    !a.is_empty() && a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-6)
}

fn modality_matches(label: &str, modality_dir: &str, suffix: &str) -> bool {
    let label = label.to_ascii_lowercase();
    if label == "func" {
        return modality_dir.eq_ignore_ascii_case("func")
            || ["fmri", "bold", "func"].iter().any(|kw| suffix.to_ascii_lowercase().contains(kw));
    }
    modality_dir.eq_ignore_ascii_case(&label) || suffix.eq_ignore_ascii_case(&label)
}

fn stem(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

fn dir_name(path: &Path) -> String {
    path.parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// When more than one fieldmap is eligible for the same target, decides
/// whether `candidate`'s fieldmap is the one that should claim it.
fn owns_target(
    criterion: Criterion,
    candidate: &FieldmapCandidate,
    target: &Series,
    other_fieldmaps: &[&FieldmapCandidate],
) -> bool {
    let competitors: Vec<&&FieldmapCandidate> = other_fieldmaps
        .iter()
        .filter(|other| other.candidates.iter().any(|(s, _)| s.series_instance_uid == target.series_instance_uid))
        .collect();
    if competitors.is_empty() {
        return true;
    }
    match criterion {
        Criterion::First => {
            let min_series_number = std::iter::once(candidate.fieldmap.headers[0].series_number)
                .chain(competitors.iter().map(|c| c.fieldmap.headers[0].series_number))
                .min()
                .unwrap();
            candidate.fieldmap.headers[0].series_number == min_series_number
        }
        Criterion::Closest => {
            let distance = |fieldmap: &Series| acquisition_distance(fieldmap, target);
            let this_distance = distance(candidate.fieldmap);
            let best = competitors
                .iter()
                .map(|c| (distance(c.fieldmap), c.fieldmap.headers[0].series_number))
                .fold((this_distance, candidate.fieldmap.headers[0].series_number), |acc, cur| {
                    if cur.0 < acc.0 || (cur.0 == acc.0 && cur.1 < acc.1) { cur } else { acc }
                });
            best.1 == candidate.fieldmap.headers[0].series_number
        }
    }
}

/// `|acq_time_fmap - acq_time_image|` in milliseconds, falling back to the
/// series-number distance when either acquisition timestamp is unreadable
/// (§4.6, §9).
fn acquisition_distance(fieldmap: &Series, target: &Series) -> f64 {
    match (
        grouping::acquisition_datetime(&fieldmap.headers[0]),
        grouping::acquisition_datetime(&target.headers[0]),
    ) {
        (Some(a), Some(b)) => (a - b).num_milliseconds().unsigned_abs() as f64,
        _ => (fieldmap.headers[0].series_number - target.headers[0].series_number).unsigned_abs() as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seqinfo::SeqInfo;

    fn series(series_uid: &str, series_number: i32, dim1: u32, acq_time: &str) -> Series {
        let seqinfo = SeqInfo {
            total_files_till_now: 1,
            example_dcm_file: "/data/1.dcm".into(),
            series_id: series_uid.to_string(),
            dcm_dir_name: "dir".to_string(),
            unspecified2: String::new(),
            unspecified3: String::new(),
            dim1,
            dim2: dim1,
            dim3: 1,
            dim4: 1,
            tr: 2.0,
            te: 30.0,
            protocol_name: "bold_rest".to_string(),
            is_motion_corrected: false,
            is_derived: false,
            patient_id: "sub-01".to_string(),
            study_description: "study".to_string(),
            referring_physician_name: String::new(),
            series_description: "bold_rest".to_string(),
            image_type: vec!["ORIGINAL".to_string()],
            accession_number: "ACC1".to_string(),
            patient_age: "030Y".to_string(),
            patient_sex: "F".to_string(),
            date: "20240101".to_string(),
            series_uid: series_uid.to_string(),
            time: "120000".to_string(),
        };
        Series {
            series_instance_uid: series_uid.to_string(),
            headers: vec![crate::grouping::DicomHeader {
                path: "/data/1.dcm".into(),
                patient_id: "sub-01".to_string(),
                study_instance_uid: "1.1".to_string(),
                series_instance_uid: series_uid.to_string(),
                accession_number: "ACC1".to_string(),
                series_number,
                series_description: "bold_rest".to_string(),
                protocol_name: "bold_rest".to_string(),
                study_description: "study".to_string(),
                referring_physician_name: String::new(),
                image_type: vec!["ORIGINAL".to_string()],
                patient_age: "030Y".to_string(),
                patient_sex: "F".to_string(),
                study_date: "20240101".to_string(),
                series_time: acq_time.to_string(),
                acquisition_date: "20240101".to_string(),
                acquisition_time: acq_time.to_string(),
                content_date: "20240101".to_string(),
                content_time: acq_time.to_string(),
                rows: dim1,
                columns: dim1,
                number_of_frames: 1,
                repetition_time: 2.0,
                echo_time: 30.0,
                echo_number: 1,
                shim_setting: Vec::new(),
                is_derived: false,
            }],
            seqinfo,
        }
    }

    #[test]
    fn closest_fieldmap_wins_by_acquisition_time_not_series_number() {
        // "near" has the higher series number but its acquisition time is
        // further from the target than "far"'s, so "far" must win.
        let target = series("target", 10, 64, "120000");
        let near = series("near", 9, 64, "090000");
        let far = series("far", 2, 64, "120500");

        let near_candidate = FieldmapCandidate {
            fieldmap: &near,
            fieldmap_output: "fmap/near".into(),
            candidates: vec![(&target, "func/target".into())],
        };
        let far_candidate = FieldmapCandidate {
            fieldmap: &far,
            fieldmap_output: "fmap/far".into(),
            candidates: vec![(&target, "func/target".into())],
        };

        let result_near = intended_for(
            &AssociationRule::Force,
            Criterion::Closest,
            &near_candidate,
            &[&far_candidate],
        );
        assert!(result_near.is_empty());

        let result_far = intended_for(
            &AssociationRule::Force,
            Criterion::Closest,
            &far_candidate,
            &[&near_candidate],
        );
        assert_eq!(result_far, vec![PathBuf::from("func/target")]);
    }

    #[test]
    fn imaging_volume_rule_requires_matching_dimensions() {
        let fieldmap = series("fmap", 5, 64, "120000");
        let matching = series("match", 6, 64, "120000");
        let mismatched = series("mismatch", 7, 32, "120000");
        let candidate = FieldmapCandidate {
            fieldmap: &fieldmap,
            fieldmap_output: "fmap/fmap".into(),
            candidates: vec![(&matching, "func/match".into()), (&mismatched, "func/mismatch".into())],
        };
        let result = intended_for(&AssociationRule::ImagingVolume, Criterion::First, &candidate, &[]);
        assert_eq!(result, vec![PathBuf::from("func/match")]);
    }

    #[test]
    fn shims_rule_requires_identical_shim_settings() {
        let mut fieldmap = series("fmap", 5, 64, "120000");
        fieldmap.headers[0].shim_setting = vec![1.0, 2.0, 3.0];
        let mut matching = series("match", 6, 64, "120000");
        matching.headers[0].shim_setting = vec![1.0, 2.0, 3.0];
        let mut mismatched = series("mismatch", 7, 64, "120000");
        mismatched.headers[0].shim_setting = vec![9.0, 9.0, 9.0];
        let candidate = FieldmapCandidate {
            fieldmap: &fieldmap,
            fieldmap_output: "fmap/fmap".into(),
            candidates: vec![(&matching, "func/match".into()), (&mismatched, "func/mismatch".into())],
        };
        let result = intended_for(&AssociationRule::Shims, Criterion::First, &candidate, &[]);
        assert_eq!(result, vec![PathBuf::from("func/match")]);
    }

    #[test]
    fn modality_acquisition_label_matches_the_rendered_bids_directory() {
        let fieldmap = series("fmap", 5, 64, "120000");
        let func_target = series("func", 6, 64, "120000");
        let anat_target = series("anat", 7, 64, "120000");
        let candidate = FieldmapCandidate {
            fieldmap: &fieldmap,
            fieldmap_output: "fmap/fmap".into(),
            candidates: vec![
                (&func_target, "func/sub-01_task-rest_bold".into()),
                (&anat_target, "anat/sub-01_T1w".into()),
            ],
        };
        let result = intended_for(
            &AssociationRule::ModalityAcquisitionLabel("func".to_string()),
            Criterion::First,
            &candidate,
            &[],
        );
        assert_eq!(result, vec![PathBuf::from("func/sub-01_task-rest_bold")]);
    }

    #[test]
    fn custom_acquisition_label_compares_acq_entity_for_non_func_and_task_for_func() {
        let fieldmap = series("fmap", 5, 64, "120000");
        let func_target = series("func", 6, 64, "120000");
        let anat_target = series("anat", 7, 64, "120000");
        let other_anat = series("other", 8, 64, "120000");
        let candidate = FieldmapCandidate {
            fieldmap: &fieldmap,
            fieldmap_output: "fmap/sub-01_acq-rest_epi".into(),
            candidates: vec![
                (&func_target, "func/sub-01_task-rest_bold".into()),
                (&anat_target, "anat/sub-01_acq-rest_T2w".into()),
                (&other_anat, "anat/sub-01_acq-other_T2w".into()),
            ],
        };
        let result = intended_for(
            &AssociationRule::CustomAcquisitionLabel(Vec::new()),
            Criterion::First,
            &candidate,
            &[],
        );
        assert_eq!(result.len(), 2);
        assert!(result.contains(&PathBuf::from("func/sub-01_task-rest_bold")));
        assert!(result.contains(&PathBuf::from("anat/sub-01_acq-rest_T2w")));
    }
}
