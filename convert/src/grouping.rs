use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;
use tracing::{debug, warn};

use crate::config::GroupingMode;
use crate::error::{Error, Result, StudyConsistencyError};
use crate::heuristic::GroupingSpec;
use crate::seqinfo::SeqInfo;

/// One discovered DICOM file together with the header fields needed to
/// group it into a series, read once and kept around for the rest of the
/// pipeline instead of reopened per pass.
#[derive(Clone, Debug)]
pub struct DicomHeader {
    pub path: PathBuf,
    pub patient_id: String,
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub accession_number: String,
    pub series_number: i32,
    pub series_description: String,
    pub protocol_name: String,
    pub study_description: String,
    pub referring_physician_name: String,
    pub image_type: Vec<String>,
    pub patient_age: String,
    pub patient_sex: String,
    pub study_date: String,
    pub series_time: String,
    pub acquisition_date: String,
    pub acquisition_time: String,
    pub content_date: String,
    pub content_time: String,
    pub rows: u32,
    pub columns: u32,
    pub number_of_frames: u32,
    pub repetition_time: f64,
    pub echo_time: f64,
    pub echo_number: i32,
    pub shim_setting: Vec<f64>,
    pub is_derived: bool,
}

fn string_at(obj: &InMemDicomObject, tag: dicom_core::Tag) -> String {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_str().ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn float_at(obj: &InMemDicomObject, tag: dicom_core::Tag) -> f64 {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_float64().ok())
        .unwrap_or(f64::NAN)
}

fn int_at(obj: &InMemDicomObject, tag: dicom_core::Tag) -> i32 {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_int::<i32>().ok())
        .unwrap_or_default()
}

fn uint_at(obj: &InMemDicomObject, tag: dicom_core::Tag) -> u32 {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_int::<u32>().ok())
        .unwrap_or_default()
}

fn floats_at(obj: &InMemDicomObject, tag: dicom_core::Tag) -> Vec<f64> {
    let raw = string_at(obj, tag);
    if raw.is_empty() {
        Vec::new()
    } else {
        raw.split('\\').filter_map(|v| v.trim().parse::<f64>().ok()).collect()
    }
}

/// Reads one file's headers, stopping before pixel data, and extracts the
/// fields the rest of the pipeline needs (C2).
pub fn read_header(path: &Path) -> Result<DicomHeader> {
    let obj = heudicomvert_common::dicom::open_until_pixel_data(path)
        .map_err(Error::DicomRead)?;

    let image_type_raw = string_at(&obj, tags::IMAGE_TYPE);
    let image_type = if image_type_raw.is_empty() {
        Vec::new()
    } else {
        image_type_raw.split('\\').map(str::to_string).collect()
    };
    let is_derived = image_type
        .iter()
        .any(|v| v.eq_ignore_ascii_case("DERIVED"));

    Ok(DicomHeader {
        path: path.to_path_buf(),
        patient_id: string_at(&obj, tags::PATIENT_ID),
        study_instance_uid: string_at(&obj, tags::STUDY_INSTANCE_UID),
        series_instance_uid: string_at(&obj, tags::SERIES_INSTANCE_UID),
        accession_number: string_at(&obj, tags::ACCESSION_NUMBER),
        series_number: int_at(&obj, tags::SERIES_NUMBER),
        series_description: string_at(&obj, tags::SERIES_DESCRIPTION),
        protocol_name: string_at(&obj, tags::PROTOCOL_NAME),
        study_description: string_at(&obj, tags::STUDY_DESCRIPTION),
        referring_physician_name: string_at(&obj, tags::REFERRING_PHYSICIAN_NAME),
        image_type,
        patient_age: string_at(&obj, tags::PATIENT_AGE),
        patient_sex: string_at(&obj, tags::PATIENT_SEX),
        study_date: string_at(&obj, tags::STUDY_DATE),
        series_time: string_at(&obj, tags::SERIES_TIME),
        acquisition_date: string_at(&obj, tags::ACQUISITION_DATE),
        acquisition_time: string_at(&obj, tags::ACQUISITION_TIME),
        content_date: string_at(&obj, tags::CONTENT_DATE),
        content_time: string_at(&obj, tags::CONTENT_TIME),
        rows: uint_at(&obj, tags::ROWS),
        columns: uint_at(&obj, tags::COLUMNS),
        number_of_frames: uint_at(&obj, tags::NUMBER_OF_FRAMES).max(1),
        repetition_time: float_at(&obj, tags::REPETITION_TIME),
        echo_time: float_at(&obj, tags::ECHO_TIME),
        echo_number: int_at(&obj, tags::ECHO_NUMBERS),
        shim_setting: floats_at(&obj, tags::SHIM_SETTING),
        is_derived,
    })
}

/// Resolves the best-available acquisition timestamp for a header, falling
/// back from `AcquisitionDate`/`AcquisitionTime` to `ContentDate`/`ContentTime`
/// (§4.5, §4.6).
pub fn acquisition_datetime(header: &DicomHeader) -> Option<chrono::NaiveDateTime> {
    parse_date_time(&header.acquisition_date, &header.acquisition_time)
        .or_else(|| parse_date_time(&header.content_date, &header.content_time))
}

fn parse_date_time(date: &str, time: &str) -> Option<chrono::NaiveDateTime> {
    if date.is_empty() || time.is_empty() {
        return None;
    }
    let date = chrono::NaiveDate::parse_from_str(date, "%Y%m%d").ok()?;
    let hms = time.split('.').next().unwrap_or(time);
    if hms.len() < 6 {
        return None;
    }
    let time = chrono::NaiveTime::parse_from_str(&hms[..6], "%H%M%S").ok()?;
    Some(chrono::NaiveDateTime::new(date, time))
}

/// Renders the `scans.tsv` `acq_time` column, preserving sub-second
/// precision from the source field, with `AcquisitionDate/Time` preferred
/// over `ContentDate/Time` and `"n/a"` when neither is usable (§4.5, §8).
pub fn acq_time_field(header: &DicomHeader) -> String {
    let (date, time) = if !header.acquisition_date.is_empty() && !header.acquisition_time.is_empty() {
        (header.acquisition_date.as_str(), header.acquisition_time.as_str())
    } else if !header.content_date.is_empty() && !header.content_time.is_empty() {
        (header.content_date.as_str(), header.content_time.as_str())
    } else {
        return "n/a".to_string();
    };
    format_iso(date, time).unwrap_or_else(|| "n/a".to_string())
}

fn format_iso(date: &str, time: &str) -> Option<String> {
    let parsed_date = chrono::NaiveDate::parse_from_str(date, "%Y%m%d").ok()?;
    let (hms, frac) = match time.split_once('.') {
        Some((h, f)) => (h, Some(f)),
        None => (time, None),
    };
    if hms.len() < 6 {
        return None;
    }
    let parsed_time = chrono::NaiveTime::parse_from_str(&hms[..6], "%H%M%S").ok()?;
    let stamp = chrono::NaiveDateTime::new(parsed_date, parsed_time);
    match frac {
        Some(f) if !f.is_empty() => Some(format!("{}.{}", stamp.format("%Y-%m-%dT%H:%M:%S"), f)),
        _ => Some(stamp.format("%Y-%m-%dT%H:%M:%S").to_string()),
    }
}

/// The grouping key distinguishing one "study" from another while scanning
/// a single (subject, session) worth of files (§4.2).
fn grouping_key(mode: GroupingMode, header: &DicomHeader, spec: Option<&GroupingSpec>) -> String {
    match mode {
        GroupingMode::AccessionNumber => header.accession_number.clone(),
        GroupingMode::StudyUid => header.study_instance_uid.clone(),
        GroupingMode::All => String::from("*"),
        GroupingMode::Custom => match spec {
            Some(GroupingSpec::Attribute(name)) => header_attribute(header, name),
            None => String::from("*"),
        },
    }
}

/// Looks up a named DICOM attribute on an already-read header for
/// `GroupingMode::Custom` (§4.2, §4.3). Unknown attribute names fall back to
/// a single catch-all group rather than erroring out mid-discovery.
fn header_attribute(header: &DicomHeader, name: &str) -> String {
    match name.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
        "accessionnumber" => header.accession_number.clone(),
        "studyinstanceuid" => header.study_instance_uid.clone(),
        "patientid" => header.patient_id.clone(),
        "seriesdescription" => header.series_description.clone(),
        "protocolname" => header.protocol_name.clone(),
        "studydescription" => header.study_description.clone(),
        other => {
            warn!("Unknown custom grouping attribute '{other}', using a single catch-all group");
            String::from("*")
        }
    }
}

/// A series of headers sharing one SeriesInstanceUID, plus the derived
/// `seqinfo` row summarizing it.
#[derive(Clone, Debug)]
pub struct Series {
    pub series_instance_uid: String,
    pub headers: Vec<DicomHeader>,
    pub seqinfo: SeqInfo,
}

/// Groups headers by accession number / study UID / globally, verifying
/// subject and study-UID consistency within each group, then splits each
/// group into per-series buckets ordered by series number (§4.2).
pub fn group(
    mode: GroupingMode,
    expected_subject: &str,
    headers: Vec<DicomHeader>,
    grouping_spec: Option<&GroupingSpec>,
) -> Result<Vec<Series>> {
    let mut by_group: BTreeMap<String, Vec<DicomHeader>> = BTreeMap::new();
    for header in headers {
        let key = grouping_key(mode, &header, grouping_spec);
        by_group.entry(key).or_default().push(header);
    }

    let mut all_series = Vec::new();
    for (_key, group_headers) in by_group {
        verify_consistency(expected_subject, &group_headers)?;
        all_series.extend(split_into_series(group_headers));
    }
    all_series.sort_by_key(|s| s.headers.first().map(|h| h.series_number).unwrap_or(i32::MAX));
    Ok(all_series)
}

fn verify_consistency(expected_subject: &str, headers: &[DicomHeader]) -> Result<()> {
    let mut expected_study_uid: Option<String> = None;
    for header in headers {
        if !expected_subject.is_empty() && header.patient_id != expected_subject {
            warn!(
                "PatientID {} does not match expected subject {} for {}",
                header.patient_id,
                expected_subject,
                header.path.display()
            );
        }
        match &expected_study_uid {
            None => expected_study_uid = Some(header.study_instance_uid.clone()),
            Some(expected) if expected != &header.study_instance_uid => {
                return Err(StudyConsistencyError::ConflictingStudyUid {
                    expected: expected.clone(),
                    found: header.study_instance_uid.clone(),
                }
                .into());
            }
            _ => {}
        }
    }
    Ok(())
}

fn split_into_series(headers: Vec<DicomHeader>) -> Vec<Series> {
    let mut by_series: BTreeMap<String, Vec<DicomHeader>> = BTreeMap::new();
    for header in headers {
        by_series
            .entry(header.series_instance_uid.clone())
            .or_default()
            .push(header);
    }

    by_series
        .into_iter()
        .map(|(uid, mut headers)| {
            headers.sort_by(|a, b| a.path.cmp(&b.path));
            let seqinfo = build_seqinfo(&headers);
            debug!(
                "Grouped series {} ({} files)",
                seqinfo.series_id,
                headers.len()
            );
            Series { series_instance_uid: uid, headers, seqinfo }
        })
        .collect()
}

fn build_seqinfo(headers: &[DicomHeader]) -> SeqInfo {
    let first = &headers[0];
    let dcm_dir_name = first
        .path
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();
    SeqInfo {
        total_files_till_now: headers.len(),
        example_dcm_file: first.path.clone(),
        series_id: format!("{:05}-{}", first.series_number, first.series_description),
        dcm_dir_name,
        unspecified2: String::new(),
        unspecified3: String::new(),
        dim1: first.rows,
        dim2: first.columns,
        dim3: headers.len() as u32,
        dim4: first.number_of_frames,
        tr: first.repetition_time,
        te: first.echo_time,
        protocol_name: first.protocol_name.clone(),
        is_motion_corrected: first.series_description.to_ascii_lowercase().contains("moco"),
        is_derived: first.is_derived,
        patient_id: first.patient_id.clone(),
        study_description: first.study_description.clone(),
        referring_physician_name: first.referring_physician_name.clone(),
        series_description: first.series_description.clone(),
        image_type: first.image_type.clone(),
        accession_number: first.accession_number.clone(),
        patient_age: first.patient_age.clone(),
        patient_sex: first.patient_sex.clone(),
        date: first.study_date.clone(),
        series_uid: first.series_instance_uid.clone(),
        time: first.series_time.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(series_uid: &str, series_number: i32, patient_id: &str, study_uid: &str) -> DicomHeader {
        DicomHeader {
            path: PathBuf::from(format!("/data/{series_uid}/1.dcm")),
            patient_id: patient_id.to_string(),
            study_instance_uid: study_uid.to_string(),
            series_instance_uid: series_uid.to_string(),
            accession_number: "ACC1".to_string(),
            series_number,
            series_description: "bold_task".to_string(),
            protocol_name: "bold_task".to_string(),
            study_description: "study".to_string(),
            referring_physician_name: String::new(),
            image_type: vec!["ORIGINAL".to_string(), "PRIMARY".to_string()],
            patient_age: "030Y".to_string(),
            patient_sex: "F".to_string(),
            study_date: "20240101".to_string(),
            series_time: "120000".to_string(),
            acquisition_date: "20240101".to_string(),
            acquisition_time: "120000".to_string(),
            content_date: "20240101".to_string(),
            content_time: "120000".to_string(),
            rows: 64,
            columns: 64,
            number_of_frames: 1,
            repetition_time: 2.0,
            echo_time: 30.0,
            echo_number: 1,
            shim_setting: Vec::new(),
            is_derived: false,
        }
    }

    #[test]
    fn groups_by_series_and_orders_by_series_number() {
        let headers = vec![
            header("1.2.3", 3, "sub-01", "1.1"),
            header("1.2.4", 1, "sub-01", "1.1"),
        ];
        let series = group(GroupingMode::AccessionNumber, "sub-01", headers, None).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].headers[0].series_number, 1);
        assert_eq!(series[1].headers[0].series_number, 3);
    }

    #[test]
    fn conflicting_study_uid_within_a_group_is_an_error() {
        let headers = vec![
            header("1.2.3", 1, "sub-01", "1.1"),
            header("1.2.3", 1, "sub-01", "1.2"),
        ];
        let err = group(GroupingMode::AccessionNumber, "sub-01", headers, None).unwrap_err();
        assert!(matches!(
            err,
            Error::StudyConsistency(StudyConsistencyError::ConflictingStudyUid { .. })
        ));
    }

    #[test]
    fn custom_grouping_delegates_to_the_named_attribute() {
        let mut a = header("1.2.3", 1, "sub-01", "1.1");
        a.series_description = "siteA".to_string();
        let mut b = header("1.2.4", 2, "sub-01", "1.1");
        b.series_description = "siteB".to_string();
        let spec = GroupingSpec::Attribute("series_description".to_string());
        let series = group(GroupingMode::Custom, "sub-01", vec![a, b], Some(&spec)).unwrap();
        assert_eq!(series.len(), 2);
    }
}
