use std::path::Path;

use serde_json::{Map, Value};

use crate::error::{Error, Result, SidecarError};
use crate::grouping::DicomHeader;

/// BIDS-declared metadata keys kept when `minmeta` restricts the sidecar to
/// the documented vocabulary (§4.5).
const MINIMAL_KEYS: &[&str] = &[
    "Modality",
    "MagneticFieldStrength",
    "Manufacturer",
    "ManufacturersModelName",
    "RepetitionTime",
    "EchoTime",
    "FlipAngle",
    "EchoNumber",
    "TaskName",
    "SeriesDescription",
    "ProtocolName",
];

/// Builds the JSON sidecar for a converted series from its DICOM headers.
/// `task_name`, when set, is injected for functional runs (§4.5).
pub fn build(headers: &[DicomHeader], task_name: Option<&str>, minmeta: bool) -> Map<String, Value> {
    let first = &headers[0];
    let mut map = Map::new();
    map.insert("SeriesDescription".into(), Value::String(first.series_description.clone()));
    map.insert("ProtocolName".into(), Value::String(first.protocol_name.clone()));
    if first.repetition_time.is_finite() {
        map.insert("RepetitionTime".into(), json_number(first.repetition_time / 1000.0));
    }
    if first.echo_time.is_finite() {
        map.insert("EchoTime".into(), json_number(first.echo_time / 1000.0));
    }
    if first.echo_number > 0 {
        map.insert("EchoNumber".into(), Value::from(first.echo_number));
    }
    if let Some(task) = task_name {
        map.insert("TaskName".into(), Value::String(task.to_string()));
    }

    if minmeta {
        map.retain(|k, _| MINIMAL_KEYS.contains(&k.as_str()));
    }
    map
}

fn json_number(value: f64) -> Value {
    serde_json::Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}

/// Injects the `part-mag`/`part-phase` entity pair's matching metadata key
/// so split magnitude/phase outputs carry `EchoTime`/`EchoNumber` correctly.
pub fn with_echo(mut sidecar: Map<String, Value>, echo_number: i32, echo_time_ms: f64) -> Map<String, Value> {
    if echo_number > 0 {
        sidecar.insert("EchoNumber".into(), Value::from(echo_number));
    }
    if echo_time_ms.is_finite() {
        sidecar.insert("EchoTime".into(), json_number(echo_time_ms / 1000.0));
    }
    sidecar
}

/// Writes a sidecar as two-space-indented JSON, then reads it back to
/// confirm the write round-trips faithfully before accepting it (§4.5, §9
/// "finalize" consistency checks reuse this same guarantee).
pub fn write_pretty(path: &Path, sidecar: &Map<String, Value>) -> Result<()> {
    let pretty = serde_json::to_vec_pretty(sidecar)?;
    std::fs::write(path, &pretty).map_err(Error::Io)?;

    let read_back = std::fs::read(path).map_err(|e| {
        Error::Sidecar(SidecarError::ReadBack(path.to_path_buf(), e.to_string()))
    })?;
    let parsed: Value = serde_json::from_slice(&read_back)?;
    let expected = Value::Object(sidecar.clone());
    if parsed != expected {
        return Err(Error::Sidecar(SidecarError::PrettyPrintMismatch(path.to_path_buf())));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> DicomHeader {
        DicomHeader {
            path: "/data/1.dcm".into(),
            patient_id: "sub-01".to_string(),
            study_instance_uid: "1.1".to_string(),
            series_instance_uid: "1.2".to_string(),
            accession_number: "ACC1".to_string(),
            series_number: 1,
            series_description: "bold_rest".to_string(),
            protocol_name: "bold_rest".to_string(),
            study_description: "study".to_string(),
            referring_physician_name: String::new(),
            image_type: vec!["ORIGINAL".to_string()],
            patient_age: "030Y".to_string(),
            patient_sex: "F".to_string(),
            study_date: "20240101".to_string(),
            series_time: "120000".to_string(),
            acquisition_date: "20240101".to_string(),
            acquisition_time: "120000".to_string(),
            content_date: "20240101".to_string(),
            content_time: "120000".to_string(),
            shim_setting: Vec::new(),
            rows: 64,
            columns: 64,
            number_of_frames: 1,
            repetition_time: 2000.0,
            echo_time: 30.0,
            echo_number: 1,
            is_derived: false,
        }
    }

    #[test]
    fn converts_milliseconds_to_seconds() {
        let sidecar = build(&[header()], Some("rest"), false);
        assert_eq!(sidecar.get("RepetitionTime").unwrap().as_f64().unwrap(), 2.0);
        assert_eq!(sidecar.get("EchoTime").unwrap().as_f64().unwrap(), 0.03);
        assert_eq!(sidecar.get("TaskName").unwrap().as_str().unwrap(), "rest");
    }

    #[test]
    fn minmeta_restricts_to_the_documented_vocabulary() {
        let sidecar = build(&[header()], None, true);
        assert!(sidecar.contains_key("RepetitionTime"));
        assert!(!sidecar.contains_key("ProtocolName") || MINIMAL_KEYS.contains(&"ProtocolName"));
    }

    #[test]
    fn write_pretty_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sidecar.json");
        let sidecar = build(&[header()], None, false);
        write_pretty(&path, &sidecar).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with('{'));
    }
}
