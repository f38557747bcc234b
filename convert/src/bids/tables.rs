use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One row of a subject's `scans.tsv` (§4.7).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanRow {
    pub filename: String,
    pub acq_time: String,
    pub operator: String,
    pub randstr: String,
}

/// One row of the top-level `participants.tsv` (§4.7).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRow {
    pub participant_id: String,
    pub age: String,
    pub sex: String,
    pub group: String,
}

/// Converts a DICOM age string (`NNNY`/`NNNM`/`NNNW`/`NNND`) into decimal
/// years with two-decimal precision, e.g. `18M` → `1.50` (§4.5, §8).
pub fn parse_age_years(raw: &str) -> String {
    let raw = raw.trim();
    if raw.len() < 2 {
        return "n/a".to_string();
    }
    let (value, unit) = raw.split_at(raw.len() - 1);
    let Ok(value) = value.parse::<f64>() else {
        return "n/a".to_string();
    };
    let years = match unit.to_ascii_uppercase().as_str() {
        "Y" => value,
        "M" => value / 12.0,
        "W" => value * 7.0 / 365.25,
        "D" => value / 365.25,
        _ => return "n/a".to_string(),
    };
    format!("{years:.2}")
}

/// Appends to (or creates) `scans.tsv`, skipping rows whose filename is
/// already present so reruns never duplicate an entry, then sorts by
/// `acq_time` ascending (missing timestamps last, ties by filename) (§4.5).
pub fn append_scans(path: &Path, rows: &[ScanRow]) -> Result<()> {
    let mut existing = if path.exists() { read_scans(path)? } else { Vec::new() };
    let known: std::collections::HashSet<String> =
        existing.iter().map(|r| r.filename.clone()).collect();
    for row in rows {
        if !known.contains(row.filename.as_str()) {
            existing.push(row.clone());
        }
    }
    existing.sort_by(|a, b| {
        let key = |r: &ScanRow| (r.acq_time == "n/a", r.acq_time.clone(), r.filename.clone());
        key(a).cmp(&key(b))
    });
    write_rows(path, &existing)
}

pub fn read_scans(path: &Path) -> Result<Vec<ScanRow>> {
    read_rows(path)
}

/// Merges one participant row into `participants.tsv`, replacing any
/// existing row for the same `participant_id` (subjects may be rerun).
pub fn upsert_participant(path: &Path, row: ParticipantRow) -> Result<()> {
    let mut rows: Vec<ParticipantRow> = if path.exists() { read_rows(path)? } else { Vec::new() };
    match rows.iter_mut().find(|r| r.participant_id == row.participant_id) {
        Some(existing) => *existing = row,
        None => rows.push(row),
    }
    write_rows(path, &rows)
}

fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn read_rows<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_path(path)?;
    let mut out = Vec::new();
    for record in reader.deserialize() {
        out.push(record?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_row(filename: &str, acq_time: &str) -> ScanRow {
        ScanRow {
            filename: filename.to_string(),
            acq_time: acq_time.to_string(),
            operator: "n/a".to_string(),
            randstr: "abc123".to_string(),
        }
    }

    #[test]
    fn appending_scans_twice_does_not_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scans.tsv");
        let row = scan_row("func/sub-01_task-rest_bold.nii.gz", "2024-01-01T12:00:00");
        append_scans(&path, &[row.clone()]).unwrap();
        append_scans(&path, &[row]).unwrap();
        assert_eq!(read_scans(&path).unwrap().len(), 1);
    }

    #[test]
    fn scans_are_sorted_by_acq_time_with_missing_values_last() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scans.tsv");
        let rows = vec![
            scan_row("anat/sub-01_T1w.nii.gz", "n/a"),
            scan_row("func/sub-01_task-rest_bold.nii.gz", "2024-01-01T09:00:00"),
            scan_row("fmap/sub-01_epi.nii.gz", "2024-01-01T08:00:00"),
        ];
        append_scans(&path, &rows).unwrap();
        let sorted = read_scans(&path).unwrap();
        assert_eq!(
            sorted.iter().map(|r| r.filename.as_str()).collect::<Vec<_>>(),
            vec![
                "fmap/sub-01_epi.nii.gz",
                "func/sub-01_task-rest_bold.nii.gz",
                "anat/sub-01_T1w.nii.gz",
            ]
        );
    }

    #[test]
    fn upserting_a_participant_replaces_the_existing_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("participants.tsv");
        upsert_participant(
            &path,
            ParticipantRow { participant_id: "sub-01".to_string(), age: "30".to_string(), sex: "F".to_string(), group: "n/a".to_string() },
        )
        .unwrap();
        upsert_participant(
            &path,
            ParticipantRow { participant_id: "sub-01".to_string(), age: "31".to_string(), sex: "F".to_string(), group: "n/a".to_string() },
        )
        .unwrap();
        let rows: Vec<ParticipantRow> = read_rows(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].age, "31");
    }

    #[test]
    fn parses_dicom_age_strings_into_decimal_years() {
        assert_eq!(parse_age_years("030Y"), "30.00");
        assert_eq!(parse_age_years("018M"), "1.50");
        assert_eq!(parse_age_years(""), "n/a");
        assert_eq!(parse_age_years("X"), "n/a");
    }
}
