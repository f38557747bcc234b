use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One record per acquired series, in the canonical column order persisted
/// to `dicominfo.tsv`. Field order here is load-bearing: it is the on-disk
/// TSV column order, not merely struct layout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeqInfo {
    pub total_files_till_now: usize,
    pub example_dcm_file: PathBuf,
    pub series_id: String,
    pub dcm_dir_name: String,
    pub unspecified2: String,
    pub unspecified3: String,
    pub dim1: u32,
    pub dim2: u32,
    pub dim3: u32,
    pub dim4: u32,
    #[serde(rename = "TR")]
    pub tr: f64,
    #[serde(rename = "TE")]
    pub te: f64,
    pub protocol_name: String,
    pub is_motion_corrected: bool,
    pub is_derived: bool,
    pub patient_id: String,
    pub study_description: String,
    pub referring_physician_name: String,
    pub series_description: String,
    #[serde(with = "image_type_tsv")]
    pub image_type: Vec<String>,
    pub accession_number: String,
    pub patient_age: String,
    pub patient_sex: String,
    pub date: String,
    pub series_uid: String,
    pub time: String,
}

/// DICOM's own multi-valued-string separator, reused to flatten `image_type`
/// into a single TSV field.
const MULTI_VALUE_SEP: char = '\\';

mod image_type_tsv {
    use super::MULTI_VALUE_SEP;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[String], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.join(&MULTI_VALUE_SEP.to_string()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        let raw = String::deserialize(d)?;
        if raw.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(raw.split(MULTI_VALUE_SEP).map(str::to_string).collect())
        }
    }
}

impl SeqInfo {
    /// Orders echoes (or any SeqInfo slice) so that `NaN` sorts last,
    /// matching the spec requirement that missing TE/echo values still
    /// produce a total order for the magnitude1/magnitude2 split.
    pub fn echo_sort_key(&self) -> f64 {
        if self.te.is_nan() { f64::INFINITY } else { self.te }
    }
}

/// Writes `seqinfos` to a tab-separated file in the canonical column order.
pub fn write_tsv<P: AsRef<Path>>(seqinfos: &[SeqInfo], path: P) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)?;
    for s in seqinfos {
        writer.serialize(s)?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads a previously written `dicominfo.tsv` back into `SeqInfo` records.
pub fn read_tsv<P: AsRef<Path>>(path: P) -> Result<Vec<SeqInfo>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(path)?;
    let mut out = Vec::new();
    for record in reader.deserialize() {
        out.push(record?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(series_id: &str, te: f64) -> SeqInfo {
        SeqInfo {
            total_files_till_now: 1,
            example_dcm_file: PathBuf::from("/data/1.dcm"),
            series_id: series_id.to_string(),
            dcm_dir_name: "dir".to_string(),
            unspecified2: String::new(),
            unspecified3: String::new(),
            dim1: 64,
            dim2: 64,
            dim3: 32,
            dim4: 1,
            tr: 2.5,
            te,
            protocol_name: "proto".to_string(),
            is_motion_corrected: false,
            is_derived: false,
            patient_id: "sub-01".to_string(),
            study_description: "study".to_string(),
            referring_physician_name: String::new(),
            series_description: "series".to_string(),
            image_type: vec!["ORIGINAL".to_string(), "PRIMARY".to_string()],
            accession_number: "ACC1".to_string(),
            patient_age: "030Y".to_string(),
            patient_sex: "F".to_string(),
            date: "20240101".to_string(),
            series_uid: "1.2.3".to_string(),
            time: "120000".to_string(),
        }
    }

    #[test]
    fn round_trips_through_tsv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dicominfo.tsv");
        let records = vec![sample("1", 30.0), sample("2", f64::NAN)];
        write_tsv(&records, &path).unwrap();
        let read_back = read_tsv(&path).unwrap();
        assert_eq!(read_back.len(), 2);
        assert_eq!(read_back[0], records[0]);
        assert_eq!(read_back[1].series_id, "2");
        assert!(read_back[1].te.is_nan());
    }

    #[test]
    fn echo_sort_key_places_nan_last() {
        let mut v = vec![sample("a", f64::NAN), sample("b", 10.0), sample("c", 5.0)];
        v.sort_by(|a, b| {
            a.echo_sort_key()
                .partial_cmp(&b.echo_sort_key())
                .unwrap()
        });
        assert_eq!(
            v.iter().map(|s| s.series_id.as_str()).collect::<Vec<_>>(),
            vec!["c", "b", "a"]
        );
    }
}
