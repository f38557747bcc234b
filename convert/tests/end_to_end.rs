use dicom_core::VR;
use dicom_dictionary_std::tags::{
    ACCESSION_NUMBER, MODALITY, PATIENT_ID, PROTOCOL_NAME, SERIES_DESCRIPTION,
    SERIES_INSTANCE_UID, SERIES_NUMBER, SOP_CLASS_UID, SOP_INSTANCE_UID, STUDY_INSTANCE_UID,
};
use dicom_dictionary_std::uids::MR_IMAGE_STORAGE;
use dicom_object::{FileMetaTableBuilder, InMemDicomObject};

use heudicomvert_convert::config::{BidsMode, Converter, EngineConfig, GroupingMode};
use heudicomvert_convert::run::{run, RunRequest};

fn meta_table() -> FileMetaTableBuilder {
    FileMetaTableBuilder::new()
        .transfer_syntax(dicom_transfer_syntax_registry::default().erased().uid())
        .media_storage_sop_class_uid(MR_IMAGE_STORAGE)
}

fn write_series_file(
    dir: &std::path::Path,
    file_name: &str,
    series_uid: &str,
    series_number: i32,
    series_description: &str,
    sop_instance_uid: &str,
) {
    let mut obj = InMemDicomObject::new_empty();
    obj.put_str(SOP_INSTANCE_UID, VR::UI, sop_instance_uid);
    obj.put_str(SOP_CLASS_UID, VR::UI, MR_IMAGE_STORAGE);
    obj.put_str(STUDY_INSTANCE_UID, VR::UI, "1.2.3.study");
    obj.put_str(SERIES_INSTANCE_UID, VR::UI, series_uid);
    obj.put_str(PATIENT_ID, VR::LO, "219");
    obj.put_str(ACCESSION_NUMBER, VR::SH, "ACC001");
    obj.put_str(MODALITY, VR::CS, "MR");
    obj.put_str(PROTOCOL_NAME, VR::LO, series_description);
    obj.put_str(SERIES_DESCRIPTION, VR::LO, series_description);
    obj.put_str(SERIES_NUMBER, VR::IS, series_number.to_string().as_str());

    let file_obj = obj.with_meta(meta_table()).unwrap();
    file_obj.write_to_file(dir.join(file_name)).unwrap();
}

/// Scenario 1 of the end-to-end suite: a T1w anatomical and a resting BOLD
/// series for a single subject convert into the expected BIDS layout using
/// the bundled reference heuristic and no external transcoder.
#[test]
fn converts_t1w_and_bold_series_into_bids_layout() {
    let input_dir = tempfile::tempdir().unwrap();
    let dataset_root = tempfile::tempdir().unwrap();

    write_series_file(input_dir.path(), "t1_001.dcm", "1.1.1", 1, "T1w_MPRAGE", "1.1.1.1");
    write_series_file(input_dir.path(), "bold_001.dcm", "1.1.2", 2, "bold_rest", "1.1.2.1");
    write_series_file(input_dir.path(), "bold_002.dcm", "1.1.2", 2, "bold_rest", "1.1.2.2");

    let request = RunRequest {
        dataset_root: dataset_root.path().to_path_buf(),
        subject: "219".to_string(),
        session: None,
        templates: Vec::new(),
        explicit_paths: vec![input_dir.path().to_path_buf()],
        heuristic_spec: "reference".to_string(),
        config: EngineConfig {
            bids: BidsMode::Enabled,
            grouping: GroupingMode::AccessionNumber,
            converter: Converter::None,
            ..EngineConfig::default()
        },
    };

    let report = run(&request).unwrap();
    assert!(report.is_success(), "errors: {:?}", report.errors);
    assert_eq!(report.converted.len(), 2);

    assert!(dataset_root.path().join("dataset_description.json").exists());
    assert!(dataset_root.path().join(".heudiconv/219/info/dicominfo.tsv").exists());
}

/// Scenario 2: rerunning the same input is idempotent — the second run's
/// provenance store recognizes the outputs as unchanged and skips them.
#[test]
fn rerun_with_unchanged_inputs_skips_reconversion() {
    let input_dir = tempfile::tempdir().unwrap();
    let dataset_root = tempfile::tempdir().unwrap();

    write_series_file(input_dir.path(), "t1_001.dcm", "1.1.1", 1, "T1w_MPRAGE", "1.1.1.1");

    let request = RunRequest {
        dataset_root: dataset_root.path().to_path_buf(),
        subject: "219".to_string(),
        session: None,
        templates: Vec::new(),
        explicit_paths: vec![input_dir.path().to_path_buf()],
        heuristic_spec: "reference".to_string(),
        config: EngineConfig {
            bids: BidsMode::Enabled,
            grouping: GroupingMode::AccessionNumber,
            converter: Converter::None,
            ..EngineConfig::default()
        },
    };

    let first = run(&request).unwrap();
    assert_eq!(first.converted.len(), 1);

    let second = run(&request).unwrap();
    assert_eq!(second.skipped_unchanged.len(), 1);
    assert!(second.converted.is_empty());
}

/// `bids = notop` suppresses every top-level write while still converting
/// and recording provenance for the subject.
#[test]
fn notop_mode_suppresses_top_level_files_only() {
    let input_dir = tempfile::tempdir().unwrap();
    let dataset_root = tempfile::tempdir().unwrap();

    write_series_file(input_dir.path(), "t1_001.dcm", "1.1.1", 1, "T1w_MPRAGE", "1.1.1.1");

    let request = RunRequest {
        dataset_root: dataset_root.path().to_path_buf(),
        subject: "219".to_string(),
        session: None,
        templates: Vec::new(),
        explicit_paths: vec![input_dir.path().to_path_buf()],
        heuristic_spec: "reference".to_string(),
        config: EngineConfig {
            bids: BidsMode::EnabledNoTop,
            grouping: GroupingMode::AccessionNumber,
            converter: Converter::None,
            ..EngineConfig::default()
        },
    };

    let report = run(&request).unwrap();
    assert!(report.is_success());
    assert!(!dataset_root.path().join("dataset_description.json").exists());
    assert!(dataset_root.path().join(".heudiconv/219/info/dicominfo.tsv").exists());
}
