use dicom_core::VR;
use dicom_dictionary_std::tags::{
    ACCESSION_NUMBER, MODALITY, PATIENT_ID, PROTOCOL_NAME, SERIES_DESCRIPTION,
    SERIES_INSTANCE_UID, SERIES_NUMBER, SOP_CLASS_UID, SOP_INSTANCE_UID, STUDY_INSTANCE_UID,
};
use dicom_dictionary_std::uids::MR_IMAGE_STORAGE;
use dicom_object::{FileMetaTableBuilder, InMemDicomObject};
use std::path::Path;

#[allow(dead_code)]
pub fn write_fixture(
    dir: &Path,
    file_name: &str,
    series_uid: &str,
    series_number: i32,
    protocol_name: &str,
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
    obj.put_str(PROTOCOL_NAME, VR::LO, protocol_name);
    obj.put_str(SERIES_DESCRIPTION, VR::LO, protocol_name);
    obj.put_str(SERIES_NUMBER, VR::IS, series_number.to_string().as_str());

    let meta = FileMetaTableBuilder::new()
        .transfer_syntax(dicom_transfer_syntax_registry::default().erased().uid())
        .media_storage_sop_class_uid(MR_IMAGE_STORAGE);
    let file_obj = obj.with_meta(meta).unwrap();
    file_obj.write_to_file(dir.join(file_name)).unwrap();
}
