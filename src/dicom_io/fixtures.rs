use std::path::Path;

use dicom::core::value::DataSetSequence;
use dicom::core::{DataElement, PrimitiveValue, VR};
use dicom::dictionary_std::tags;
use dicom::object::{FileMetaTableBuilder, InMemDicomObject};

const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";
const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
const RT_STRUCTURE_SET_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.481.3";

/// Decimal strings, as DS values are stored on disk.
fn decimals(values: &[f64]) -> PrimitiveValue {
    PrimitiveValue::Strs(values.iter().map(|value| value.to_string()).collect())
}

fn text(tag: dicom::core::Tag, vr: VR, value: &str) -> DataElement<InMemDicomObject> {
    DataElement::new(tag, vr, PrimitiveValue::from(value))
}

fn write_file(obj: InMemDicomObject, sop_class: &str, sop_instance: &str, path: &Path) {
    obj.with_meta(
        FileMetaTableBuilder::new()
            .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN)
            .media_storage_sop_class_uid(sop_class)
            .media_storage_sop_instance_uid(sop_instance),
    )
    .expect("file meta")
    .write_to_file(path)
    .expect("write dicom file");
}

#[derive(Debug, Clone)]
pub(crate) struct CtSlice {
    pub uid: String,
    pub z: f64,
    pub pixel_spacing: [f64; 2],
    pub slice_thickness: Option<f64>,
}

impl CtSlice {
    /// 16x12 axial slice at `(-10, -20, z)`, 2 mm rows and 1 mm columns.
    pub(crate) fn axial(uid: &str, z: f64) -> Self {
        Self {
            uid: uid.to_string(),
            z,
            pixel_spacing: [2.0, 1.0],
            slice_thickness: Some(3.0),
        }
    }
}

/// Image header without pixel data.
pub(crate) fn slice_object(slice: &CtSlice) -> InMemDicomObject {
    let mut obj = InMemDicomObject::from_element_iter([
        text(tags::SOP_CLASS_UID, VR::UI, CT_IMAGE_STORAGE),
        text(tags::SOP_INSTANCE_UID, VR::UI, &slice.uid),
        DataElement::new(
            tags::IMAGE_POSITION_PATIENT,
            VR::DS,
            decimals(&[-10.0, -20.0, slice.z]),
        ),
        DataElement::new(
            tags::IMAGE_ORIENTATION_PATIENT,
            VR::DS,
            decimals(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
        ),
        DataElement::new(tags::PIXEL_SPACING, VR::DS, decimals(&slice.pixel_spacing)),
        DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(16_u16)),
        DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(12_u16)),
    ]);
    if let Some(thickness) = slice.slice_thickness {
        obj.put(DataElement::new(
            tags::SLICE_THICKNESS,
            VR::DS,
            decimals(&[thickness]),
        ));
    }
    obj
}

pub(crate) fn write_ct_slice(path: &Path, slice: &CtSlice) {
    write_file(slice_object(slice), CT_IMAGE_STORAGE, &slice.uid, path);
}

/// Where the structure set carries its frame of reference.
#[derive(Debug, Clone, Copy)]
pub(crate) enum FrameOfReference<'a> {
    TopLevel(&'a str),
    Referenced(&'a str),
    Absent,
}

#[derive(Debug, Clone)]
pub(crate) struct RtStruct<'a> {
    pub patient_id: Option<&'a str>,
    pub frame: FrameOfReference<'a>,
    /// One closed contour per ROI, as (ROI name, image uid, points).
    pub rois: Vec<(&'a str, &'a str, Vec<[f64; 3]>)>,
}

fn roi_item(number: usize, name: &str) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        text(tags::ROI_NUMBER, VR::IS, &number.to_string()),
        text(tags::ROI_NAME, VR::LO, name),
    ])
}

fn contour_item(number: usize, image_uid: &str, points: &[[f64; 3]]) -> InMemDicomObject {
    let flat: Vec<f64> = points.iter().flatten().copied().collect();
    let image = InMemDicomObject::from_element_iter([text(
        tags::REFERENCED_SOP_INSTANCE_UID,
        VR::UI,
        image_uid,
    )]);
    let contour = InMemDicomObject::from_element_iter([
        DataElement::new(
            tags::CONTOUR_IMAGE_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(vec![image]),
        ),
        text(tags::CONTOUR_GEOMETRIC_TYPE, VR::CS, "CLOSED_PLANAR"),
        DataElement::new(tags::CONTOUR_DATA, VR::DS, decimals(&flat)),
    ]);
    InMemDicomObject::from_element_iter([
        text(tags::REFERENCED_ROI_NUMBER, VR::IS, &number.to_string()),
        DataElement::new(
            tags::CONTOUR_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(vec![contour]),
        ),
    ])
}

pub(crate) fn write_rt_struct(path: &Path, rt: &RtStruct<'_>) {
    let mut obj = InMemDicomObject::from_element_iter([
        text(tags::SOP_CLASS_UID, VR::UI, RT_STRUCTURE_SET_STORAGE),
        text(tags::SOP_INSTANCE_UID, VR::UI, "1.2.826.7.1"),
        text(tags::MODALITY, VR::CS, "RTSTRUCT"),
        DataElement::new(
            tags::STRUCTURE_SET_ROI_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(
                rt.rois
                    .iter()
                    .enumerate()
                    .map(|(index, (name, _, _))| roi_item(index + 1, name))
                    .collect::<Vec<_>>(),
            ),
        ),
        DataElement::new(
            tags::ROI_CONTOUR_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(
                rt.rois
                    .iter()
                    .enumerate()
                    .map(|(index, (_, uid, points))| contour_item(index + 1, uid, points))
                    .collect::<Vec<_>>(),
            ),
        ),
    ]);
    if let Some(patient_id) = rt.patient_id {
        obj.put(text(tags::PATIENT_ID, VR::LO, patient_id));
    }
    match rt.frame {
        FrameOfReference::TopLevel(uid) => {
            obj.put(text(tags::FRAME_OF_REFERENCE_UID, VR::UI, uid));
        }
        FrameOfReference::Referenced(uid) => {
            let item = InMemDicomObject::from_element_iter([text(
                tags::FRAME_OF_REFERENCE_UID,
                VR::UI,
                uid,
            )]);
            obj.put(DataElement::new(
                tags::REFERENCED_FRAME_OF_REFERENCE_SEQUENCE,
                VR::SQ,
                DataSetSequence::from(vec![item]),
            ));
        }
        FrameOfReference::Absent => {}
    }
    write_file(obj, RT_STRUCTURE_SET_STORAGE, "1.2.826.7.1", path);
}
