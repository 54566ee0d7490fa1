use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dicom::dictionary_std::tags;
use dicom::object::{DefaultDicomObject, InMemDicomObject, open_file};
use thiserror::Error;

use super::{element_f64s, element_items, element_str};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("there is no {field} in the structure set {path}")]
pub struct FieldMissing {
    pub field: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    pub points: Vec<[f64; 3]>,
    pub referenced_sop_instance_uid: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Roi {
    pub number: i64,
    pub name: String,
    pub contours: Vec<Contour>,
}

/// ROI names and contours of one RTSTRUCT, in StructureSetROISequence order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructureSet {
    pub rois: Vec<Roi>,
}

impl StructureSet {
    pub fn labels(&self) -> Vec<String> {
        self.rois.iter().map(|roi| roi.name.clone()).collect()
    }

    pub fn roi(&self, name: &str) -> Option<&Roi> {
        self.rois.iter().find(|roi| roi.name == name)
    }

    pub fn parse(obj: &InMemDicomObject) -> Result<Self> {
        let mut rois = Vec::new();
        for item in element_items(obj, tags::STRUCTURE_SET_ROI_SEQUENCE) {
            let number = item
                .element(tags::ROI_NUMBER)
                .ok()
                .and_then(|element| element.to_int::<i64>().ok())
                .context("StructureSetROISequence item without ROINumber")?;
            let name = element_str(item, tags::ROI_NAME)
                .with_context(|| format!("ROI {number} has no ROIName"))?;
            rois.push(Roi {
                number,
                name,
                contours: Vec::new(),
            });
        }

        for item in element_items(obj, tags::ROI_CONTOUR_SEQUENCE) {
            let Some(number) = item
                .element(tags::REFERENCED_ROI_NUMBER)
                .ok()
                .and_then(|element| element.to_int::<i64>().ok())
            else {
                continue;
            };
            let Some(roi) = rois.iter_mut().find(|roi| roi.number == number) else {
                continue;
            };

            for contour in element_items(item, tags::CONTOUR_SEQUENCE) {
                let data = element_f64s(contour, tags::CONTOUR_DATA).unwrap_or_default();
                let points = data
                    .chunks_exact(3)
                    .map(|xyz| [xyz[0], xyz[1], xyz[2]])
                    .collect::<Vec<_>>();
                if points.is_empty() {
                    continue;
                }
                let referenced_sop_instance_uid = element_items(contour, tags::CONTOUR_IMAGE_SEQUENCE)
                    .first()
                    .and_then(|image| element_str(image, tags::REFERENCED_SOP_INSTANCE_UID));
                roi.contours.push(Contour {
                    points,
                    referenced_sop_instance_uid,
                });
            }
        }

        Ok(Self { rois })
    }
}

/// An opened RTSTRUCT file.
pub struct StructureSetFile {
    path: PathBuf,
    object: DefaultDicomObject,
}

impl StructureSetFile {
    pub fn open(path: &Path) -> Result<Self> {
        let object = open_file(path)
            .with_context(|| format!("failed to open structure set {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            object,
        })
    }

    /// Top-level attribute by DICOM keyword (e.g. `PatientID`).
    pub fn field(&self, keyword: &str) -> Result<String, FieldMissing> {
        let value = self
            .object
            .element_by_name(keyword)
            .ok()
            .and_then(|element| element.to_str().ok())
            .map(|value| value.trim_end_matches(['\0', ' ']).trim_start().to_string())
            .filter(|value| !value.is_empty());

        value.ok_or_else(|| FieldMissing {
            field: keyword.to_string(),
            path: self.path.clone(),
        })
    }

    /// FrameOfReferenceUID, falling back to the first referenced frame of reference.
    pub fn frame_of_reference(&self) -> Result<String, FieldMissing> {
        self.field("FrameOfReferenceUID").or_else(|missing| {
            element_items(&self.object, tags::REFERENCED_FRAME_OF_REFERENCE_SEQUENCE)
                .first()
                .and_then(|item| element_str(item, tags::FRAME_OF_REFERENCE_UID))
                .ok_or(missing)
        })
    }

    pub fn structure_set(&self) -> Result<StructureSet> {
        StructureSet::parse(&self.object)
            .with_context(|| format!("invalid structure set {}", self.path.display()))
    }
}
