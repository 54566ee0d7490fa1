use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use anyhow::{Context, Result};
use ndarray::Array3;
use tracing::debug;

use super::raster::rasterize;
use super::structure_set::{StructureSet, StructureSetFile};
use super::volume::{VolumeGeometry, load_volume_geometry};
use crate::evaluator::StudySource;
use crate::geometry::VoxelSpacing;
use crate::layout::{StudyHeader, StudyLayout, StudyLoader};

/// An opened study: image geometry, parsed structure set and the masks
/// rasterized so far.
pub struct DicomStudy {
    geometry: VolumeGeometry,
    structures: StructureSet,
    masks: HashMap<String, Rc<Array3<bool>>>,
}

impl DicomStudy {
    pub fn new(geometry: VolumeGeometry, structures: StructureSet) -> Self {
        Self {
            geometry,
            structures,
            masks: HashMap::new(),
        }
    }
}

impl StudySource for DicomStudy {
    fn spacing(&self) -> VoxelSpacing {
        self.geometry.spacing
    }

    fn has_structure(&self, label: &str) -> bool {
        self.structures.roi(label).is_some()
    }

    fn mask(&mut self, label: &str) -> Result<Rc<Array3<bool>>> {
        if let Some(mask) = self.masks.get(label) {
            return Ok(Rc::clone(mask));
        }

        let roi = self
            .structures
            .roi(label)
            .with_context(|| format!("no structure named {label:?}"))?;
        let mask = Rc::new(
            rasterize(roi, &self.geometry)
                .with_context(|| format!("failed to rasterize {label:?}"))?,
        );
        debug!(
            label,
            voxels = mask.iter().filter(|v| **v).count(),
            "rasterized structure"
        );
        self.masks.insert(label.to_string(), Rc::clone(&mask));
        Ok(mask)
    }
}

/// Reads studies from DICOM files on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct DicomLoader;

impl StudyLoader for DicomLoader {
    fn read_header(&self, structure_file: &Path) -> Result<StudyHeader> {
        let file = StructureSetFile::open(structure_file)?;
        Ok(StudyHeader {
            patient_id: file.field("PatientID")?,
            study_id: file.frame_of_reference()?,
            labels: file.structure_set()?.labels(),
        })
    }

    fn open_source(&self, layout: &StudyLayout) -> Result<Box<dyn StudySource>> {
        let geometry = load_volume_geometry(&layout.image_dir)?;
        let structures = StructureSetFile::open(&layout.structure_file)?.structure_set()?;
        Ok(Box::new(DicomStudy::new(geometry, structures)))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::dicom_io::fixtures::{
        CtSlice, FrameOfReference, RtStruct, write_ct_slice, write_rt_struct,
    };
    use crate::dicom_io::structure_set::{Contour, FieldMissing, Roi};
    use crate::dicom_io::volume::tests::axial_header;

    fn study() -> DicomStudy {
        let geometry =
            VolumeGeometry::from_headers(vec![axial_header("a", 0.0), axial_header("b", 3.0)])
                .expect("volume");
        let structures = StructureSet {
            rois: vec![
                Roi {
                    number: 1,
                    name: "Prostate_manual".to_string(),
                    contours: vec![Contour {
                        points: vec![
                            [-8.5, -17.0, 0.0],
                            [-4.5, -17.0, 0.0],
                            [-4.5, -9.0, 0.0],
                            [-8.5, -9.0, 0.0],
                        ],
                        referenced_sop_instance_uid: Some("a".to_string()),
                    }],
                },
                Roi {
                    number: 2,
                    name: "Bladder_manual".to_string(),
                    contours: Vec::new(),
                },
            ],
        };
        DicomStudy::new(geometry, structures)
    }

    #[test]
    fn masks_are_rasterized_once_and_cached() {
        let mut study = study();
        assert!(study.has_structure("Prostate_manual"));
        assert!(!study.has_structure("MBS_Prostate"));
        assert_eq!(study.spacing().largest(), 3.0);

        let first = study.mask("Prostate_manual").expect("mask");
        let second = study.mask("Prostate_manual").expect("mask");
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(first.dim(), (2, 16, 12));
        assert!(first[[0, 3, 3]]);
    }

    #[test]
    fn structure_without_contours_gives_an_empty_mask() {
        let mut study = study();
        let mask = study.mask("Bladder_manual").expect("mask");
        assert!(mask.iter().all(|v| !v));
        assert!(study.mask("MBS_Prostate").is_err());
    }

    fn square(z: f64) -> Vec<[f64; 3]> {
        vec![
            [-8.0, -16.0, z],
            [-5.0, -16.0, z],
            [-5.0, -10.0, z],
            [-8.0, -10.0, z],
        ]
    }

    fn rt_struct(
        patient_id: Option<&'static str>,
        frame: FrameOfReference<'static>,
    ) -> RtStruct<'static> {
        RtStruct {
            patient_id,
            frame,
            rois: vec![
                ("Prostate_manual", "1.2.9.1", square(0.0)),
                ("MBS_Prostate", "1.2.9.2", square(3.0)),
            ],
        }
    }

    fn missing_field(err: &anyhow::Error) -> &FieldMissing {
        err.downcast_ref::<FieldMissing>().expect("FieldMissing error")
    }

    #[test]
    fn read_header_takes_identity_and_labels_from_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("RS.1.dcm");
        write_rt_struct(
            &path,
            &rt_struct(Some("P001"), FrameOfReference::TopLevel("1.2.840.99.1")),
        );

        let header = DicomLoader.read_header(&path).expect("header");
        assert_eq!(header.patient_id, "P001");
        assert_eq!(header.study_id, "1.2.840.99.1");
        assert_eq!(header.labels, vec!["Prostate_manual", "MBS_Prostate"]);
    }

    #[test]
    fn frame_of_reference_falls_back_to_the_referenced_sequence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("RS.1.dcm");
        write_rt_struct(
            &path,
            &rt_struct(Some("P001"), FrameOfReference::Referenced("1.2.840.99.2")),
        );

        let header = DicomLoader.read_header(&path).expect("header");
        assert_eq!(header.study_id, "1.2.840.99.2");
    }

    #[test]
    fn missing_identity_fields_are_reported_by_name() {
        let dir = tempfile::tempdir().expect("tempdir");

        let no_patient = dir.path().join("RS.1.dcm");
        write_rt_struct(
            &no_patient,
            &rt_struct(None, FrameOfReference::TopLevel("1.2.840.99.1")),
        );
        let err = DicomLoader.read_header(&no_patient).expect_err("no PatientID");
        assert_eq!(missing_field(&err).field, "PatientID");
        assert_eq!(missing_field(&err).path, no_patient);

        let no_frame = dir.path().join("RS.2.dcm");
        write_rt_struct(&no_frame, &rt_struct(Some("P001"), FrameOfReference::Absent));
        let err = DicomLoader.read_header(&no_frame).expect_err("no frame of reference");
        assert_eq!(missing_field(&err).field, "FrameOfReferenceUID");
    }

    #[test]
    fn open_source_rasterizes_contours_on_the_loaded_series() {
        let root = tempfile::tempdir().expect("tempdir");
        let image_dir = root.path().join("CT");
        let structure_dir = root.path().join("RTSTRUCT");
        fs::create_dir_all(&image_dir).expect("image dir");
        fs::create_dir_all(&structure_dir).expect("structure dir");
        write_ct_slice(&image_dir.join("b.dcm"), &CtSlice::axial("1.2.9.2", 3.0));
        write_ct_slice(&image_dir.join("a.dcm"), &CtSlice::axial("1.2.9.1", 0.0));
        let structure_file = structure_dir.join("RS.1.dcm");
        write_rt_struct(
            &structure_file,
            &rt_struct(Some("P001"), FrameOfReference::TopLevel("1.2.840.99.1")),
        );
        let layout = StudyLayout {
            root: root.path().to_path_buf(),
            image_dir,
            structure_dir,
            structure_file,
            extra_structure_files: Vec::new(),
        };

        let mut source = DicomLoader.open_source(&layout).expect("source");
        assert_eq!(source.spacing(), VoxelSpacing::new(2.0, 1.0, 3.0));
        assert!(source.has_structure("MBS_Prostate"));

        let manual = source.mask("Prostate_manual").expect("manual mask");
        let automatic = source.mask("MBS_Prostate").expect("automatic mask");
        assert_eq!(manual.dim(), (2, 16, 12));
        assert!(manual[[0, 3, 3]]);
        assert!(!manual[[1, 3, 3]]);
        assert!(automatic[[1, 3, 3]]);
        assert!(!automatic[[0, 3, 3]]);
    }
}
