use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Result, bail};

use crate::evaluator::StudySource;
use crate::evaluator::tests::FakeStudy;
use crate::geometry::VoxelSpacing;
use crate::layout::{StudyHeader, StudyLayout, StudyLoader};
use crate::util::file_name_string;

/// Studies keyed by folder name, so they keep resolving after archival.
#[derive(Default)]
pub(crate) struct FakeLoader {
    studies: HashMap<String, (StudyHeader, FakeStudy)>,
    pub opened: RefCell<Vec<String>>,
}

impl FakeLoader {
    pub(crate) fn with_study(
        mut self,
        folder: &str,
        study_id: &str,
        labels: &[&str],
        study: FakeStudy,
    ) -> Self {
        let header = StudyHeader {
            patient_id: format!("patient-{folder}"),
            study_id: study_id.to_string(),
            labels: labels.iter().map(|label| label.to_string()).collect(),
        };
        self.studies.insert(folder.to_string(), (header, study));
        self
    }

    fn lookup(&self, folder: &Path) -> Result<&(StudyHeader, FakeStudy)> {
        let name = file_name_string(folder);
        match self.studies.get(&name) {
            Some(entry) => Ok(entry),
            None => bail!("no fake study for {name}"),
        }
    }
}

impl StudyLoader for FakeLoader {
    fn read_header(&self, structure_file: &Path) -> Result<StudyHeader> {
        let Some(folder) = structure_file
            .ancestors()
            .skip(1)
            .find(|dir| self.studies.contains_key(&file_name_string(dir)))
        else {
            bail!("no fake study above {}", structure_file.display());
        };
        Ok(self.lookup(folder)?.0.clone())
    }

    fn open_source(&self, layout: &StudyLayout) -> Result<Box<dyn StudySource>> {
        let study = self.lookup(&layout.root)?.1.clone();
        self.opened
            .borrow_mut()
            .push(file_name_string(&layout.root));
        Ok(Box::new(study))
    }
}

/// A complete study of the sample taxonomy: manual and MBS structures agree.
pub(crate) fn matching_study() -> FakeStudy {
    FakeStudy::new(VoxelSpacing::new(1.0, 1.0, 2.0))
        .with_cube("Prostate_manual", 2, 6)
        .with_cube("MBS_Prostate", 2, 6)
        .with_cube("Bladder_manual", 1, 4)
        .with_cube("MBS_Bladder", 1, 4)
}

pub(crate) const MATCHING_LABELS: [&str; 5] = [
    "Prostate_manual",
    "Bladder_manual",
    "MBS_Prostate",
    "MBS_Bladder",
    "External",
];

/// Creates an unsorted study folder with one image and one structure file.
pub(crate) fn write_study_folder(root: &Path, folder: &str) {
    let dir = root.join(folder);
    fs::create_dir_all(&dir).expect("study dir");
    fs::write(dir.join("CT.1.dcm"), b"image").expect("image file");
    fs::write(dir.join("RS.1.dcm"), b"structure").expect("structure file");
}
