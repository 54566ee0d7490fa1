use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use regex::Regex;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::LayoutConfig;
use crate::evaluator::StudySource;
use crate::util::{ensure_directory, file_name_string};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StudyLayoutError {
    #[error("study folder {0} is empty")]
    EmptyStudy(PathBuf),
    #[error(
        "only one of {image} and {structure} holds files; sort the study by hand or empty both"
    )]
    Ambiguous { image: PathBuf, structure: PathBuf },
    #[error("no file in {0} after sorting the study")]
    EmptyCategory(PathBuf),
}

/// Compiled file patterns and folder names of the study layout.
#[derive(Debug, Clone)]
pub struct LayoutRules {
    image_pattern: Regex,
    structure_pattern: Regex,
    image_folder: String,
    structure_folder: String,
}

impl LayoutRules {
    pub fn from_config(layout: &LayoutConfig) -> Result<Self> {
        Ok(Self {
            image_pattern: Regex::new(&layout.image_pattern)
                .with_context(|| format!("invalid image pattern {:?}", layout.image_pattern))?,
            structure_pattern: Regex::new(&layout.structure_pattern).with_context(|| {
                format!("invalid structure pattern {:?}", layout.structure_pattern)
            })?,
            image_folder: layout.image_folder.clone(),
            structure_folder: layout.structure_folder.clone(),
        })
    }

    fn image_dir(&self, study: &Path) -> PathBuf {
        study.join(&self.image_folder)
    }

    fn structure_dir(&self, study: &Path) -> PathBuf {
        study.join(&self.structure_folder)
    }
}

/// A study directory after sorting: one image folder, one structure file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyLayout {
    pub root: PathBuf,
    pub image_dir: PathBuf,
    pub structure_dir: PathBuf,
    pub structure_file: PathBuf,
    pub extra_structure_files: Vec<PathBuf>,
}

/// Identity and raw labels read from a study's structure set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyHeader {
    pub patient_id: String,
    pub study_id: String,
    pub labels: Vec<String>,
}

pub trait StudyLoader {
    fn read_header(&self, structure_file: &Path) -> Result<StudyHeader>;
    fn open_source(&self, layout: &StudyLayout) -> Result<Box<dyn StudySource>>;
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let entry = entry.with_context(|| format!("failed to read entry in {}", dir.display()))?;
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}

fn files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    Ok(sorted_entries(dir)?
        .into_iter()
        .filter(|path| path.is_file())
        .collect())
}

/// Study sub-directories of `root`, sorted by name.
pub fn discover_studies(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("input root is not a directory: {}", root.display());
    }
    let studies: Vec<PathBuf> = sorted_entries(root)?
        .into_iter()
        .filter(|path| path.is_dir())
        .collect();
    if studies.is_empty() {
        bail!("no study folder found in {}", root.display());
    }
    Ok(studies)
}

/// Moves loose image and structure files of `study` into their folders.
/// Files matching neither pattern and nested folders stay where they are.
fn sort_loose_files(
    study: &Path,
    rules: &LayoutRules,
    image_dir: &Path,
    structure_dir: &Path,
) -> Result<usize> {
    let mut moved = 0usize;
    for path in files_in(study)? {
        let name = file_name_string(&path);
        let target_dir = if rules.image_pattern.is_match(&name) {
            image_dir
        } else if rules.structure_pattern.is_match(&name) {
            structure_dir
        } else {
            continue;
        };
        let target = target_dir.join(&name);
        fs::rename(&path, &target).with_context(|| {
            format!("failed to move {} to {}", path.display(), target.display())
        })?;
        moved += 1;
    }
    Ok(moved)
}

fn structure_layout(study: &Path, image_dir: PathBuf, structure_dir: PathBuf) -> Result<StudyLayout> {
    if files_in(&image_dir)?.is_empty() {
        return Err(StudyLayoutError::EmptyCategory(image_dir).into());
    }
    let mut structures = files_in(&structure_dir)?.into_iter();
    let Some(structure_file) = structures.next() else {
        return Err(StudyLayoutError::EmptyCategory(structure_dir).into());
    };

    Ok(StudyLayout {
        root: study.to_path_buf(),
        image_dir,
        structure_dir,
        structure_file,
        extra_structure_files: structures.collect(),
    })
}

/// Ensures `study` holds a populated image folder and structure folder,
/// sorting loose files into them when both are still empty.
pub fn prepare_study(study: &Path, rules: &LayoutRules) -> Result<StudyLayout> {
    if sorted_entries(study)?.is_empty() {
        return Err(StudyLayoutError::EmptyStudy(study.to_path_buf()).into());
    }

    let image_dir = rules.image_dir(study);
    let structure_dir = rules.structure_dir(study);
    ensure_directory(&image_dir)?;
    ensure_directory(&structure_dir)?;

    let images_present = !files_in(&image_dir)?.is_empty();
    let structures_present = !files_in(&structure_dir)?.is_empty();

    match (images_present, structures_present) {
        (true, true) => {}
        (false, false) => {
            let moved = sort_loose_files(study, rules, &image_dir, &structure_dir)?;
            info!(study = %study.display(), files = moved, "sorted loose study files");
        }
        _ => {
            return Err(StudyLayoutError::Ambiguous {
                image: image_dir,
                structure: structure_dir,
            }
            .into());
        }
    }

    let layout = structure_layout(study, image_dir, structure_dir)?;
    if !layout.extra_structure_files.is_empty() {
        warn!(
            study = %study.display(),
            used = %layout.structure_file.display(),
            ignored = layout.extra_structure_files.len(),
            "several structure files found; using the first by name"
        );
    }
    Ok(layout)
}

/// Structure file `prepare_study` would pick, without touching the study.
pub fn find_structure_file(study: &Path, rules: &LayoutRules) -> Result<PathBuf> {
    let sorted = files_in(&rules.structure_dir(study))?;
    if let Some(first) = sorted.into_iter().next() {
        return Ok(first);
    }

    files_in(study)?
        .into_iter()
        .find(|path| {
            let name = file_name_string(path);
            !rules.image_pattern.is_match(&name) && rules.structure_pattern.is_match(&name)
        })
        .ok_or_else(|| StudyLayoutError::EmptyCategory(rules.structure_dir(study)).into())
}

/// Moves `study` into `archive_root`, returning the new location.
pub fn archive_study(study: &Path, archive_root: &Path) -> Result<PathBuf> {
    ensure_directory(archive_root)?;
    let target = archive_root.join(file_name_string(study));
    if target.exists() {
        bail!("archive target already exists: {}", target.display());
    }
    fs::rename(study, &target).with_context(|| {
        format!("failed to move {} to {}", study.display(), target.display())
    })?;
    Ok(target)
}
