use serde::{Deserialize, Serialize};

/// Why a row carries (or does not carry) real metric values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Computed,
    UnresolvedLabel,
    MissingStructure,
    EmptyMask,
}

impl RowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Computed => "computed",
            Self::UnresolvedLabel => "unresolved_label",
            Self::MissingStructure => "missing_structure",
            Self::EmptyMask => "empty_mask",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "computed" => Some(Self::Computed),
            "unresolved_label" => Some(Self::UnresolvedLabel),
            "missing_structure" => Some(Self::MissingStructure),
            "empty_mask" => Some(Self::EmptyMask),
            _ => None,
        }
    }

    pub fn is_flagged(self) -> bool {
        !matches!(self, Self::Computed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub patient_id: String,
    pub study_id: String,
    pub method: String,
    pub reference_label: Option<String>,
    pub compared_label: Option<String>,
    pub role: String,
    pub hausdorff_mm: f64,
    pub volume_dice: f64,
    pub surface_dice: f64,
    pub status: RowStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunPaths {
    pub input_root: String,
    pub config_path: String,
    pub config_output_path: String,
    pub results_db: String,
    pub archive_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunCounts {
    pub studies_discovered: usize,
    pub studies_processed: usize,
    pub studies_already_recorded: usize,
    pub studies_failed: usize,
    pub studies_archived: usize,
    pub prior_rows: usize,
    pub rows_added: usize,
    pub flagged_rows_added: usize,
    pub labels_added_to_config: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyDisposition {
    Processed,
    AlreadyRecorded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudyOutcome {
    pub directory: String,
    pub disposition: StudyDisposition,
    pub patient_id: Option<String>,
    pub study_id: Option<String>,
    pub rows: usize,
    pub flagged_rows: usize,
    pub reason: Option<String>,
    pub archived_to: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub store_mode: String,
    pub unknown_label_policy: String,
    pub surface_tolerance: String,
    pub config_sha256_before: String,
    pub config_sha256_after: String,
    pub paths: RunPaths,
    pub counts: RunCounts,
    pub studies: Vec<StudyOutcome>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleResolution {
    pub role: String,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InventoryEntry {
    pub directory: String,
    pub structure_file: Option<String>,
    pub patient_id: Option<String>,
    pub study_id: Option<String>,
    pub already_recorded: bool,
    pub resolved: Vec<RoleResolution>,
    pub unknown_labels: Vec<String>,
    pub problem: Option<String>,
}
