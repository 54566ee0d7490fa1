use std::rc::Rc;

use anyhow::Result;
use ndarray::Array3;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Configuration;
use crate::geometry::{
    ROBUST_HAUSDORFF_PERCENT, VoxelSpacing, compute_surface_distances, volumetric_dice,
};
use crate::model::{MetricRow, RowStatus};
use crate::planner::ComparisonPair;

/// Masks and voxel geometry of one opened study.
pub trait StudySource {
    fn spacing(&self) -> VoxelSpacing;
    fn has_structure(&self, label: &str) -> bool;
    fn mask(&mut self, label: &str) -> Result<Rc<Array3<bool>>>;
}

/// Pair-local failures; the pair is reported with sentinel metrics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PairError {
    #[error("role {role} has no resolved label")]
    Unresolved { role: String },
    #[error("structure {label:?} is not present in the structure set")]
    MissingStructure { label: String },
    #[error("structure {label:?} rasterizes to an empty mask")]
    EmptyMask { label: String },
}

impl PairError {
    pub fn status(&self) -> RowStatus {
        match self {
            Self::Unresolved { .. } => RowStatus::UnresolvedLabel,
            Self::MissingStructure { .. } => RowStatus::MissingStructure,
            Self::EmptyMask { .. } => RowStatus::EmptyMask,
        }
    }
}

#[derive(Debug, Error)]
pub enum EvaluateError {
    #[error(transparent)]
    Pair(#[from] PairError),
    #[error(transparent)]
    Study(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairMetrics {
    pub hausdorff_mm: f64,
    pub volume_dice: f64,
    pub surface_dice: f64,
}

impl PairMetrics {
    pub fn sentinel() -> Self {
        Self {
            hausdorff_mm: f64::NAN,
            volume_dice: f64::NAN,
            surface_dice: f64::NAN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ToleranceMode {
    /// Largest voxel dimension of the study being evaluated.
    LargestVoxelDimension,
    Fixed(f64),
}

impl ToleranceMode {
    pub fn tolerance_for(self, spacing: VoxelSpacing) -> f64 {
        match self {
            Self::LargestVoxelDimension => spacing.largest(),
            Self::Fixed(value) => value,
        }
    }

    pub fn describe(self) -> String {
        match self {
            Self::LargestVoxelDimension => "largest_voxel_dimension".to_string(),
            Self::Fixed(value) => format!("fixed_{value}mm"),
        }
    }
}

/// Identity of the study the rows belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyIds {
    pub patient_id: String,
    pub study_id: String,
}

#[derive(Debug, Clone)]
pub struct MetricEvaluator {
    tolerance: ToleranceMode,
}

impl MetricEvaluator {
    pub fn new(tolerance: ToleranceMode) -> Self {
        Self { tolerance }
    }

    fn checked_mask(
        study: &mut dyn StudySource,
        role: &str,
        label: Option<&str>,
    ) -> Result<Rc<Array3<bool>>, EvaluateError> {
        let label = label.ok_or_else(|| PairError::Unresolved {
            role: role.to_string(),
        })?;
        if !study.has_structure(label) {
            return Err(PairError::MissingStructure {
                label: label.to_string(),
            }
            .into());
        }
        let mask = study.mask(label)?;
        if !mask.iter().any(|&voxel| voxel) {
            return Err(PairError::EmptyMask {
                label: label.to_string(),
            }
            .into());
        }
        Ok(mask)
    }

    pub fn evaluate(
        &self,
        study: &mut dyn StudySource,
        role: &str,
        reference: Option<&str>,
        compared: Option<&str>,
    ) -> Result<PairMetrics, EvaluateError> {
        let reference_mask = Self::checked_mask(study, role, reference)?;
        let compared_mask = Self::checked_mask(study, role, compared)?;

        let spacing = study.spacing();
        let tolerance_mm = self.tolerance.tolerance_for(spacing);
        let distances = compute_surface_distances(&reference_mask, &compared_mask, spacing)?;

        Ok(PairMetrics {
            hausdorff_mm: distances.robust_hausdorff(ROBUST_HAUSDORFF_PERCENT),
            volume_dice: volumetric_dice(&reference_mask, &compared_mask)?,
            surface_dice: distances.surface_overlap_at_tolerance(tolerance_mm),
        })
    }

    /// Evaluates every planned pair of one study. Pair failures become
    /// flagged rows; any other failure aborts the whole study.
    pub fn evaluate_pairs(
        &self,
        study: &mut dyn StudySource,
        pairs: &[ComparisonPair],
        ids: &StudyIds,
        config: &Configuration,
    ) -> Result<Vec<MetricRow>> {
        let mut rows = Vec::with_capacity(pairs.len());

        for pair in pairs {
            let role = config.roles[pair.role].name.as_str();
            let (metrics, status) = match self.evaluate(
                study,
                role,
                pair.reference.as_deref(),
                pair.compared.as_deref(),
            ) {
                Ok(metrics) => (metrics, RowStatus::Computed),
                Err(EvaluateError::Pair(err)) => {
                    warn!(
                        study_id = %ids.study_id,
                        method = %pair.method,
                        role,
                        reason = %err,
                        "pair reported with sentinel metrics"
                    );
                    (PairMetrics::sentinel(), err.status())
                }
                Err(EvaluateError::Study(err)) => return Err(err),
            };

            debug!(
                method = %pair.method,
                role,
                hausdorff_mm = metrics.hausdorff_mm,
                volume_dice = metrics.volume_dice,
                surface_dice = metrics.surface_dice,
                "pair evaluated"
            );

            rows.push(MetricRow {
                patient_id: ids.patient_id.clone(),
                study_id: ids.study_id.clone(),
                method: pair.method.clone(),
                reference_label: pair.reference.clone(),
                compared_label: pair.compared.clone(),
                role: role.to_string(),
                hausdorff_mm: metrics.hausdorff_mm,
                volume_dice: metrics.volume_dice,
                surface_dice: metrics.surface_dice,
                status,
            });
        }

        Ok(rows)
    }
}
