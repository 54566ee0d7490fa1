use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::cli::StoreMode;
use crate::config::{Configuration, save_config};
use crate::evaluator::{MetricEvaluator, StudyIds, ToleranceMode};
use crate::layout::{
    LayoutRules, StudyHeader, StudyLoader, archive_study, discover_studies, prepare_study,
};
use crate::model::{MetricRow, RunCounts, StudyDisposition, StudyOutcome};
use crate::planner::plan;
use crate::results::{ResultTable, already_processed, merge};
use crate::taxonomy::{LabelDecider, TaxonomyResolver};

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub input_root: PathBuf,
    /// Configuration is rewritten here whenever a study extends it.
    pub config_output: PathBuf,
    pub store_mode: StoreMode,
    pub tolerance: ToleranceMode,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Prior rows (merge mode) followed by the rows of this run.
    pub table: ResultTable,
    pub counts: RunCounts,
    pub studies: Vec<StudyOutcome>,
    pub warnings: Vec<String>,
    /// Study folders to archive once the rows are persisted, as (outcome index, folder).
    pub archive_candidates: Vec<(usize, PathBuf)>,
}

/// Per-study result before archival.
enum Evaluated {
    Rows(StudyHeader, Vec<MetricRow>),
    AlreadyRecorded(StudyHeader),
}

struct BatchDriver<'a> {
    options: &'a BatchOptions,
    loader: &'a dyn StudyLoader,
    decider: &'a mut dyn LabelDecider,
    rules: LayoutRules,
    resolver: TaxonomyResolver,
    evaluator: MetricEvaluator,
    prior: Option<ResultTable>,
    recorded_this_run: HashSet<String>,
    fresh: Vec<MetricRow>,
    report: BatchReport,
}

impl BatchDriver<'_> {
    fn is_recorded(&self, study_id: &str) -> bool {
        self.recorded_this_run.contains(study_id)
            || self
                .prior
                .as_ref()
                .is_some_and(|table| already_processed(study_id, table))
    }

    fn evaluate_study(&mut self, dir: &Path, config: &mut Configuration) -> Result<Evaluated> {
        let layout = prepare_study(dir, &self.rules)?;
        let header = self.loader.read_header(&layout.structure_file)?;

        let resolved = self
            .resolver
            .resolve_study(&header.labels, config, &mut *self.decider)?;
        if resolved.config_changed() {
            self.report.counts.labels_added_to_config += resolved.added.len();
            if let Err(err) = save_config(&self.options.config_output, config) {
                warn!(error = %format!("{err:#}"), "failed to save extended configuration");
                self.report
                    .warnings
                    .push(format!("configuration save after {}: {err:#}", dir.display()));
            }
        }

        let unresolved = resolved.resolution.resolved.unresolved_roles();
        debug!(
            study = %dir.display(),
            labels = header.labels.len(),
            unresolved_roles = %unresolved
                .iter()
                .map(|&role| config.roles[role].name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            discarded = resolved.discarded.len(),
            "labels resolved"
        );

        if self.is_recorded(&header.study_id) {
            return Ok(Evaluated::AlreadyRecorded(header));
        }

        let pairs = plan(&resolved.resolution.resolved, config)?;
        let mut source = self.loader.open_source(&layout)?;
        let ids = StudyIds {
            patient_id: header.patient_id.clone(),
            study_id: header.study_id.clone(),
        };
        let rows = self
            .evaluator
            .evaluate_pairs(source.as_mut(), &pairs, &ids, config)?;
        Ok(Evaluated::Rows(header, rows))
    }

    fn process(&mut self, dir: &Path, config: &mut Configuration) {
        let directory = dir.display().to_string();

        let outcome = match self.evaluate_study(dir, config) {
            Ok(Evaluated::Rows(header, rows)) => {
                let flagged_rows = rows.iter().filter(|row| row.status.is_flagged()).count();
                info!(
                    study = %directory,
                    patient_id = %header.patient_id,
                    frame_of_reference = %header.study_id,
                    rows = rows.len(),
                    flagged_rows,
                    "study evaluated"
                );
                self.report.counts.studies_processed += 1;
                self.report.counts.rows_added += rows.len();
                self.report.counts.flagged_rows_added += flagged_rows;
                self.recorded_this_run.insert(header.study_id.clone());
                let row_count = rows.len();
                self.fresh.extend(rows);

                StudyOutcome {
                    directory,
                    disposition: StudyDisposition::Processed,
                    patient_id: Some(header.patient_id),
                    study_id: Some(header.study_id),
                    rows: row_count,
                    flagged_rows,
                    reason: None,
                    archived_to: None,
                }
            }
            Ok(Evaluated::AlreadyRecorded(header)) => {
                info!(
                    study = %directory,
                    patient_id = %header.patient_id,
                    frame_of_reference = %header.study_id,
                    "study already recorded; skipping"
                );
                self.report.counts.studies_already_recorded += 1;

                StudyOutcome {
                    directory,
                    disposition: StudyDisposition::AlreadyRecorded,
                    patient_id: Some(header.patient_id),
                    study_id: Some(header.study_id),
                    rows: 0,
                    flagged_rows: 0,
                    reason: None,
                    archived_to: None,
                }
            }
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(study = %directory, reason = %reason, "study failed; no rows kept");
                self.report.counts.studies_failed += 1;

                StudyOutcome {
                    directory,
                    disposition: StudyDisposition::Failed,
                    patient_id: None,
                    study_id: None,
                    rows: 0,
                    flagged_rows: 0,
                    reason: Some(reason),
                    archived_to: None,
                }
            }
        };

        if outcome.disposition != StudyDisposition::Failed {
            self.report
                .archive_candidates
                .push((self.report.studies.len(), dir.to_path_buf()));
        }
        self.report.studies.push(outcome);
    }
}

/// Runs every study under `options.input_root` in name order and returns the
/// merged table. Only the discovery of the input root can fail the batch;
/// a failing study is recorded in the report and contributes no rows.
/// Nothing is moved here; see [`archive_studies`].
pub fn run_batch(
    config: &mut Configuration,
    prior: Option<ResultTable>,
    options: &BatchOptions,
    loader: &dyn StudyLoader,
    decider: &mut dyn LabelDecider,
) -> Result<BatchReport> {
    let studies = discover_studies(&options.input_root)?;
    let prior = match options.store_mode {
        StoreMode::Merge => prior,
        StoreMode::Overwrite => None,
    };

    let mut driver = BatchDriver {
        options,
        loader,
        decider,
        rules: LayoutRules::from_config(&config.layout)?,
        resolver: TaxonomyResolver::new(),
        evaluator: MetricEvaluator::new(options.tolerance),
        report: BatchReport {
            counts: RunCounts {
                studies_discovered: studies.len(),
                prior_rows: prior.as_ref().map_or(0, ResultTable::len),
                ..RunCounts::default()
            },
            ..BatchReport::default()
        },
        prior,
        recorded_this_run: HashSet::new(),
        fresh: Vec::new(),
    };

    for dir in &studies {
        driver.process(dir, config);
    }

    let BatchDriver {
        prior,
        fresh,
        mut report,
        ..
    } = driver;
    report.table = merge(prior, fresh);
    Ok(report)
}

/// Moves processed and already-recorded studies under `archive_root`.
/// Call only after the result table is persisted: an archived study is never retried.
pub fn archive_studies(report: &mut BatchReport, archive_root: &Path) {
    for (index, dir) in std::mem::take(&mut report.archive_candidates) {
        match archive_study(&dir, archive_root) {
            Ok(target) => {
                report.counts.studies_archived += 1;
                report.studies[index].archived_to = Some(target.display().to_string());
            }
            Err(err) => {
                warn!(study = %dir.display(), error = %format!("{err:#}"), "archival failed");
                report
                    .warnings
                    .push(format!("archival of {}: {err:#}", dir.display()));
            }
        }
    }
}
