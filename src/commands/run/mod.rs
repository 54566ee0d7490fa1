use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::cli::{RunArgs, UnknownLabelPolicy};
use crate::config::{load_config, save_config};
use crate::dicom_io::DicomLoader;
use crate::evaluator::ToleranceMode;
use crate::model::{RunManifest, RunPaths};
use crate::prompt::{DiscardDecider, PromptDecider};
use crate::results::{load_result_table, write_result_table};
use crate::util::{now_utc_string, sha256_file, utc_compact_string, write_json_pretty};

mod batch;

use batch::{BatchOptions, BatchReport, archive_studies, run_batch};

const MANIFEST_VERSION: u32 = 1;

fn tolerance_mode(fixed_tolerance_mm: Option<f64>) -> Result<ToleranceMode> {
    match fixed_tolerance_mm {
        None => Ok(ToleranceMode::LargestVoxelDimension),
        Some(value) if value.is_finite() && value > 0.0 => Ok(ToleranceMode::Fixed(value)),
        Some(value) => bail!("--fixed-tolerance-mm must be a positive distance, got {value}"),
    }
}

fn default_manifest_path(results_db: &Path, started: DateTime<Utc>) -> PathBuf {
    let results_dir = results_db
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    results_dir
        .join("manifests")
        .join(format!("run_{}.json", utc_compact_string(started)))
}

/// Studies leave the input root only once their rows are committed.
fn persist_then_archive(
    report: &mut BatchReport,
    results_db: &Path,
    archive_dir: Option<&Path>,
) -> Result<()> {
    write_result_table(results_db, &report.table)?;
    if let Some(archive_root) = archive_dir {
        archive_studies(report, archive_root);
    }
    Ok(())
}

pub fn run(args: RunArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    let config_output = args.config_output.clone().unwrap_or_else(|| args.config.clone());
    let tolerance = tolerance_mode(args.fixed_tolerance_mm)?;
    let config_sha256_before = sha256_file(&args.config)?;
    let mut config = load_config(&args.config)?;
    let prior = load_result_table(&args.results_db)?;

    info!(
        run_id = %run_id,
        input_root = %args.input_root.display(),
        config = %args.config.display(),
        results_db = %args.results_db.display(),
        store_mode = args.store_mode.as_str(),
        unknown_labels = args.unknown_labels.as_str(),
        surface_tolerance = %tolerance.describe(),
        prior_rows = prior.as_ref().map_or(0, |table| table.len()),
        "run started"
    );

    let options = BatchOptions {
        input_root: args.input_root.clone(),
        config_output: config_output.clone(),
        store_mode: args.store_mode,
        tolerance,
    };
    let mut report = match args.unknown_labels {
        UnknownLabelPolicy::Prompt => {
            let mut decider = PromptDecider::new(io::stdin().lock(), io::stdout());
            run_batch(&mut config, prior, &options, &DicomLoader, &mut decider)?
        }
        UnknownLabelPolicy::Discard => {
            run_batch(&mut config, prior, &options, &DicomLoader, &mut DiscardDecider)?
        }
    };

    persist_then_archive(&mut report, &args.results_db, args.archive_dir.as_deref())?;
    if report.counts.labels_added_to_config > 0 || config_output != args.config {
        save_config(&config_output, &config)?;
    }
    let config_sha256_after = sha256_file(&config_output)?;

    let status = if report.counts.studies_failed > 0 {
        "completed_with_failures"
    } else {
        "completed"
    };
    let manifest = RunManifest {
        manifest_version: MANIFEST_VERSION,
        run_id: run_id.clone(),
        status: status.to_string(),
        started_at,
        updated_at: now_utc_string(),
        store_mode: args.store_mode.as_str().to_string(),
        unknown_label_policy: args.unknown_labels.as_str().to_string(),
        surface_tolerance: tolerance.describe(),
        config_sha256_before,
        config_sha256_after,
        paths: RunPaths {
            input_root: args.input_root.display().to_string(),
            config_path: args.config.display().to_string(),
            config_output_path: config_output.display().to_string(),
            results_db: args.results_db.display().to_string(),
            archive_dir: args.archive_dir.as_ref().map(|dir| dir.display().to_string()),
        },
        counts: report.counts.clone(),
        studies: report.studies,
        warnings: report.warnings,
    };
    let manifest_path = args
        .manifest_path
        .clone()
        .unwrap_or_else(|| default_manifest_path(&args.results_db, started_ts));
    write_json_pretty(&manifest_path, &manifest)?;

    info!(
        run_id = %run_id,
        status,
        studies = report.counts.studies_discovered,
        processed = report.counts.studies_processed,
        already_recorded = report.counts.studies_already_recorded,
        failed = report.counts.studies_failed,
        archived = report.counts.studies_archived,
        rows_added = report.counts.rows_added,
        flagged_rows = report.counts.flagged_rows_added,
        labels_added = report.counts.labels_added_to_config,
        total_rows = report.table.len(),
        total_studies = report.table.study_ids().len(),
        manifest = %manifest_path.display(),
        "run completed"
    );

    Ok(())
}
