use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::InventoryArgs;
use crate::config::{Configuration, load_config};
use crate::dicom_io::DicomLoader;
use crate::layout::{LayoutRules, StudyLoader, discover_studies, find_structure_file};
use crate::model::{InventoryEntry, RoleResolution};
use crate::results::{ResultTable, already_processed, load_result_table};
use crate::taxonomy::resolve;

pub fn run(args: InventoryArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let table = load_result_table(&args.results_db)?.unwrap_or_default();

    info!(
        input_root = %args.input_root.display(),
        recorded_rows = table.len(),
        "inventory requested"
    );

    let entries = collect_inventory(&args.input_root, &config, &table, &DicomLoader)?;

    if args.json {
        let rendered =
            serde_json::to_string_pretty(&entries).context("failed to render inventory json")?;
        println!("{rendered}");
    } else {
        for entry in &entries {
            log_entry(entry);
        }
    }

    info!(
        studies = entries.len(),
        already_recorded = entries.iter().filter(|e| e.already_recorded).count(),
        with_unknown_labels = entries.iter().filter(|e| !e.unknown_labels.is_empty()).count(),
        with_problems = entries.iter().filter(|e| e.problem.is_some()).count(),
        "inventory completed"
    );

    Ok(())
}

fn log_entry(entry: &InventoryEntry) {
    if let Some(problem) = &entry.problem {
        warn!(study = %entry.directory, problem = %problem, "study cannot be read");
        return;
    }

    let resolved = entry
        .resolved
        .iter()
        .map(|r| format!("{}={}", r.role, r.label.as_deref().unwrap_or("-")))
        .collect::<Vec<_>>()
        .join(", ");
    info!(
        study = %entry.directory,
        patient_id = %entry.patient_id.as_deref().unwrap_or_default(),
        frame_of_reference = %entry.study_id.as_deref().unwrap_or_default(),
        already_recorded = entry.already_recorded,
        resolved = %resolved,
        unknown_labels = %entry.unknown_labels.join(", "),
        "study"
    );
}

fn inventory_entry(
    dir: &Path,
    rules: &LayoutRules,
    config: &Configuration,
    table: &ResultTable,
    loader: &dyn StudyLoader,
) -> InventoryEntry {
    let mut entry = InventoryEntry {
        directory: dir.display().to_string(),
        structure_file: None,
        patient_id: None,
        study_id: None,
        already_recorded: false,
        resolved: Vec::new(),
        unknown_labels: Vec::new(),
        problem: None,
    };

    let header = find_structure_file(dir, rules).and_then(|structure_file| {
        entry.structure_file = Some(structure_file.display().to_string());
        loader.read_header(&structure_file)
    });
    let header = match header {
        Ok(header) => header,
        Err(err) => {
            entry.problem = Some(format!("{err:#}"));
            return entry;
        }
    };

    let resolution = resolve(&header.labels, config);
    entry.already_recorded = already_processed(&header.study_id, table);
    entry.resolved = config
        .roles
        .iter()
        .enumerate()
        .map(|(index, role)| RoleResolution {
            role: role.name.clone(),
            label: resolution.resolved.get(index).map(str::to_string),
        })
        .collect();
    entry.unknown_labels = resolution.unknown_labels;
    entry.patient_id = Some(header.patient_id);
    entry.study_id = Some(header.study_id);
    entry
}

/// Read-only preview of every study under `root`: nothing is moved,
/// prompted or written.
pub(crate) fn collect_inventory(
    root: &Path,
    config: &Configuration,
    table: &ResultTable,
    loader: &dyn StudyLoader,
) -> Result<Vec<InventoryEntry>> {
    let rules = LayoutRules::from_config(&config.layout)?;
    Ok(discover_studies(root)?
        .iter()
        .map(|dir| inventory_entry(dir, &rules, config, table, loader))
        .collect())
}
