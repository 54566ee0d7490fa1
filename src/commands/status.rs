use anyhow::Result;
use tracing::info;

use crate::cli::StatusArgs;
use crate::results::summarize_store;

pub fn run(args: StatusArgs) -> Result<()> {
    info!(results_db = %args.results_db.display(), "status requested");

    let summary = summarize_store(&args.results_db)?;
    info!(
        path = %args.results_db.display(),
        rows = summary.rows,
        studies = summary.studies,
        patients = summary.patients,
        flagged_rows = summary.flagged_rows,
        updated_at = %summary.updated_at.as_deref().unwrap_or_default(),
        "result store status"
    );
    for method in &summary.methods {
        info!(
            method = %method.method,
            rows = method.rows,
            flagged_rows = method.flagged_rows,
            "method rows"
        );
    }

    Ok(())
}
