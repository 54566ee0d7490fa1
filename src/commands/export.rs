use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::cli::ExportArgs;
use crate::results::load_result_table;
use crate::util::write_json_pretty;

/// Writes the stored result table as JSON; missing metrics become `null`.
pub fn run(args: ExportArgs) -> Result<()> {
    let Some(table) = load_result_table(&args.results_db)? else {
        bail!("result store not found: {}", args.results_db.display());
    };

    if table.is_empty() {
        warn!(results_db = %args.results_db.display(), "result store holds no rows");
    }

    write_json_pretty(&args.output, &table)?;
    info!(
        results_db = %args.results_db.display(),
        output = %args.output.display(),
        rows = table.len(),
        "result table exported"
    );
    Ok(())
}
