use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde::Serialize;

use crate::model::{MetricRow, RowStatus};
use crate::util::{ensure_directory, now_utc_string};

const SCHEMA_VERSION: &str = "1";

/// Ordered metric rows of every evaluated study.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultTable {
    pub rows: Vec<MetricRow>,
}

impl ResultTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn study_ids(&self) -> HashSet<&str> {
        self.rows.iter().map(|row| row.study_id.as_str()).collect()
    }
}

/// True when any row of `table` belongs to `study_id`. A single row marks the
/// whole study as done; completeness is not re-checked.
pub fn already_processed(study_id: &str, table: &ResultTable) -> bool {
    table.rows.iter().any(|row| row.study_id == study_id)
}

/// Prior rows followed by fresh rows, both in their original order.
pub fn merge(prior: Option<ResultTable>, fresh: Vec<MetricRow>) -> ResultTable {
    let mut rows = prior.map(|table| table.rows).unwrap_or_default();
    rows.extend(fresh);
    ResultTable { rows }
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS metric_rows (
          row_index INTEGER PRIMARY KEY,
          patient_id TEXT NOT NULL,
          study_id TEXT NOT NULL,
          method TEXT NOT NULL,
          reference_label TEXT,
          compared_label TEXT,
          role TEXT NOT NULL,
          hausdorff_mm REAL,
          volume_dice REAL,
          surface_dice REAL,
          status TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_metric_rows_study ON metric_rows(study_id);
        ",
    )?;
    Ok(())
}

fn has_metric_table(connection: &Connection) -> Result<bool> {
    let found: Option<String> = connection
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'metric_rows'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn open_read_only(path: &Path) -> Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open result store read-only: {}", path.display()))
}

fn stored_metric(value: f64) -> Option<f64> {
    (!value.is_nan()).then_some(value)
}

struct StoredRow {
    row: MetricRow,
    status: String,
}

/// Reads the persisted result table; `None` when no store exists yet.
pub fn load_result_table(path: &Path) -> Result<Option<ResultTable>> {
    if !path.exists() {
        return Ok(None);
    }

    let connection = open_read_only(path)?;
    if !has_metric_table(&connection)? {
        return Ok(Some(ResultTable::default()));
    }

    let mut statement = connection.prepare(
        "
        SELECT patient_id, study_id, method, reference_label, compared_label, role,
               hausdorff_mm, volume_dice, surface_dice, status
        FROM metric_rows
        ORDER BY row_index ASC
        ",
    )?;
    let stored = statement
        .query_map([], |row| {
            Ok(StoredRow {
                row: MetricRow {
                    patient_id: row.get(0)?,
                    study_id: row.get(1)?,
                    method: row.get(2)?,
                    reference_label: row.get(3)?,
                    compared_label: row.get(4)?,
                    role: row.get(5)?,
                    hausdorff_mm: row.get::<_, Option<f64>>(6)?.unwrap_or(f64::NAN),
                    volume_dice: row.get::<_, Option<f64>>(7)?.unwrap_or(f64::NAN),
                    surface_dice: row.get::<_, Option<f64>>(8)?.unwrap_or(f64::NAN),
                    status: RowStatus::Computed,
                },
                status: row.get(9)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_context(|| format!("failed to read result rows from {}", path.display()))?;

    let mut rows = Vec::with_capacity(stored.len());
    for StoredRow { mut row, status } in stored {
        let Some(parsed) = RowStatus::parse(&status) else {
            bail!(
                "unknown row status {status:?} for study {} in {}",
                row.study_id,
                path.display()
            );
        };
        row.status = parsed;
        rows.push(row);
    }

    Ok(Some(ResultTable { rows }))
}

/// Replaces the stored table with `table`.
pub fn write_result_table(path: &Path, table: &ResultTable) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_directory(parent)?;
        }
    }

    let mut connection = Connection::open(path)
        .with_context(|| format!("failed to open result store: {}", path.display()))?;
    configure_connection(&connection)?;
    ensure_schema(&connection)?;

    let tx = connection.transaction()?;
    tx.execute("DELETE FROM metric_rows", [])?;
    {
        let mut insert = tx.prepare(
            "
            INSERT INTO metric_rows(
              row_index, patient_id, study_id, method, reference_label, compared_label, role,
              hausdorff_mm, volume_dice, surface_dice, status
            )
            VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ",
        )?;
        for (index, row) in table.rows.iter().enumerate() {
            insert.execute(params![
                index as i64,
                row.patient_id,
                row.study_id,
                row.method,
                row.reference_label,
                row.compared_label,
                row.role,
                stored_metric(row.hausdorff_mm),
                stored_metric(row.volume_dice),
                stored_metric(row.surface_dice),
                row.status.as_str(),
            ])?;
        }
    }
    for (key, value) in [
        ("schema_version", SCHEMA_VERSION.to_string()),
        ("updated_at", now_utc_string()),
    ] {
        tx.execute(
            "INSERT INTO metadata(key, value) VALUES(?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, value],
        )?;
    }
    tx.commit()
        .with_context(|| format!("failed to commit result store: {}", path.display()))?;

    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MethodCount {
    pub method: String,
    pub rows: usize,
    pub flagged_rows: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    pub rows: usize,
    pub studies: usize,
    pub patients: usize,
    pub flagged_rows: usize,
    pub updated_at: Option<String>,
    pub methods: Vec<MethodCount>,
}

fn count(connection: &Connection, sql: &str) -> Result<usize> {
    let value: i64 = connection.query_row(sql, [], |row| row.get(0))?;
    Ok(value as usize)
}

pub fn summarize_store(path: &Path) -> Result<StoreSummary> {
    if !path.exists() {
        bail!("result store not found: {}", path.display());
    }
    let connection = open_read_only(path)?;
    if !has_metric_table(&connection)? {
        return Ok(StoreSummary::default());
    }

    let updated_at = connection
        .query_row(
            "SELECT value FROM metadata WHERE key = 'updated_at'",
            [],
            |row| row.get::<_, String>(0),
        )
        .optional()?;

    let mut statement = connection.prepare(
        "
        SELECT method, COUNT(*), SUM(CASE WHEN status = 'computed' THEN 0 ELSE 1 END)
        FROM metric_rows
        GROUP BY method
        ORDER BY MIN(row_index) ASC
        ",
    )?;
    let methods = statement
        .query_map([], |row| {
            Ok(MethodCount {
                method: row.get(0)?,
                rows: row.get::<_, i64>(1)? as usize,
                flagged_rows: row.get::<_, i64>(2)? as usize,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(StoreSummary {
        rows: count(&connection, "SELECT COUNT(*) FROM metric_rows")?,
        studies: count(&connection, "SELECT COUNT(DISTINCT study_id) FROM metric_rows")?,
        patients: count(&connection, "SELECT COUNT(DISTINCT patient_id) FROM metric_rows")?,
        flagged_rows: count(
            &connection,
            "SELECT COUNT(*) FROM metric_rows WHERE status <> 'computed'",
        )?,
        updated_at,
        methods,
    })
}
