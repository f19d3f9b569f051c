//! Query execution against DuckDB
//!
//! A fresh connection per request (DuckDB connections are not Sync), the
//! statement run on the blocking pool under a timeout, and the result row
//! count capped with an explicit truncation flag.

use std::path::{Path, PathBuf};
use std::time::Duration;

use duckdb::Connection;
use serde::Serialize;
use tracing::debug;

use finq_catalog::value_to_json;

use crate::config::PipelineConfig;

/// Tabular execution output. `truncated` must be surfaced to the composer,
/// never hidden.
#[derive(Debug, Clone, Serialize)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    /// Engine-level failure (unknown identifier, type error, ...).
    Runtime,
    /// Execution exceeded its bound and was cancelled.
    Timeout,
}

#[derive(Debug, Clone)]
pub struct ExecutionFailure {
    pub category: FailureCategory,
    pub message: String,
}

/// Either a bounded tabular result or a structured failure — never both.
#[derive(Debug, Clone)]
pub enum ExecutionResult {
    Rows(ResultTable),
    Failure(ExecutionFailure),
}

/// Runs validated SQL against the dataset database.
pub struct Executor {
    db_path: PathBuf,
    max_rows: usize,
    timeout_secs: u64,
}

impl Executor {
    pub fn new<P: AsRef<Path>>(db_path: P, config: &PipelineConfig) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            max_rows: config.max_result_rows,
            timeout_secs: config.execute_timeout_secs,
        }
    }

    pub async fn execute(&self, sql: &str) -> Result<ResultTable, ExecutionFailure> {
        let sql = sql.to_string();
        let db_path = self.db_path.clone();
        let max_rows = self.max_rows;

        let task = tokio::task::spawn_blocking(move || run_query(&db_path, &sql, max_rows));

        match tokio::time::timeout(Duration::from_secs(self.timeout_secs), task).await {
            Err(_) => Err(ExecutionFailure {
                category: FailureCategory::Timeout,
                message: format!("query execution exceeded {}s", self.timeout_secs),
            }),
            Ok(Err(join_error)) => Err(ExecutionFailure {
                category: FailureCategory::Runtime,
                message: format!("execution task failed: {join_error}"),
            }),
            Ok(Ok(result)) => result.map_err(|message| ExecutionFailure {
                category: FailureCategory::Runtime,
                message,
            }),
        }
    }
}

fn run_query(db_path: &Path, sql: &str, max_rows: usize) -> Result<ResultTable, String> {
    // Read-only handle: concurrent requests each open their own without
    // contending for the engine's write lock.
    let config = duckdb::Config::default()
        .access_mode(duckdb::AccessMode::ReadOnly)
        .map_err(|e| e.to_string())?;
    let conn = Connection::open_with_flags(db_path, config)
        .map_err(|e| format!("failed to open database: {e}"))?;
    let mut stmt = conn.prepare(sql).map_err(|e| e.to_string())?;
    let mut rows = stmt.query([]).map_err(|e| e.to_string())?;

    let mut columns: Vec<String> = Vec::new();
    let mut out: Vec<Vec<serde_json::Value>> = Vec::new();
    let mut truncated = false;

    while let Some(row) = rows.next().map_err(|e| e.to_string())? {
        if columns.is_empty() {
            let stmt_ref = row.as_ref();
            for i in 0..stmt_ref.column_count() {
                columns.push(
                    stmt_ref
                        .column_name(i)
                        .map(|n| n.to_string())
                        .unwrap_or_else(|_| format!("column_{i}")),
                );
            }
        }

        if out.len() == max_rows {
            truncated = true;
            break;
        }

        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(value_to_json(row, i).map_err(|e| e.to_string())?);
        }
        out.push(values);
    }

    debug!(rows = out.len(), truncated, "query executed");

    Ok(ResultTable {
        columns,
        rows: out,
        truncated,
    })
}
