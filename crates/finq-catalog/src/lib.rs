//! Live schema catalog extraction from DuckDB
//!
//! The catalog is the authoritative view of tables, columns and types. It is
//! introspected fresh for every pipeline run so schema drift is always
//! reflected, and it is the only thing generated SQL is validated against —
//! never the rendered prompt text.

use duckdb::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod value;

pub use value::value_to_json;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("Table not found: {0}")]
    TableNotFound(String),
}

/// One column as declared in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
}

/// One table: name, ordered columns, approximate row count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub row_count: usize,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Immutable snapshot of the database schema for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub tables: Vec<TableSchema>,
}

impl Catalog {
    /// Introspect all tables in the `main` schema of an open connection.
    pub fn introspect(conn: &Connection) -> Result<Self, CatalogError> {
        let mut stmt = conn.prepare(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = 'main' ORDER BY table_name",
        )?;
        let table_names: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut tables = Vec::with_capacity(table_names.len());
        for name in table_names {
            tables.push(Self::introspect_table(conn, &name)?);
        }

        tracing::debug!(tables = tables.len(), "schema snapshot taken");
        Ok(Catalog { tables })
    }

    /// Snapshot a database file through a read-only handle. Read-only
    /// handles on the same file can coexist, which is what lets concurrent
    /// requests introspect while another request's query is executing.
    pub fn from_database_read_only<P: AsRef<Path>>(db_path: P) -> Result<Self, CatalogError> {
        let config = duckdb::Config::default().access_mode(duckdb::AccessMode::ReadOnly)?;
        let conn = Connection::open_with_flags(db_path, config)?;
        Self::introspect(&conn)
    }

    fn introspect_table(conn: &Connection, table_name: &str) -> Result<TableSchema, CatalogError> {
        let mut stmt = conn.prepare(
            "SELECT column_name, data_type \
             FROM information_schema.columns \
             WHERE table_name = ? AND table_schema = 'main' \
             ORDER BY ordinal_position",
        )?;
        let columns: Vec<ColumnDef> = stmt
            .query_map([table_name], |row| {
                Ok(ColumnDef {
                    name: row.get(0)?,
                    data_type: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        if columns.is_empty() {
            return Err(CatalogError::TableNotFound(table_name.to_string()));
        }

        let count_query = format!("SELECT COUNT(*) FROM \"{}\"", table_name);
        let row_count: i64 = conn.query_row(&count_query, [], |row| row.get(0))?;

        Ok(TableSchema {
            name: table_name.to_string(),
            columns,
            row_count: row_count as usize,
        })
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Case-insensitive table lookup, matching DuckDB identifier resolution.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn contains_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    pub fn contains_column(&self, table: &str, column: &str) -> bool {
        self.table(table)
            .map(|t| t.column(column).is_some())
            .unwrap_or(false)
    }

    pub fn total_columns(&self) -> usize {
        self.tables.iter().map(|t| t.columns.len()).sum()
    }

    /// Render one table as a prompt description line.
    ///
    /// This is the text that gets embedded at table granularity and shown to
    /// the generator; validation never reads it back.
    pub fn render_table(table: &TableSchema) -> String {
        let cols = table
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.data_type))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Table \"{}\" ({} rows). Columns: {}",
            table.name, table.row_count, cols
        )
    }

    /// Render the full snapshot for prompts that need every table.
    pub fn render_context(&self) -> String {
        self.tables
            .iter()
            .map(|t| format!("- {}", Self::render_table(t)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Sample up to `limit` rows of a table as column-name → value maps.
pub fn sample_rows(
    conn: &Connection,
    table: &TableSchema,
    limit: usize,
) -> Result<Vec<serde_json::Map<String, serde_json::Value>>, CatalogError> {
    let query = format!("SELECT * FROM \"{}\" LIMIT {}", table.name, limit);
    let mut stmt = conn.prepare(&query)?;
    let column_names: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();

    let rows = stmt.query_map([], |row| {
        let mut map = serde_json::Map::new();
        for (idx, col_name) in column_names.iter().enumerate() {
            map.insert(col_name.clone(), value_to_json(row, idx)?);
        }
        Ok(map)
    })?;

    let mut sampled = Vec::new();
    for row in rows {
        sampled.push(row?);
    }
    Ok(sampled)
}

/// Sample up to `limit` distinct non-empty values of a text column.
pub fn sample_distinct_values(
    conn: &Connection,
    table: &str,
    column: &str,
    limit: usize,
) -> Result<Vec<String>, CatalogError> {
    let query = format!(
        "SELECT DISTINCT \"{col}\" FROM \"{table}\" \
         WHERE \"{col}\" IS NOT NULL AND LENGTH(TRIM(\"{col}\")) > 0 \
         ORDER BY \"{col}\" LIMIT {limit}",
        col = column,
        table = table,
        limit = limit,
    );
    let mut stmt = conn.prepare(&query)?;
    let values: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(values)
}
