//! Ingestion-time index builder
//!
//! Walks the live schema and produces the records for all three
//! granularities: one table-description record per table, a handful of
//! sampled rows per table, and sampled distinct values for columns that look
//! like they hold business terms rather than identifiers.

use chrono::{DateTime, Utc};
use duckdb::Connection;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use finq_catalog::{sample_distinct_values, sample_rows, Catalog};

use crate::embed::EmbeddingProvider;
use crate::error::IndexError;
use crate::record::{EmbeddingRecord, Granularity};

/// Column-name fragments that mark system identifiers, not business values.
const IDENTIFIER_PATTERNS: &[&str] = &["key", "id", "parentid", "guid", "uuid"];

/// Column-name fragments for technical calculation fields.
const TECHNICAL_PATTERNS: &[&str] = &[
    "method",
    "formula",
    "calculation",
    "conversion",
    "operator",
    "format",
    "entry",
];

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Rows sampled and embedded per table.
    pub rows_per_table: usize,
    /// Distinct values sampled per qualifying column.
    pub values_per_column: usize,
    /// Columns with fewer distinct values than this are skipped.
    pub min_distinct_values: usize,
    /// Embedding batch size.
    pub embed_batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            rows_per_table: 5,
            values_per_column: 50,
            min_distinct_values: 2,
            embed_batch_size: 64,
        }
    }
}

/// Summary of one index build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub table_records: usize,
    pub row_records: usize,
    pub value_records: usize,
    pub fingerprint: String,
    pub built_at: DateTime<Utc>,
}

struct DraftRecord {
    granularity: Granularity,
    identifier: String,
    table: String,
    column: Option<String>,
    payload: String,
}

/// Build all embedding records for the dataset behind `conn`.
///
/// The returned records are in a stable order (tables in catalog order, then
/// rows, then column values), which becomes the index insertion order.
pub async fn build_records(
    conn: &Connection,
    catalog: &Catalog,
    embedder: &dyn EmbeddingProvider,
    config: &IngestConfig,
) -> Result<(Vec<EmbeddingRecord>, BuildReport), IndexError> {
    let mut drafts = Vec::new();
    let mut counts = (0usize, 0usize, 0usize);

    for table in &catalog.tables {
        info!(table = %table.name, "indexing table");

        drafts.push(DraftRecord {
            granularity: Granularity::Table,
            identifier: table.name.clone(),
            table: table.name.clone(),
            column: None,
            payload: Catalog::render_table(table),
        });
        counts.0 += 1;

        for (i, row) in sample_rows(conn, table, config.rows_per_table)?
            .iter()
            .enumerate()
        {
            drafts.push(DraftRecord {
                granularity: Granularity::Row,
                identifier: format!("{}:row-{}", table.name, i),
                table: table.name.clone(),
                column: None,
                payload: row_text(&table.name, row),
            });
            counts.1 += 1;
        }

        for column in &table.columns {
            if !is_text_type(&column.data_type) {
                continue;
            }
            if !is_value_column(&column.name) {
                debug!(table = %table.name, column = %column.name, "skipping identifier-like column");
                continue;
            }

            let values =
                sample_distinct_values(conn, &table.name, &column.name, config.values_per_column)?;
            if values.len() < config.min_distinct_values {
                debug!(
                    table = %table.name,
                    column = %column.name,
                    distinct = values.len(),
                    "skipping column with too few distinct values"
                );
                continue;
            }

            for value in values {
                drafts.push(DraftRecord {
                    granularity: Granularity::Column,
                    identifier: format!("{}.{}", table.name, column.name),
                    table: table.name.clone(),
                    column: Some(column.name.clone()),
                    payload: format!(
                        "value: {} found in {}.{}",
                        value, table.name, column.name
                    ),
                });
                counts.2 += 1;
            }
        }
    }

    let records = embed_drafts(drafts, embedder, config.embed_batch_size).await?;

    let mut hasher = Sha256::new();
    for record in &records {
        hasher.update(record.granularity.as_str().as_bytes());
        hasher.update(record.identifier.as_bytes());
        hasher.update(record.payload.as_bytes());
    }

    let report = BuildReport {
        table_records: counts.0,
        row_records: counts.1,
        value_records: counts.2,
        fingerprint: format!("{:x}", hasher.finalize()),
        built_at: Utc::now(),
    };

    info!(
        tables = report.table_records,
        rows = report.row_records,
        values = report.value_records,
        fingerprint = %report.fingerprint,
        "index build complete"
    );

    Ok((records, report))
}

async fn embed_drafts(
    drafts: Vec<DraftRecord>,
    embedder: &dyn EmbeddingProvider,
    batch_size: usize,
) -> Result<Vec<EmbeddingRecord>, IndexError> {
    let mut records = Vec::with_capacity(drafts.len());

    for batch in drafts.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|d| d.payload.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;

        for (draft, vector) in batch.iter().zip(vectors) {
            records.push(EmbeddingRecord {
                id: Uuid::new_v4(),
                granularity: draft.granularity,
                identifier: draft.identifier.clone(),
                table: draft.table.clone(),
                column: draft.column.clone(),
                payload: draft.payload.clone(),
                vector,
            });
        }
    }

    Ok(records)
}

fn is_text_type(data_type: &str) -> bool {
    matches!(data_type.to_ascii_uppercase().as_str(), "VARCHAR" | "TEXT" | "STRING")
}

fn is_value_column(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    !IDENTIFIER_PATTERNS.iter().any(|p| lower.contains(p))
        && !TECHNICAL_PATTERNS.iter().any(|p| lower.contains(p))
}

fn row_text(table: &str, row: &serde_json::Map<String, serde_json::Value>) -> String {
    let fields = row
        .iter()
        .map(|(col, value)| format!("{}={}", col, display_value(value)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("Row from table '{}': ({})", table, fields)
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => format!("'{}'", s),
        other => other.to_string(),
    }
}
