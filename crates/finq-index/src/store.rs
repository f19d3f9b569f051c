//! Index persistence and deterministic nearest-neighbor search

use std::collections::HashSet;
use std::path::Path;

use duckdb::Connection;
use tracing::debug;
use uuid::Uuid;

use crate::error::IndexError;
use crate::record::{EmbeddingRecord, Granularity, ScoredRecord};

/// Restricts a search to records from an allowed set of tables, and
/// optionally to an allowed set of qualified `table.column` pairs.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    tables: HashSet<String>,
    columns: Option<HashSet<String>>,
}

impl SearchFilter {
    /// Allow only records whose source table is in `tables`.
    pub fn for_tables<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tables: tables
                .into_iter()
                .map(|t| t.as_ref().to_ascii_lowercase())
                .collect(),
            columns: None,
        }
    }

    /// Additionally allow only records for the given `table.column` pairs.
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.columns = Some(
            columns
                .into_iter()
                .map(|c| c.as_ref().to_ascii_lowercase())
                .collect(),
        );
        self
    }

    fn matches(&self, record: &EmbeddingRecord) -> bool {
        if !self.tables.contains(&record.table.to_ascii_lowercase()) {
            return false;
        }
        match (&self.columns, &record.column) {
            (Some(allowed), Some(column)) => {
                let qualified = format!("{}.{}", record.table, column).to_ascii_lowercase();
                allowed.contains(&qualified)
            }
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

/// Cosine similarity, `None` on length mismatch or zero-norm input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Read-only in-memory vector index.
///
/// Records keep their ingestion order, which is the tie-break order for
/// equal similarity scores. The set is immutable, so concurrent readers
/// need no locking.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    records: Vec<EmbeddingRecord>,
}

impl VectorIndex {
    pub fn from_records(records: Vec<EmbeddingRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn count(&self, granularity: Granularity) -> usize {
        self.records
            .iter()
            .filter(|r| r.granularity == granularity)
            .count()
    }

    /// Top-k records of one granularity by cosine similarity.
    ///
    /// Ranking is descending by score; equal scores keep insertion order.
    /// Records failing the filter or with mismatched dimensions are skipped.
    pub fn search(
        &self,
        query: &[f32],
        granularity: Granularity,
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Vec<ScoredRecord> {
        let mut hits: Vec<ScoredRecord> = self
            .records
            .iter()
            .filter(|r| r.granularity == granularity)
            .filter(|r| filter.map(|f| f.matches(r)).unwrap_or(true))
            .filter_map(|r| match cosine_similarity(query, &r.vector) {
                Some(score) => Some(ScoredRecord {
                    record: r.clone(),
                    score,
                }),
                None => {
                    debug!(identifier = %r.identifier, "skipping record with unusable vector");
                    None
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        hits
    }
}

/// DuckDB-file persistence for the index.
///
/// `rebuild` replaces the stored records wholesale; `load` materializes the
/// in-memory [`VectorIndex`] in insertion order.
pub struct IndexFile {
    conn: Connection,
}

impl IndexFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, IndexError> {
        Ok(Self {
            conn: Connection::open(path)?,
        })
    }

    pub fn open_in_memory() -> Result<Self, IndexError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Drop any prior index and store `records` in order.
    pub fn rebuild(&self, records: &[EmbeddingRecord]) -> Result<(), IndexError> {
        self.conn.execute_batch(
            "BEGIN TRANSACTION;
             DROP TABLE IF EXISTS embedding_record;
             CREATE TABLE embedding_record (
                 seq BIGINT NOT NULL,
                 id VARCHAR NOT NULL,
                 granularity VARCHAR NOT NULL,
                 identifier VARCHAR NOT NULL,
                 source_table VARCHAR NOT NULL,
                 source_column VARCHAR,
                 payload VARCHAR NOT NULL,
                 vector VARCHAR NOT NULL
             );",
        )?;

        {
            let mut stmt = self.conn.prepare(
                "INSERT INTO embedding_record \
                 (seq, id, granularity, identifier, source_table, source_column, payload, vector) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for (seq, record) in records.iter().enumerate() {
                let vector_json = serde_json::to_string(&record.vector)?;
                stmt.execute(duckdb::params![
                    seq as i64,
                    record.id.to_string(),
                    record.granularity.as_str(),
                    record.identifier,
                    record.table,
                    record.column,
                    record.payload,
                    vector_json,
                ])?;
            }
        }

        self.conn.execute_batch("COMMIT;")?;
        Ok(())
    }

    /// Load all records in insertion order.
    pub fn load(&self) -> Result<VectorIndex, IndexError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, granularity, identifier, source_table, source_column, payload, vector \
             FROM embedding_record ORDER BY seq",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, granularity, identifier, table, column, payload, vector_json) = row?;
            records.push(EmbeddingRecord {
                id: Uuid::parse_str(&id)
                    .map_err(|e| IndexError::InvalidStoredValue(format!("record id: {e}")))?,
                granularity: Granularity::parse(&granularity)?,
                identifier,
                table,
                column,
                payload,
                vector: serde_json::from_str(&vector_json)?,
            });
        }
        Ok(VectorIndex::from_records(records))
    }
}
