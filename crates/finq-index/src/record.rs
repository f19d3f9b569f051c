//! Embedded record types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IndexError;

/// Which of table / row / column an embedded record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Table,
    Row,
    Column,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Table => "table",
            Granularity::Row => "row",
            Granularity::Column => "column",
        }
    }

    pub fn parse(value: &str) -> Result<Self, IndexError> {
        match value {
            "table" => Ok(Granularity::Table),
            "row" => Ok(Granularity::Row),
            "column" => Ok(Granularity::Column),
            _ => Err(IndexError::InvalidStoredValue(format!(
                "unknown granularity: {value}"
            ))),
        }
    }
}

/// One vector-indexed unit: identifier, provenance, payload text and vector.
///
/// Created once during ingestion, read-only afterward. Re-ingestion replaces
/// the whole index; records are never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: Uuid,
    pub granularity: Granularity,
    /// Table name; `table:row-N`; or `table.column`.
    pub identifier: String,
    /// Source table.
    pub table: String,
    /// Source column, for column-granularity records.
    pub column: Option<String>,
    /// The original text that was embedded.
    pub payload: String,
    pub vector: Vec<f32>,
}

/// One ranked retrieval hit.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: EmbeddingRecord,
    pub score: f32,
}
