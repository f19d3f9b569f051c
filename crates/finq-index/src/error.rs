//! Index error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Embedding provider error: {0}")]
    Embedding(String),

    #[error("Index storage error: {0}")]
    Store(#[from] duckdb::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Catalog error: {0}")]
    Catalog(#[from] finq_catalog::CatalogError),

    #[error("Invalid stored value: {0}")]
    InvalidStoredValue(String),
}
