//! Pipeline configuration
//!
//! One explicit value passed into every stage. There is no module-level
//! prompt or retry state anywhere in the pipeline.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Top-k for table-granularity retrieval.
    pub table_top_k: usize,
    /// Top-k for row-granularity retrieval.
    pub row_top_k: usize,
    /// Top-k for column-granularity retrieval.
    pub column_top_k: usize,
    /// Character budget per assembled context block.
    pub context_budget_chars: usize,
    /// Generation attempts before the executor abandons (validation and
    /// runtime failures feed back into regeneration up to this bound).
    pub max_attempts: u32,
    /// Critique/rewrite rounds after the first successful execution.
    pub rewrite_rounds: u32,
    /// Result rows kept before marking the result truncated.
    pub max_result_rows: usize,
    /// Dialect name spliced into generation prompts.
    pub dialect: String,
    pub chat_timeout_secs: u64,
    pub embed_timeout_secs: u64,
    pub execute_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            table_top_k: 3,
            row_top_k: 3,
            column_top_k: 3,
            context_budget_chars: 4000,
            max_attempts: 3,
            rewrite_rounds: 1,
            max_result_rows: 50,
            dialect: "DuckDB".to_string(),
            chat_timeout_secs: 30,
            embed_timeout_secs: 15,
            execute_timeout_secs: 30,
        }
    }
}
