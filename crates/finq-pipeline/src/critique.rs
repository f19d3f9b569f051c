//! Critique / rewrite
//!
//! A self-review pass: the model sees the question, the executed SQL and the
//! result, and either keeps the query or proposes a revision. Bounded by the
//! caller; a revision always re-enters validation and execution before it is
//! accepted.

use serde::Deserialize;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::execute::ResultTable;
use crate::llm::{complete_with_timeout, strip_code_fences, ChatProvider};

const CRITIQUE_SYSTEM_PROMPT: &str = "You review a SQL query that was generated to answer a \
user question, together with the rows it returned. Check whether it answers the question \
fully and correctly, references only the schema shown, and selects only relevant columns. If \
the query is correct, respond with {\"decision\": \"keep\"}. If it should be improved, respond \
with {\"decision\": \"revise\", \"sql\": \"<the corrected query>\"}. Respond with exactly one \
JSON object and nothing else.";

/// Verdict of one critique round.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum CritiqueDecision {
    Keep,
    Revise { sql: String },
}

fn critique_prompt(
    config: &PipelineConfig,
    question: &str,
    sql: &str,
    result: &ResultTable,
    schema_context: &str,
) -> String {
    let preview = serde_json::json!({
        "columns": result.columns,
        "rows": result.rows,
        "truncated": result.truncated,
    });
    format!(
        "Dialect: {dialect}\n\nQuestion: {question}\n\nExecuted SQL:\n{sql}\n\n\
         Result:\n{preview}\n\nSchema information:\n{schema}",
        dialect = config.dialect,
        question = question,
        sql = sql,
        preview = preview,
        schema = schema_context,
    )
}

pub async fn critique(
    chat: &dyn ChatProvider,
    config: &PipelineConfig,
    question: &str,
    sql: &str,
    result: &ResultTable,
    schema_context: &str,
) -> Result<CritiqueDecision, PipelineError> {
    let response = complete_with_timeout(
        chat,
        CRITIQUE_SYSTEM_PROMPT,
        &critique_prompt(config, question, sql, result, schema_context),
        config.chat_timeout_secs,
    )
    .await?;

    let decision: CritiqueDecision =
        serde_json::from_str(strip_code_fences(&response)).map_err(|e| {
            PipelineError::Generation(format!("critique output is not a known decision: {e}"))
        })?;

    debug!(?decision, "critique round complete");
    Ok(decision)
}
