//! Answer composition
//!
//! The final step narrates the result set in natural language. The composer
//! may only describe rows and values literally present in the execution
//! result: a failed execution is reported with deterministic formatting (no
//! generation call), and a truncated result always says so.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::execute::{ExecutionFailure, ExecutionResult, ResultTable};
use crate::llm::{complete_with_timeout, ChatProvider};

const COMPOSE_SYSTEM_PROMPT: &str = "You write the final answer to a user question about a \
financial dataset, given the SQL that was run and the rows it returned. State the answer \
plainly in natural language. Use only values that appear literally in the result rows; never \
estimate, extrapolate or invent numbers. If the result is empty, say that no matching data \
was found.";

fn compose_prompt(question: &str, sql: &str, table: &ResultTable) -> String {
    let result = serde_json::json!({
        "columns": table.columns,
        "rows": table.rows,
    });
    format!(
        "Question: {question}\n\nExecuted SQL:\n{sql}\n\nResult rows:\n{result}",
        question = question,
        sql = sql,
        result = result,
    )
}

/// Deterministic narration of a failed execution. Contains no values beyond
/// the attempted SQL and the engine's own error text.
pub fn describe_failure(sql: &str, failure: &ExecutionFailure) -> String {
    format!(
        "The question could not be answered from the database. The attempted SQL was:\n\
         {sql}\nIt failed with: {message}",
        sql = sql,
        message = failure.message,
    )
}

/// Compose the final answer for a finished pipeline run.
pub async fn compose(
    chat: &dyn ChatProvider,
    config: &PipelineConfig,
    question: &str,
    sql: &str,
    result: &ExecutionResult,
) -> Result<String, PipelineError> {
    match result {
        ExecutionResult::Failure(failure) => Ok(describe_failure(sql, failure)),
        ExecutionResult::Rows(table) => {
            let answer = complete_with_timeout(
                chat,
                COMPOSE_SYSTEM_PROMPT,
                &compose_prompt(question, sql, table),
                config.chat_timeout_secs,
            )
            .await?;

            let answer = answer.trim().to_string();
            if table.truncated {
                Ok(format!(
                    "{answer}\n\nNote: the result was truncated to the first {count} rows.",
                    answer = answer,
                    count = table.rows.len(),
                ))
            } else {
                Ok(answer)
            }
        }
    }
}
