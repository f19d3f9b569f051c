//! Route decision
//!
//! One generation call decides whether the question needs SQL at all. The
//! response is a tagged variant with exactly two cases; an unknown tag is a
//! generation failure, never passed through.

use serde::Deserialize;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::llm::{complete_with_timeout, strip_code_fences, ChatProvider};

const ROUTE_SYSTEM_PROMPT: &str = "You triage user questions for a financial-data assistant \
backed by a SQL database. If answering requires querying the database, respond with \
{\"action\": \"execute_sql\"}. If the question can be answered without any data (greetings, \
questions about the assistant itself, general definitions), respond with \
{\"action\": \"direct_answer\", \"answer\": \"<your answer>\"}. Respond with exactly one JSON \
object and nothing else.";

/// What to do with the question.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RouteDecision {
    /// Answer directly; no SQL involved.
    DirectAnswer { answer: String },
    /// Run the full text-to-SQL pipeline.
    ExecuteSql,
}

pub async fn decide_route(
    chat: &dyn ChatProvider,
    config: &PipelineConfig,
    question: &str,
) -> Result<RouteDecision, PipelineError> {
    let response = complete_with_timeout(
        chat,
        ROUTE_SYSTEM_PROMPT,
        question,
        config.chat_timeout_secs,
    )
    .await?;

    let decision: RouteDecision =
        serde_json::from_str(strip_code_fences(&response)).map_err(|e| {
            PipelineError::Generation(format!("route decision is not a known action: {e}"))
        })?;

    debug!(?decision, "route decided");
    Ok(decision)
}
