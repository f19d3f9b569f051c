//! SQL generation
//!
//! Builds one prompt from the question and the assembled context — plus, on
//! retry, the previous SQL and its error — and extracts a single SQL
//! statement from the model response. Each attempt produces a fresh
//! `CandidateQuery`; nothing is mutated across attempts.

use serde::Deserialize;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::llm::{complete_with_timeout, strip_code_fences, ChatProvider};
use crate::validate::ValidationOutcome;

/// One generated SQL statement and what happened to it.
#[derive(Debug, Clone)]
pub struct CandidateQuery {
    pub sql: String,
    pub attempt: u32,
    pub validation: Option<ValidationOutcome>,
}

/// The prior attempt's SQL and error, fed back into regeneration.
#[derive(Debug, Clone)]
pub struct RetryContext {
    pub prior_sql: String,
    pub prior_error: String,
}

const GENERATE_SYSTEM_PROMPT: &str = "You convert user questions into SQL. Given an input \
question, create one syntactically correct query for the requested dialect (use double quotes \
instead of backticks for identifiers). Never select all columns from a table; ask only for the \
few columns relevant to the question. Use only the table and column names visible in the schema \
description, be careful not to query columns that do not exist, and qualify column names with \
the table name when needed. Respond with a JSON object of the form \
{\"query\": \"...\"} and nothing else.";

#[derive(Deserialize)]
struct SqlQueryOutput {
    query: String,
}

fn generation_prompt(
    config: &PipelineConfig,
    question: &str,
    context: &str,
    prior: Option<&RetryContext>,
) -> String {
    let mut prompt = format!(
        "Dialect: {dialect}\n\nOnly use the tables information listed below.\n{context}\n\n\
         Question: {question}\n",
        dialect = config.dialect,
        context = context,
        question = question,
    );

    if let Some(retry) = prior {
        prompt.push_str(&format!(
            "\nA previous attempt generated this SQL:\n{sql}\n\nIt failed with this error:\n\
             {error}\n\nGenerate a corrected query that avoids repeating the same mistake.\n",
            sql = retry.prior_sql,
            error = retry.prior_error,
        ));
    }

    prompt
}

/// Extract a single SQL statement from a model response.
///
/// Accepts the JSON contract `{"query": "..."}`, with or without code
/// fences, and falls back to treating bare SELECT text as the statement.
fn extract_sql(content: &str) -> Option<String> {
    let stripped = strip_code_fences(content);

    if let Ok(output) = serde_json::from_str::<SqlQueryOutput>(stripped) {
        return Some(output.query.trim().to_string());
    }

    // Free text around the JSON object: take the outermost braces.
    if let (Some(start), Some(end)) = (stripped.find('{'), stripped.rfind('}')) {
        if start < end {
            if let Ok(output) = serde_json::from_str::<SqlQueryOutput>(&stripped[start..=end]) {
                return Some(output.query.trim().to_string());
            }
        }
    }

    let lowered = stripped.trim_start().to_ascii_lowercase();
    if lowered.starts_with("select") || lowered.starts_with("with") {
        return Some(stripped.trim().trim_end_matches(';').to_string());
    }

    None
}

/// Run one generation attempt.
pub async fn generate_sql(
    chat: &dyn ChatProvider,
    config: &PipelineConfig,
    question: &str,
    context: &str,
    prior: Option<&RetryContext>,
    attempt: u32,
) -> Result<CandidateQuery, PipelineError> {
    let response = complete_with_timeout(
        chat,
        GENERATE_SYSTEM_PROMPT,
        &generation_prompt(config, question, context, prior),
        config.chat_timeout_secs,
    )
    .await?;

    let sql = extract_sql(&response).ok_or_else(|| {
        PipelineError::Generation(format!(
            "no SQL statement could be extracted from model response: {response}"
        ))
    })?;

    debug!(attempt, sql = %sql, "generated candidate");

    Ok(CandidateQuery {
        sql,
        attempt,
        validation: None,
    })
}
