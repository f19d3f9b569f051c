//! Retrieval-augmented text-to-SQL pipeline
//!
//! Converts a natural-language question about a tabular financial dataset
//! into SQL, executes it against DuckDB, and composes a grounded answer.
//! The flow is a state machine with failure recovery: retrieve schema
//! context from the vector index under a budget, let the model pick a
//! column subset, generate SQL constrained to verified identifiers,
//! statically validate it, execute with bounded error-feedback retries, and
//! optionally critique/rewrite before composing the final answer.

mod compose;
mod config;
mod context;
mod critique;
mod error;
mod execute;
mod generate;
mod llm;
mod pipeline;
mod retrieve;
mod route;
mod select;
mod validate;

pub use compose::{compose, describe_failure};
pub use config::PipelineConfig;
pub use context::{combine_context, ContextBlock};
pub use critique::{critique, CritiqueDecision};
pub use error::{AbandonedStage, PipelineError};
pub use execute::{
    ExecutionFailure, ExecutionResult, Executor, FailureCategory, ResultTable,
};
pub use generate::{generate_sql, CandidateQuery, RetryContext};
pub use llm::{ChatProvider, OpenAiChat};
pub use pipeline::{Pipeline, PipelineOutcome, PipelineState};
pub use retrieve::{RetrievalResult, Retriever};
pub use route::{decide_route, RouteDecision};
pub use select::{select_columns, SelectedColumns};
pub use validate::{validate, ValidationOutcome};
