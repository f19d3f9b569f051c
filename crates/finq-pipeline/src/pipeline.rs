//! Pipeline orchestration
//!
//! Runs one question through route → retrieval → selection → context
//! assembly → the generate/validate/execute retry machine → the bounded
//! critique loop → composition. All state lives in a `PipelineState` owned
//! by this one run; nothing is shared across requests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use finq_catalog::Catalog;
use finq_index::{EmbeddingProvider, Granularity, SearchFilter, VectorIndex};

use crate::compose::compose;
use crate::config::PipelineConfig;
use crate::context::{combine_context, ContextBlock};
use crate::critique::{critique, CritiqueDecision};
use crate::error::{AbandonedStage, PipelineError};
use crate::execute::{ExecutionResult, Executor, FailureCategory, ResultTable};
use crate::generate::{generate_sql, CandidateQuery, RetryContext};
use crate::llm::ChatProvider;
use crate::retrieve::Retriever;
use crate::route::{decide_route, RouteDecision};
use crate::select::select_columns;
use crate::validate::validate;

/// Accumulator threaded through one request; discarded at request end.
#[derive(Debug)]
pub struct PipelineState {
    pub question: String,
    pub table_context: ContextBlock,
    pub row_context: ContextBlock,
    pub column_context: ContextBlock,
    pub candidate: Option<CandidateQuery>,
    pub execution: Option<ExecutionResult>,
    pub critique_rounds: u32,
}

/// Final output of one pipeline run. `sql` and `result` are absent when the
/// route decision answered directly without touching the database.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub answer: String,
    pub sql: Option<String>,
    pub result: Option<ResultTable>,
}

/// One configured pipeline over an index, a dataset and a pair of model
/// providers. Cheap to share; each `run` owns its own state.
pub struct Pipeline {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    chat: Arc<dyn ChatProvider>,
    db_path: PathBuf,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new<P: AsRef<Path>>(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatProvider>,
        db_path: P,
        config: PipelineConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            chat,
            db_path: db_path.as_ref().to_path_buf(),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Answer one question against the given catalog snapshot.
    ///
    /// The snapshot must be freshly introspected by the caller for this run;
    /// the pipeline never caches it across requests.
    pub async fn run(
        &self,
        catalog: &Catalog,
        question: &str,
    ) -> Result<PipelineOutcome, PipelineError> {
        let config = &self.config;

        if let RouteDecision::DirectAnswer { answer } =
            decide_route(self.chat.as_ref(), config, question).await?
        {
            info!("question answered directly without SQL");
            return Ok(PipelineOutcome {
                answer,
                sql: None,
                result: None,
            });
        }

        let retriever = Retriever::new(&self.index, self.embedder.as_ref(), config);
        let question_vector = retriever.embed_question(question).await?;

        // Table stage first; rows and columns are strictly scoped to the
        // tables chosen here.
        let table_hits = retriever.search(
            &question_vector,
            Granularity::Table,
            config.table_top_k,
            None,
        );
        let chosen_tables: Vec<String> = {
            let mut tables = Vec::new();
            for hit in &table_hits {
                if !tables.contains(&hit.record.table) {
                    tables.push(hit.record.table.clone());
                }
            }
            tables
        };

        let mut state = PipelineState {
            question: question.to_string(),
            table_context: ContextBlock::build(&table_hits, config.context_budget_chars),
            row_context: ContextBlock::build(&[], config.context_budget_chars),
            column_context: ContextBlock::build(&[], config.context_budget_chars),
            candidate: None,
            execution: None,
            critique_rounds: 0,
        };

        let selected = select_columns(
            self.chat.as_ref(),
            config,
            question,
            &state.table_context,
            catalog,
        )
        .await?;

        let row_filter = SearchFilter::for_tables(&chosen_tables);
        let row_hits = retriever.search(
            &question_vector,
            Granularity::Row,
            config.row_top_k,
            Some(&row_filter),
        );
        state.row_context = ContextBlock::build(&row_hits, config.context_budget_chars);

        let column_filter =
            SearchFilter::for_tables(selected.tables()).with_columns(selected.qualified());
        let column_hits = retriever.search(
            &question_vector,
            Granularity::Column,
            config.column_top_k,
            Some(&column_filter),
        );
        state.column_context = ContextBlock::build(&column_hits, config.context_budget_chars);

        let context = combine_context(
            &state.table_context,
            &state.row_context,
            &state.column_context,
        );

        let executor = Executor::new(&self.db_path, config);
        let (candidate, table) = self
            .generate_until_executed(catalog, &executor, question, &context, &mut state)
            .await?;
        let (candidate, table) = self
            .critique_loop(catalog, &executor, question, candidate, table, &mut state)
            .await;

        let execution = ExecutionResult::Rows(table.clone());
        let answer = compose(
            self.chat.as_ref(),
            config,
            question,
            &candidate.sql,
            &execution,
        )
        .await?;
        state.execution = Some(execution);

        Ok(PipelineOutcome {
            answer,
            sql: Some(candidate.sql),
            result: Some(table),
        })
    }

    /// The generate → validate → execute retry machine (terminal states:
    /// success or abandoned). Each attempt produces a fresh candidate; the
    /// prior error is fed back into regeneration.
    async fn generate_until_executed(
        &self,
        catalog: &Catalog,
        executor: &Executor,
        question: &str,
        context: &str,
        state: &mut PipelineState,
    ) -> Result<(CandidateQuery, ResultTable), PipelineError> {
        let config = &self.config;
        let max_attempts = config.max_attempts.max(1);
        let mut prior: Option<RetryContext> = None;
        let mut last_failure: Option<(String, String, AbandonedStage)> = None;

        for attempt in 1..=max_attempts {
            let mut candidate = generate_sql(
                self.chat.as_ref(),
                config,
                question,
                context,
                prior.as_ref(),
                attempt,
            )
            .await?;

            let outcome = validate(&candidate.sql, catalog);
            candidate.validation = Some(outcome.clone());
            state.candidate = Some(candidate.clone());

            if !outcome.ok {
                let reason = outcome
                    .reason
                    .unwrap_or_else(|| "validation failed".to_string());
                warn!(attempt, reason = %reason, "candidate rejected by validator");
                prior = Some(RetryContext {
                    prior_sql: candidate.sql.clone(),
                    prior_error: reason.clone(),
                });
                last_failure = Some((candidate.sql, reason, AbandonedStage::Validation));
                continue;
            }

            match executor.execute(&candidate.sql).await {
                Ok(table) => {
                    info!(attempt, rows = table.rows.len(), "query executed");
                    return Ok((candidate, table));
                }
                Err(failure) if failure.category == FailureCategory::Timeout => {
                    return Err(PipelineError::Timeout(failure.message));
                }
                Err(failure) => {
                    warn!(attempt, error = %failure.message, "execution failed");
                    prior = Some(RetryContext {
                        prior_sql: candidate.sql.clone(),
                        prior_error: failure.message.clone(),
                    });
                    last_failure =
                        Some((candidate.sql, failure.message, AbandonedStage::Execution));
                    continue;
                }
            }
        }

        let (last_sql, last_error, last_stage) = last_failure
            .expect("retry loop always records a failure before abandoning");
        Err(PipelineError::Abandoned {
            attempts: max_attempts,
            last_sql,
            last_error,
            last_stage,
        })
    }

    /// The bounded critique loop. A revision must pass validation and
    /// execute successfully to be adopted; any failure keeps the last good
    /// result — correctness over perfection.
    async fn critique_loop(
        &self,
        catalog: &Catalog,
        executor: &Executor,
        question: &str,
        mut candidate: CandidateQuery,
        mut table: ResultTable,
        state: &mut PipelineState,
    ) -> (CandidateQuery, ResultTable) {
        let config = &self.config;

        for round in 1..=config.rewrite_rounds {
            state.critique_rounds = round;

            let decision = match critique(
                self.chat.as_ref(),
                config,
                question,
                &candidate.sql,
                &table,
                state.table_context.text(),
            )
            .await
            {
                Ok(decision) => decision,
                Err(e) => {
                    warn!(round, error = %e, "critique failed; keeping current result");
                    break;
                }
            };

            let revised_sql = match decision {
                CritiqueDecision::Keep => break,
                CritiqueDecision::Revise { sql } => sql,
            };

            let outcome = validate(&revised_sql, catalog);
            if !outcome.ok {
                warn!(round, reason = ?outcome.reason, "revision rejected by validator; keeping current result");
                break;
            }

            match executor.execute(&revised_sql).await {
                Ok(new_table) => {
                    info!(round, "revision adopted");
                    candidate = CandidateQuery {
                        sql: revised_sql,
                        attempt: candidate.attempt,
                        validation: Some(outcome),
                    };
                    table = new_table;
                    state.candidate = Some(candidate.clone());
                }
                Err(failure) => {
                    warn!(round, error = %failure.message, "revision failed to execute; keeping current result");
                    break;
                }
            }
        }

        (candidate, table)
    }
}
