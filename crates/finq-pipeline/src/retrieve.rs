//! Question-to-context retrieval over the vector index

use std::time::Duration;

use tracing::debug;

use finq_index::{EmbeddingProvider, Granularity, ScoredRecord, SearchFilter, VectorIndex};

use crate::config::PipelineConfig;
use crate::error::PipelineError;

/// Ranked retrieval hits, descending by similarity, length ≤ k.
pub type RetrievalResult = Vec<ScoredRecord>;

/// Pure read over the index plus one embedding call per question.
pub struct Retriever<'a> {
    index: &'a VectorIndex,
    embedder: &'a dyn EmbeddingProvider,
    embed_timeout_secs: u64,
}

impl<'a> Retriever<'a> {
    pub fn new(
        index: &'a VectorIndex,
        embedder: &'a dyn EmbeddingProvider,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            embed_timeout_secs: config.embed_timeout_secs,
        }
    }

    /// Embed the question once; the vector is reused across granularities.
    ///
    /// An embedding failure aborts the stage — an empty result here would
    /// make later stages generate SQL against a context they believe is
    /// larger than it is.
    pub async fn embed_question(&self, question: &str) -> Result<Vec<f32>, PipelineError> {
        match tokio::time::timeout(
            Duration::from_secs(self.embed_timeout_secs),
            self.embedder.embed(question),
        )
        .await
        {
            Ok(Ok(vector)) => Ok(vector),
            Ok(Err(e)) => Err(PipelineError::Retrieval(format!(
                "question embedding failed: {e}"
            ))),
            Err(_) => Err(PipelineError::Timeout(format!(
                "question embedding exceeded {}s",
                self.embed_timeout_secs
            ))),
        }
    }

    /// Top-k search with a pre-computed question vector.
    pub fn search(
        &self,
        vector: &[f32],
        granularity: Granularity,
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> RetrievalResult {
        let hits = self.index.search(vector, granularity, k, filter);
        debug!(
            granularity = granularity.as_str(),
            k,
            hits = hits.len(),
            "retrieval"
        );
        hits
    }

    /// Embed and search in one call.
    pub async fn retrieve(
        &self,
        question: &str,
        granularity: Granularity,
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<RetrievalResult, PipelineError> {
        let vector = self.embed_question(question).await?;
        Ok(self.search(&vector, granularity, k, filter))
    }
}
