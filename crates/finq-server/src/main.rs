//! finq server
//!
//! HTTP server that accepts natural language questions about a tabular
//! financial dataset, converts them to SQL through the retrieval-augmented
//! pipeline, and returns the executed result with a composed answer.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use finq_index::{IndexFile, OpenAiEmbedder};
use finq_pipeline::{OpenAiChat, Pipeline};

mod config;
mod logging;
mod routes;

use config::Config;
use routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config_path =
        std::env::var("FINQ_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading configuration from {config_path}"))?;

    config.apply_logging_env();
    logging::init();

    let api_key = Config::get_openai_api_key().context("OPENAI_API_KEY must be set")?;
    let openai_config = async_openai::config::OpenAIConfig::new().with_api_key(api_key);
    let openai_client = async_openai::Client::with_config(openai_config);

    info!(model = %config.models.chat_model, "using chat model");
    info!(model = %config.models.embedding_model, "using embedding model");

    // The index is built by the ingest job and loaded once; it is immutable
    // at query time so concurrent requests share it without locking.
    let index = IndexFile::open(&config.data.index_path)
        .and_then(|file| file.load())
        .with_context(|| format!("loading vector index from {}", config.data.index_path))?;
    info!(records = index.len(), path = %config.data.index_path, "vector index loaded");

    let embedder = OpenAiEmbedder::new(
        openai_client.clone(),
        config.models.embedding_model.clone(),
        Some(config.models.embedding_dimensions),
    );
    let chat = OpenAiChat::new(openai_client, config.models.chat_model.clone());

    let pipeline = Pipeline::new(
        Arc::new(index),
        Arc::new(embedder),
        Arc::new(chat),
        &config.data.database_path,
        config.pipeline.clone(),
    );

    let state = AppState {
        pipeline: Arc::new(pipeline),
        database_path: Arc::from(config.data.database_path.as_str()),
    };
    let app = routes::router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!(addr = %addr, "starting finq server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}
