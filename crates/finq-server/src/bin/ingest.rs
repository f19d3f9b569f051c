//! Index ingestion job
//!
//! Introspects the dataset, embeds table descriptions, sampled rows and
//! sampled column values, and replaces the vector index wholesale. Run once
//! after loading the dataset and again whenever the schema changes:
//!
//! ```bash
//! cargo run --bin ingest -- data/finance.duckdb data/finance.index.duckdb
//! ```

use anyhow::Context;
use tracing::info;

use finq_catalog::Catalog;
use finq_index::{build_records, IndexFile, IngestConfig, OpenAiEmbedder};

#[path = "../config.rs"]
mod config;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let app_config = Config::load_or_default(
        std::env::var("FINQ_CONFIG").unwrap_or_else(|_| "config.yaml".to_string()),
    )?;

    let mut args = std::env::args().skip(1);
    let database_path = args
        .next()
        .unwrap_or_else(|| app_config.data.database_path.clone());
    let index_path = args
        .next()
        .unwrap_or_else(|| app_config.data.index_path.clone());

    let api_key = Config::get_openai_api_key().context("OPENAI_API_KEY must be set")?;
    let openai_config = async_openai::config::OpenAIConfig::new().with_api_key(api_key);
    let openai_client = async_openai::Client::with_config(openai_config);

    let embedder = OpenAiEmbedder::new(
        openai_client,
        app_config.models.embedding_model.clone(),
        Some(app_config.models.embedding_dimensions),
    );

    info!(database = %database_path, "introspecting dataset");
    let conn = duckdb::Connection::open(&database_path)
        .with_context(|| format!("opening dataset database {database_path}"))?;
    let catalog = Catalog::introspect(&conn).context("introspecting schema")?;
    info!(
        tables = catalog.tables.len(),
        columns = catalog.total_columns(),
        "schema introspected"
    );

    let (records, report) =
        build_records(&conn, &catalog, &embedder, &IngestConfig::default())
            .await
            .context("building index records")?;

    let index_file =
        IndexFile::open(&index_path).with_context(|| format!("opening index {index_path}"))?;
    index_file
        .rebuild(&records)
        .context("rebuilding vector index")?;

    println!(
        "Indexed {} tables, {} rows, {} column values into {} ({} records total).",
        report.table_records,
        report.row_records,
        report.value_records,
        index_path,
        records.len(),
    );
    println!("Build fingerprint: {}", report.fingerprint);

    Ok(())
}
