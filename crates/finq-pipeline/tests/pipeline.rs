//! End-to-end pipeline tests with scripted model providers and a real
//! in-process DuckDB database.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use finq_catalog::Catalog;
use finq_index::{
    EmbeddingProvider, EmbeddingRecord, Granularity, IndexError, VectorIndex,
};
use finq_pipeline::{
    ChatProvider, Pipeline, PipelineConfig, PipelineError, Retriever,
};

/// Embeds every text to the same unit vector; retrieval ordering is then
/// controlled entirely by the record vectors.
struct FakeEmbedder;

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, IndexError> {
        Ok(vec![1.0, 0.0, 0.0, 0.0])
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0, 0.0]).collect())
    }

    fn dimensions(&self) -> usize {
        4
    }

    fn model_name(&self) -> &str {
        "fake-embedder"
    }
}

/// Pops canned responses in order and records every prompt it was given.
struct ScriptedChat {
    responses: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedChat {
    fn new(responses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.iter().map(|r| r.to_string()).collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedChat {
    async fn complete(&self, system: &str, user: &str) -> Result<String, PipelineError> {
        self.calls
            .lock()
            .unwrap()
            .push((system.to_string(), user.to_string()));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| PipelineError::Generation("script exhausted".to_string()))
    }
}

fn record(
    granularity: Granularity,
    identifier: &str,
    table: &str,
    column: Option<&str>,
    payload: &str,
    vector: Vec<f32>,
) -> EmbeddingRecord {
    EmbeddingRecord {
        id: Uuid::new_v4(),
        granularity,
        identifier: identifier.to_string(),
        table: table.to_string(),
        column: column.map(|c| c.to_string()),
        payload: payload.to_string(),
        vector,
    }
}

/// Seeded dataset: two tables, an index covering all three granularities.
fn fixture(dir: &tempfile::TempDir) -> (PathBuf, Catalog, Arc<VectorIndex>) {
    let db_path = dir.path().join("data.duckdb");
    let conn = duckdb::Connection::open(&db_path).unwrap();
    conn.execute_batch(
        "CREATE TABLE customer (id INTEGER, name VARCHAR, city VARCHAR);
         INSERT INTO customer VALUES (1, 'Acme Corp', 'Berlin'), (2, 'Globex', 'Paris');
         CREATE TABLE account (id INTEGER, customer_id INTEGER, balance DOUBLE);
         INSERT INTO account VALUES (10, 1, 120.5);",
    )
    .unwrap();
    let catalog = Catalog::introspect(&conn).unwrap();
    drop(conn);

    let index = VectorIndex::from_records(vec![
        record(
            Granularity::Table,
            "customer",
            "customer",
            None,
            "Table \"customer\" (2 rows). Columns: id INTEGER, name VARCHAR, city VARCHAR",
            vec![1.0, 0.1, 0.0, 0.0],
        ),
        record(
            Granularity::Table,
            "account",
            "account",
            None,
            "Table \"account\" (1 rows). Columns: id INTEGER, customer_id INTEGER, balance DOUBLE",
            vec![1.0, 0.5, 0.0, 0.0],
        ),
        record(
            Granularity::Row,
            "customer:row-0",
            "customer",
            None,
            "Row from table 'customer': (id=1, name='Acme Corp', city='Berlin')",
            vec![1.0, 0.2, 0.0, 0.0],
        ),
        record(
            Granularity::Column,
            "customer.city",
            "customer",
            Some("city"),
            "value: Berlin found in customer.city",
            vec![1.0, 0.3, 0.0, 0.0],
        ),
        record(
            Granularity::Column,
            "customer.name",
            "customer",
            Some("name"),
            "value: Acme Corp found in customer.name",
            vec![1.0, 0.4, 0.0, 0.0],
        ),
    ]);

    (db_path, catalog, Arc::new(index))
}

fn pipeline(
    db_path: &PathBuf,
    index: Arc<VectorIndex>,
    chat: Arc<ScriptedChat>,
    config: PipelineConfig,
) -> Pipeline {
    Pipeline::new(index, Arc::new(FakeEmbedder), chat, db_path, config)
}

#[tokio::test]
async fn test_happy_path_returns_sql_result_and_answer() {
    let dir = tempfile::tempdir().unwrap();
    let (db_path, catalog, index) = fixture(&dir);

    let chat = ScriptedChat::new(&[
        r#"{"action": "execute_sql"}"#,
        r#"{"customer": ["name"]}"#,
        r#"{"query": "SELECT COUNT(*) AS total FROM customer"}"#,
        r#"{"decision": "keep"}"#,
        "There are 2 customers.",
    ]);

    let pipeline = pipeline(&db_path, index, chat.clone(), PipelineConfig::default());
    let outcome = pipeline
        .run(&catalog, "how many customers are there?")
        .await
        .unwrap();

    assert_eq!(
        outcome.sql.as_deref(),
        Some("SELECT COUNT(*) AS total FROM customer")
    );
    let result = outcome.result.unwrap();
    assert_eq!(result.columns, vec!["total"]);
    assert_eq!(result.rows, vec![vec![serde_json::json!(2)]]);
    assert!(!result.truncated);
    assert_eq!(outcome.answer, "There are 2 customers.");

    // Route, select, generate, critique, compose: five generation calls.
    assert_eq!(chat.calls().len(), 5);
}

#[tokio::test]
async fn test_unknown_table_feeds_reason_into_retry() {
    let dir = tempfile::tempdir().unwrap();
    let (db_path, catalog, index) = fixture(&dir);

    let chat = ScriptedChat::new(&[
        r#"{"action": "execute_sql"}"#,
        r#"{"customer": ["name"]}"#,
        r#"{"query": "SELECT COUNT(*) AS total FROM customers"}"#,
        r#"{"query": "SELECT COUNT(*) AS total FROM customer"}"#,
        r#"{"decision": "keep"}"#,
        "There are 2 customers.",
    ]);

    let pipeline = pipeline(&db_path, index, chat.clone(), PipelineConfig::default());
    let outcome = pipeline
        .run(&catalog, "how many customers are there?")
        .await
        .unwrap();

    assert_eq!(
        outcome.sql.as_deref(),
        Some("SELECT COUNT(*) AS total FROM customer")
    );

    // The second generation call must carry the validator's reason and the
    // rejected SQL back to the model.
    let calls = chat.calls();
    let retry_prompt = &calls[3].1;
    assert!(retry_prompt.contains("unknown table: customers"));
    assert!(retry_prompt.contains("SELECT COUNT(*) AS total FROM customers"));
}

#[tokio::test]
async fn test_retry_budget_exhaustion_surfaces_last_error() {
    let dir = tempfile::tempdir().unwrap();
    let (db_path, catalog, index) = fixture(&dir);

    // Three candidates that validate but fail at runtime with distinct
    // errors (string → integer casts).
    let chat = ScriptedChat::new(&[
        r#"{"action": "execute_sql"}"#,
        r#"{"customer": ["name"]}"#,
        r#"{"query": "SELECT CAST('x1' AS INTEGER) AS v"}"#,
        r#"{"query": "SELECT CAST('x2' AS INTEGER) AS v"}"#,
        r#"{"query": "SELECT CAST('x3' AS INTEGER) AS v"}"#,
    ]);

    let pipeline = pipeline(&db_path, index, chat, PipelineConfig::default());
    let error = pipeline
        .run(&catalog, "how many customers are there?")
        .await
        .unwrap_err();

    match &error {
        PipelineError::Abandoned {
            attempts,
            last_sql,
            last_error,
            ..
        } => {
            assert_eq!(*attempts, 3);
            assert!(last_sql.contains("x3"));
            assert!(last_error.contains("x3"), "surfaced error: {last_error}");
            assert!(!last_error.contains("x1"));
        }
        other => panic!("expected Abandoned, got {other:?}"),
    }
    assert_eq!(error.error_kind(), "execution_failed");
}

#[tokio::test]
async fn test_metadata_question_composes_literal_counts() {
    let dir = tempfile::tempdir().unwrap();
    let (db_path, catalog, index) = fixture(&dir);

    let metadata_sql = "SELECT \
        (SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = 'main') AS table_count, \
        (SELECT COUNT(*) FROM information_schema.columns WHERE table_schema = 'main') AS column_count";

    let generation = format!(r#"{{"query": "{metadata_sql}"}}"#);
    let chat = ScriptedChat::new(&[
        r#"{"action": "execute_sql"}"#,
        r#"{"customer": ["name"]}"#,
        generation.as_str(),
        r#"{"decision": "keep"}"#,
        "The database has 2 tables and 6 columns.",
    ]);

    let pipeline = pipeline(&db_path, index, chat.clone(), PipelineConfig::default());
    let outcome = pipeline
        .run(&catalog, "how many tables and columns are there in the database?")
        .await
        .unwrap();

    let result = outcome.result.unwrap();
    assert_eq!(result.columns, vec!["table_count", "column_count"]);
    assert_eq!(
        result.rows,
        vec![vec![serde_json::json!(2), serde_json::json!(6)]]
    );

    // The composer was shown the literal rows, and the answer carries both
    // numbers.
    let calls = chat.calls();
    let compose_prompt = &calls[4].1;
    assert!(compose_prompt.contains("table_count"));
    assert!(compose_prompt.contains('2') && compose_prompt.contains('6'));
    assert!(outcome.answer.contains('2') && outcome.answer.contains('6'));
}

#[tokio::test]
async fn test_truncated_result_is_flagged_and_disclosed() {
    let dir = tempfile::tempdir().unwrap();
    let (db_path, catalog, index) = fixture(&dir);

    // Widen the dataset so the cap bites.
    {
        let conn = duckdb::Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "INSERT INTO customer SELECT range + 10, 'c' || range, 'Nowhere' FROM range(20);",
        )
        .unwrap();
    }

    let chat = ScriptedChat::new(&[
        r#"{"action": "execute_sql"}"#,
        r#"{"customer": ["name"]}"#,
        r#"{"query": "SELECT name FROM customer ORDER BY id"}"#,
        r#"{"decision": "keep"}"#,
        "Here are the customers.",
    ]);

    let config = PipelineConfig {
        max_result_rows: 4,
        ..PipelineConfig::default()
    };
    let pipeline = pipeline(&db_path, index, chat, config);
    let outcome = pipeline.run(&catalog, "list all customers").await.unwrap();

    let result = outcome.result.unwrap();
    assert!(result.truncated);
    assert_eq!(result.rows.len(), 4);
    assert!(outcome
        .answer
        .contains("truncated to the first 4 rows"));
}

#[tokio::test]
async fn test_direct_answer_skips_sql_entirely() {
    let dir = tempfile::tempdir().unwrap();
    let (db_path, catalog, index) = fixture(&dir);

    let chat = ScriptedChat::new(&[
        r#"{"action": "direct_answer", "answer": "I answer questions about your financial data."}"#,
    ]);

    let pipeline = pipeline(&db_path, index, chat.clone(), PipelineConfig::default());
    let outcome = pipeline.run(&catalog, "what can you do?").await.unwrap();

    assert!(outcome.sql.is_none());
    assert!(outcome.result.is_none());
    assert_eq!(
        outcome.answer,
        "I answer questions about your financial data."
    );
    assert_eq!(chat.calls().len(), 1);
}

#[tokio::test]
async fn test_unknown_route_action_is_generation_failure() {
    let dir = tempfile::tempdir().unwrap();
    let (db_path, catalog, index) = fixture(&dir);

    let chat = ScriptedChat::new(&[r#"{"action": "make_coffee"}"#]);
    let pipeline = pipeline(&db_path, index, chat, PipelineConfig::default());

    let error = pipeline.run(&catalog, "hello").await.unwrap_err();
    assert_eq!(error.error_kind(), "generation_failed");
}

#[tokio::test]
async fn test_selection_with_no_survivors_fails_stage() {
    let dir = tempfile::tempdir().unwrap();
    let (db_path, catalog, index) = fixture(&dir);

    let chat = ScriptedChat::new(&[
        r#"{"action": "execute_sql"}"#,
        r#"{"phantom_table": ["ghost_column"]}"#,
    ]);
    let pipeline = pipeline(&db_path, index, chat, PipelineConfig::default());

    let error = pipeline.run(&catalog, "anything").await.unwrap_err();
    assert_eq!(error.error_kind(), "selection_failed");
}

#[tokio::test]
async fn test_adopted_revision_replaces_query_and_result() {
    let dir = tempfile::tempdir().unwrap();
    let (db_path, catalog, index) = fixture(&dir);

    let chat = ScriptedChat::new(&[
        r#"{"action": "execute_sql"}"#,
        r#"{"customer": ["name"]}"#,
        r#"{"query": "SELECT COUNT(*) AS total FROM customer"}"#,
        r#"{"decision": "revise", "sql": "SELECT COUNT(*) AS total FROM customer WHERE city = 'Berlin'"}"#,
        "One customer is in Berlin.",
    ]);

    let pipeline = pipeline(&db_path, index, chat, PipelineConfig::default());
    let outcome = pipeline
        .run(&catalog, "how many customers are in Berlin?")
        .await
        .unwrap();

    assert_eq!(
        outcome.sql.as_deref(),
        Some("SELECT COUNT(*) AS total FROM customer WHERE city = 'Berlin'")
    );
    assert_eq!(
        outcome.result.unwrap().rows,
        vec![vec![serde_json::json!(1)]]
    );
}

#[tokio::test]
async fn test_invalid_revision_keeps_last_good_result() {
    let dir = tempfile::tempdir().unwrap();
    let (db_path, catalog, index) = fixture(&dir);

    let chat = ScriptedChat::new(&[
        r#"{"action": "execute_sql"}"#,
        r#"{"customer": ["name"]}"#,
        r#"{"query": "SELECT COUNT(*) AS total FROM customer"}"#,
        // The revision is a write statement; validation must reject it and
        // the original result must stand.
        r#"{"decision": "revise", "sql": "DROP TABLE customer"}"#,
        "There are 2 customers.",
    ]);

    let pipeline = pipeline(&db_path, index, chat, PipelineConfig::default());
    let outcome = pipeline
        .run(&catalog, "how many customers are there?")
        .await
        .unwrap();

    assert_eq!(
        outcome.sql.as_deref(),
        Some("SELECT COUNT(*) AS total FROM customer")
    );
    assert_eq!(
        outcome.result.unwrap().rows,
        vec![vec![serde_json::json!(2)]]
    );

    // The table is still there.
    let conn = duckdb::Connection::open(&db_path).unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM customer", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn test_retrieval_is_idempotent_and_top_k_bounded() {
    let records: Vec<EmbeddingRecord> = (0..10)
        .map(|i| {
            record(
                Granularity::Table,
                &format!("t{i}"),
                &format!("t{i}"),
                None,
                &format!("Table t{i}"),
                vec![1.0, i as f32 * 0.1, 0.0, 0.0],
            )
        })
        .collect();
    let index = VectorIndex::from_records(records);
    let config = PipelineConfig::default();
    let retriever = Retriever::new(&index, &FakeEmbedder, &config);

    let first = retriever
        .retrieve("which tables matter?", Granularity::Table, 3, None)
        .await
        .unwrap();
    let second = retriever
        .retrieve("which tables matter?", Granularity::Table, 3, None)
        .await
        .unwrap();

    // Scenario C: exactly k results, the highest-scored ones.
    assert_eq!(first.len(), 3);
    let names: Vec<&str> = first.iter().map(|h| h.record.identifier.as_str()).collect();
    assert_eq!(names, vec!["t0", "t1", "t2"]);

    // Idempotent: same ordered result across calls.
    let repeat: Vec<&str> = second.iter().map(|h| h.record.identifier.as_str()).collect();
    assert_eq!(names, repeat);
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.score, b.score);
    }
}
