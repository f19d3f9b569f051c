//! Column selection
//!
//! One generation call narrows the retrieved tables down to the columns that
//! matter for the question. The model's output is advisory only: every
//! identifier is checked against the typed catalog, unknown ones are dropped
//! and recorded, and an empty survivor set fails the stage.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use finq_catalog::Catalog;

use crate::config::PipelineConfig;
use crate::context::ContextBlock;
use crate::error::PipelineError;
use crate::llm::{complete_with_timeout, strip_code_fences, ChatProvider};

const SELECT_SYSTEM_PROMPT: &str = "You select the database columns most relevant to a user \
question. Use only the tables and columns listed in the schema information; never invent \
identifiers, and copy names exactly as shown. Respond with a JSON object mapping each table \
name to a list of its relevant column names, and nothing else.";

/// Catalog-verified selector output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedColumns {
    /// Canonical table name → canonical column names, in stable order.
    pub by_table: BTreeMap<String, Vec<String>>,
    /// Identifiers the model proposed that the catalog does not know.
    pub dropped: Vec<String>,
}

impl SelectedColumns {
    pub fn tables(&self) -> Vec<String> {
        self.by_table.keys().cloned().collect()
    }

    /// Qualified `table.column` names for index filtering.
    pub fn qualified(&self) -> Vec<String> {
        self.by_table
            .iter()
            .flat_map(|(table, columns)| {
                columns.iter().map(move |c| format!("{table}.{c}"))
            })
            .collect()
    }
}

fn select_prompt(question: &str, table_context: &ContextBlock) -> String {
    format!(
        "Question: {question}\n\nTables information:\n{context}\n\n\
         Return a JSON object where each key is a table name and each value is the list of \
         column names from that table that could help answer the question. Pick only what is \
         needed; you do not have to use every table.",
        question = question,
        context = table_context.text(),
    )
}

/// Run the selection stage.
pub async fn select_columns(
    chat: &dyn ChatProvider,
    config: &PipelineConfig,
    question: &str,
    table_context: &ContextBlock,
    catalog: &Catalog,
) -> Result<SelectedColumns, PipelineError> {
    let response = complete_with_timeout(
        chat,
        SELECT_SYSTEM_PROMPT,
        &select_prompt(question, table_context),
        config.chat_timeout_secs,
    )
    .await?;

    let proposed: BTreeMap<String, Vec<String>> =
        serde_json::from_str(strip_code_fences(&response)).map_err(|e| {
            PipelineError::Generation(format!("column selection output is not valid JSON: {e}"))
        })?;

    let selected = filter_against_catalog(proposed, catalog);

    if !selected.dropped.is_empty() {
        warn!(dropped = ?selected.dropped, "selector proposed unknown identifiers");
    }
    debug!(tables = ?selected.tables(), "columns selected");

    if selected.by_table.is_empty() {
        return Err(PipelineError::Selection(
            "no proposed column survived catalog verification".to_string(),
        ));
    }

    Ok(selected)
}

/// Pure filter: keep only identifiers the catalog knows, canonicalizing case.
fn filter_against_catalog(
    proposed: BTreeMap<String, Vec<String>>,
    catalog: &Catalog,
) -> SelectedColumns {
    let mut by_table = BTreeMap::new();
    let mut dropped = Vec::new();

    for (table_name, columns) in proposed {
        let Some(table) = catalog.table(&table_name) else {
            for column in &columns {
                dropped.push(format!("{table_name}.{column}"));
            }
            continue;
        };

        let mut kept = Vec::new();
        for column in columns {
            match table.column(&column) {
                Some(def) => kept.push(def.name.clone()),
                None => dropped.push(format!("{}.{}", table.name, column)),
            }
        }

        if !kept.is_empty() {
            by_table.insert(table.name.clone(), kept);
        }
    }

    SelectedColumns { by_table, dropped }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finq_catalog::{ColumnDef, TableSchema};

    fn catalog() -> Catalog {
        Catalog {
            tables: vec![TableSchema {
                name: "customer".to_string(),
                columns: vec![
                    ColumnDef {
                        name: "id".to_string(),
                        data_type: "INTEGER".to_string(),
                    },
                    ColumnDef {
                        name: "city".to_string(),
                        data_type: "VARCHAR".to_string(),
                    },
                ],
                row_count: 10,
            }],
        }
    }

    #[test]
    fn test_filter_drops_unknown_identifiers() {
        let mut proposed = BTreeMap::new();
        proposed.insert(
            "customer".to_string(),
            vec!["city".to_string(), "ghost".to_string()],
        );
        proposed.insert("phantom".to_string(), vec!["x".to_string()]);

        let selected = filter_against_catalog(proposed, &catalog());
        assert_eq!(selected.by_table["customer"], vec!["city"]);
        assert!(!selected.by_table.contains_key("phantom"));
        assert_eq!(selected.dropped.len(), 2);
        assert!(selected.dropped.contains(&"customer.ghost".to_string()));
        assert!(selected.dropped.contains(&"phantom.x".to_string()));
    }

    #[test]
    fn test_filter_canonicalizes_case() {
        let mut proposed = BTreeMap::new();
        proposed.insert("CUSTOMER".to_string(), vec!["CITY".to_string()]);

        let selected = filter_against_catalog(proposed, &catalog());
        assert_eq!(selected.by_table["customer"], vec!["city"]);
        assert_eq!(selected.qualified(), vec!["customer.city"]);
    }

    #[test]
    fn test_empty_survivors() {
        let mut proposed = BTreeMap::new();
        proposed.insert("phantom".to_string(), vec!["x".to_string()]);
        let selected = filter_against_catalog(proposed, &catalog());
        assert!(selected.by_table.is_empty());
    }
}
