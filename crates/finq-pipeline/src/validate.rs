//! Static SQL validation
//!
//! The safety boundary between the generator and the engine: the statement
//! must parse, must be read-only (SELECT-class), and may reference only
//! identifiers present in the catalog snapshot for this request. Pure and
//! deterministic given the same SQL and snapshot.

use std::collections::HashSet;
use std::ops::ControlFlow;

use sqlparser::ast::{
    visit_expressions, visit_relations, Expr, ObjectName, Query, SelectItem, SetExpr, Statement,
    TableFactor,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use finq_catalog::Catalog;

/// Outcome of static validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub ok: bool,
    pub reason: Option<String>,
}

impl ValidationOutcome {
    fn pass() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
        }
    }
}

/// Names and structure collected from a query before identifier checks.
#[derive(Default)]
struct QueryScope {
    /// CTE names, legal as relations.
    ctes: HashSet<String>,
    /// Projection aliases and CTE column aliases, legal as bare identifiers.
    aliases: HashSet<String>,
    /// Derived tables or table functions present: column-level checking is
    /// skipped because their output columns are not statically known.
    opaque: bool,
    select_into: bool,
}

impl QueryScope {
    fn walk_query(&mut self, query: &Query) {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.ctes.insert(cte.alias.name.value.to_ascii_lowercase());
                for column in &cte.alias.columns {
                    self.aliases.insert(column.value.to_ascii_lowercase());
                }
                self.walk_query(&cte.query);
            }
        }
        self.walk_set_expr(&query.body);
    }

    fn walk_set_expr(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(select) => {
                if select.into.is_some() {
                    self.select_into = true;
                }
                for item in &select.projection {
                    if let SelectItem::ExprWithAlias { alias, .. } = item {
                        self.aliases.insert(alias.value.to_ascii_lowercase());
                    }
                }
                for table in &select.from {
                    self.walk_table_factor(&table.relation);
                    for join in &table.joins {
                        self.walk_table_factor(&join.relation);
                    }
                }
            }
            SetExpr::Query(query) => self.walk_query(query),
            SetExpr::SetOperation { left, right, .. } => {
                self.walk_set_expr(left);
                self.walk_set_expr(right);
            }
            _ => {}
        }
    }

    fn walk_table_factor(&mut self, factor: &TableFactor) {
        match factor {
            TableFactor::Table { args, .. } => {
                if args.is_some() {
                    self.opaque = true;
                }
            }
            TableFactor::Derived { subquery, .. } => {
                self.opaque = true;
                self.walk_query(subquery);
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => {
                self.walk_table_factor(&table_with_joins.relation);
                for join in &table_with_joins.joins {
                    self.walk_table_factor(&join.relation);
                }
            }
            _ => self.opaque = true,
        }
    }
}

fn statement_kind(statement: &Statement) -> &'static str {
    match statement {
        Statement::Insert { .. } => "INSERT",
        Statement::Update { .. } => "UPDATE",
        Statement::Delete { .. } => "DELETE",
        Statement::Drop { .. } => "DROP",
        Statement::AlterTable { .. } | Statement::AlterIndex { .. } => "ALTER",
        Statement::CreateTable { .. }
        | Statement::CreateView { .. }
        | Statement::CreateIndex { .. } => "CREATE",
        Statement::Truncate { .. } => "TRUNCATE",
        Statement::Merge { .. } => "MERGE",
        Statement::Copy { .. } => "COPY",
        _ => "a non-SELECT statement",
    }
}

/// Relations the engine itself provides; read-only by construction, and
/// needed so questions about the database (table counts, column counts)
/// validate. Their columns are not statically known, so referencing one
/// turns column-level checking off.
fn is_metadata_relation(name: &ObjectName) -> bool {
    let first = name.0[0].value.to_ascii_lowercase();
    let last = name.0[name.0.len() - 1].value.to_ascii_lowercase();
    first == "information_schema" || last.starts_with("duckdb_") || last.starts_with("pragma_")
}

/// Validate one generated statement against the catalog snapshot.
pub fn validate(sql: &str, catalog: &Catalog) -> ValidationOutcome {
    let statements = match Parser::parse_sql(&GenericDialect {}, sql) {
        Ok(statements) => statements,
        Err(e) => return ValidationOutcome::fail(format!("SQL does not parse: {e}")),
    };

    if statements.len() != 1 {
        return ValidationOutcome::fail(format!(
            "expected exactly one SQL statement, found {}",
            statements.len()
        ));
    }
    let statement = &statements[0];

    let query = match statement {
        Statement::Query(query) => query,
        other => {
            return ValidationOutcome::fail(format!(
                "rejected for safety reasons: only read-only SELECT statements may run \
                 (found {})",
                statement_kind(other)
            ))
        }
    };

    let mut scope = QueryScope::default();
    scope.walk_query(query);

    if scope.select_into {
        return ValidationOutcome::fail(
            "rejected for safety reasons: SELECT INTO writes a table",
        );
    }

    // Table-level grounding.
    let mut referenced_tables: Vec<String> = Vec::new();
    let mut metadata_referenced = false;
    let mut unknown_table: Option<String> = None;

    visit_relations(statement, |name: &ObjectName| {
        if name.0.is_empty() {
            return ControlFlow::<()>::Continue(());
        }
        if is_metadata_relation(name) {
            metadata_referenced = true;
            return ControlFlow::Continue(());
        }
        let bare = name.0[name.0.len() - 1].value.clone();
        if scope.ctes.contains(&bare.to_ascii_lowercase()) {
            return ControlFlow::Continue(());
        }
        if catalog.contains_table(&bare) {
            referenced_tables.push(bare);
        } else if unknown_table.is_none() {
            unknown_table = Some(bare);
        }
        ControlFlow::Continue(())
    });

    if let Some(table) = unknown_table {
        return ValidationOutcome::fail(format!("unknown table: {table}"));
    }

    // Column-level grounding: only when every relation's columns are known.
    if !scope.opaque && !metadata_referenced {
        let mut known: HashSet<String> = scope.aliases;
        for table in &referenced_tables {
            if let Some(schema) = catalog.table(table) {
                for column in &schema.columns {
                    known.insert(column.name.to_ascii_lowercase());
                }
            }
        }

        let mut unknown_column: Option<String> = None;
        visit_expressions(statement, |expr: &Expr| {
            let candidate = match expr {
                Expr::Identifier(ident) => Some(&ident.value),
                Expr::CompoundIdentifier(parts) if !parts.is_empty() => {
                    Some(&parts[parts.len() - 1].value)
                }
                _ => None,
            };
            if let Some(name) = candidate {
                if !known.contains(&name.to_ascii_lowercase()) && unknown_column.is_none() {
                    unknown_column = Some(name.clone());
                }
            }
            ControlFlow::<()>::Continue(())
        });

        if let Some(column) = unknown_column {
            return ValidationOutcome::fail(format!("unknown column: {column}"));
        }
    }

    ValidationOutcome::pass()
}
