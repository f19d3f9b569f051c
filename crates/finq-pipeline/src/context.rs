//! Bounded context assembly
//!
//! Converts ranked retrieval hits into prompt text under a hard character
//! budget. Deterministic: the same hits and budget always render the same
//! block.

use finq_index::ScoredRecord;

/// A bounded-length context string for one granularity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextBlock {
    text: String,
}

impl ContextBlock {
    /// Concatenate formatted hit lines in rank order until the budget would
    /// be exceeded; the lowest-scored items are the ones dropped. An item
    /// landing exactly on the budget is kept.
    pub fn build(hits: &[ScoredRecord], budget_chars: usize) -> Self {
        let mut text = String::new();
        for hit in hits {
            let line = format!("- {}: {}", hit.record.identifier, hit.record.payload);
            let needed = line.len() + if text.is_empty() { 0 } else { 1 };
            if text.len() + needed > budget_chars {
                break;
            }
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&line);
        }
        Self { text }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Glue the three granularity blocks into the generation context.
pub fn combine_context(tables: &ContextBlock, rows: &ContextBlock, columns: &ContextBlock) -> String {
    let mut context = if tables.is_empty() {
        "No related tables/data found".to_string()
    } else {
        tables.text().to_string()
    };

    if !rows.is_empty() || !columns.is_empty() {
        context.push_str(
            "\n\nThe following are sample data from rows and columns in the tables above \
             to help you generate the SQL query:\n",
        );
        if !columns.is_empty() {
            context.push_str(columns.text());
            context.push('\n');
        }
        if !rows.is_empty() {
            context.push_str(rows.text());
        }
    }

    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use finq_index::{EmbeddingRecord, Granularity};
    use uuid::Uuid;

    fn hit(identifier: &str, payload: &str, score: f32) -> ScoredRecord {
        ScoredRecord {
            record: EmbeddingRecord {
                id: Uuid::new_v4(),
                granularity: Granularity::Table,
                identifier: identifier.to_string(),
                table: identifier.to_string(),
                column: None,
                payload: payload.to_string(),
                vector: vec![1.0],
            },
            score,
        }
    }

    #[test]
    fn test_build_keeps_rank_order() {
        let hits = vec![hit("a", "first", 0.9), hit("b", "second", 0.5)];
        let block = ContextBlock::build(&hits, 1000);
        assert_eq!(block.text(), "- a: first\n- b: second");
    }

    #[test]
    fn test_budget_drops_lowest_scored_first() {
        let hits = vec![
            hit("a", "xxxxxxxxxx", 0.9),
            hit("b", "yyyyyyyyyy", 0.8),
            hit("c", "zzzzzzzzzz", 0.1),
        ];
        // Each line is 15 chars; two lines plus separator need 31.
        let block = ContextBlock::build(&hits, 35);
        assert!(block.text().contains("- a:"));
        assert!(block.text().contains("- b:"));
        assert!(!block.text().contains("- c:"));
    }

    #[test]
    fn test_budget_invariant_holds_for_any_input_size() {
        let hits: Vec<ScoredRecord> = (0..500)
            .map(|i| hit(&format!("t{i}"), &"p".repeat(i % 40), 1.0 - i as f32 / 500.0))
            .collect();
        for budget in [0usize, 1, 10, 100, 1000] {
            let block = ContextBlock::build(&hits, budget);
            assert!(block.len() <= budget, "budget {budget} exceeded: {}", block.len());
        }
    }

    #[test]
    fn test_item_landing_exactly_on_budget_is_kept() {
        let hits = vec![hit("a", "1234", 0.9)];
        // "- a: 1234" is exactly 9 chars.
        let block = ContextBlock::build(&hits, 9);
        assert_eq!(block.text(), "- a: 1234");
    }

    #[test]
    fn test_build_is_deterministic() {
        let hits = vec![hit("a", "one", 0.9), hit("b", "two", 0.8)];
        assert_eq!(ContextBlock::build(&hits, 50), ContextBlock::build(&hits, 50));
    }

    #[test]
    fn test_combine_context_without_samples() {
        let tables = ContextBlock::build(&[hit("a", "desc", 0.9)], 100);
        let empty = ContextBlock::build(&[], 100);
        let combined = combine_context(&tables, &empty, &empty);
        assert_eq!(combined, "- a: desc");
    }

    #[test]
    fn test_combine_context_with_samples() {
        let tables = ContextBlock::build(&[hit("a", "desc", 0.9)], 100);
        let rows = ContextBlock::build(&[hit("a:row-0", "Row from table 'a': (x=1)", 0.7)], 100);
        let empty = ContextBlock::build(&[], 100);
        let combined = combine_context(&tables, &rows, &empty);
        assert!(combined.starts_with("- a: desc"));
        assert!(combined.contains("sample data"));
        assert!(combined.contains("Row from table 'a'"));
    }
}
