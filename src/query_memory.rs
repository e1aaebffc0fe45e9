// src/query_memory.rs
// Bounded, FIFO memory of recent SQL-backend results, carried inside
// `WorkflowState` so a follow-up question ("and what about the total?")
// can reference a prior result's identifiers without re-running the query.
// Token estimation follows the teacher's "1 token ~= 4 chars" heuristic
// (no real tokenizer dependency, same tradeoff the teacher makes in its
// context-budget config).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const CHARS_PER_TOKEN: usize = 4;
/// How many representative values to show per ID column before
/// collapsing the remainder into a count.
const MAX_ID_SAMPLES: usize = 5;
/// How many sample rows to render per result when `include_samples` is set.
const MAX_SAMPLE_ROWS: usize = 2;
/// How many columns a sample row is truncated to.
const MAX_SAMPLE_COLUMNS: usize = 6;

/// The result of a single SQL-backend execution, as much as is needed to
/// reconstruct context for a later turn. `identifiers` is derived at
/// construction time and frozen thereafter, matching spec.md's data model
/// for `QueryResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub question: String,
    pub structured_data: Vec<Map<String, Value>>,
    pub sql_query: Option<String>,
    pub tables_used: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub row_count: usize,
    identifiers: BTreeMap<String, Vec<Value>>,
}

impl QueryResult {
    pub fn new(
        question: impl Into<String>,
        structured_data: Vec<Map<String, Value>>,
        sql_query: Option<String>,
        tables_used: Vec<String>,
    ) -> Self {
        let row_count = structured_data.len();
        let identifiers = extract_identifiers(&structured_data);
        Self {
            question: question.into(),
            structured_data,
            sql_query,
            tables_used,
            timestamp: Utc::now(),
            row_count,
            identifiers,
        }
    }

    /// Column name -> unique non-null values, for every column whose name
    /// is exactly "id" or ends in "id"/"Id". Computed once at construction;
    /// this accessor just hands back the frozen map.
    pub fn identifiers(&self) -> &BTreeMap<String, Vec<Value>> {
        &self.identifiers
    }
}

/// Scans every row for columns ending in "id"/"Id" (or named exactly
/// "id"), deduplicating non-null values per column in first-seen order.
fn extract_identifiers(rows: &[Map<String, Value>]) -> BTreeMap<String, Vec<Value>> {
    let mut out: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for row in rows {
        for (col, val) in row {
            if val.is_null() {
                continue;
            }
            let is_id_column = col == "id" || col.ends_with("id") || col.ends_with("Id");
            if !is_id_column {
                continue;
            }
            let values = out.entry(col.clone()).or_default();
            if !values.contains(val) {
                values.push(val.clone());
            }
        }
    }
    out
}

/// A capacity-bounded FIFO of `QueryResult`s. Pushing past capacity evicts
/// the oldest entry, matching spec.md's "most recent N results" contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResultMemory {
    capacity: usize,
    entries: std::collections::VecDeque<QueryResult>,
}

/// Plain JSON-compatible shape for `to_serializable`/`from_serializable`,
/// preserving insertion order.
pub type SerializableMemory = Vec<QueryResult>;

impl QueryResultMemory {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), entries: std::collections::VecDeque::new() }
    }

    /// Constructs a `QueryResult` and appends it, evicting the oldest
    /// entry if over capacity. A no-op when `structured_data` is empty.
    pub fn add(
        &mut self,
        question: impl Into<String>,
        structured_data: Vec<Map<String, Value>>,
        sql_query: Option<String>,
        tables_used: Vec<String>,
    ) {
        if structured_data.is_empty() {
            return;
        }
        self.push(QueryResult::new(question, structured_data, sql_query, tables_used));
    }

    /// Appends an already-constructed result. Still a no-op when its
    /// `structured_data` is empty, so callers that build a `QueryResult`
    /// directly get the same guarantee as `add`.
    pub fn push(&mut self, result: QueryResult) {
        if result.structured_data.is_empty() {
            return;
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(result);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&QueryResult> {
        self.entries.back()
    }

    /// The last `n` results, most recent first.
    pub fn recent(&self, n: usize) -> Vec<&QueryResult> {
        self.entries.iter().rev().take(n).collect()
    }

    /// Unions the `identifiers` maps of the last `n` results, deduplicating
    /// values per column across results.
    pub fn all_identifiers(&self, n: usize) -> BTreeMap<String, Vec<Value>> {
        let mut out: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for result in self.recent(n) {
            for (col, values) in result.identifiers() {
                let entry = out.entry(col.clone()).or_default();
                for v in values {
                    if !entry.contains(v) {
                        entry.push(v.clone());
                    }
                }
            }
        }
        out
    }

    /// Render the remembered results as a plain-text context block for the
    /// classifier or a backend prompt, degrading gracefully under
    /// `max_tokens`: first drop sample rows, then shrink the window of
    /// results considered (`n` decreases monotonically, so the recursion
    /// this models is bounded).
    pub fn format_context(&self, n: usize, max_tokens: usize, include_samples: bool) -> String {
        if self.entries.is_empty() || n == 0 {
            return String::new();
        }

        let rendered = self.render_last_n(n, include_samples);
        if estimated_tokens(&rendered) <= max_tokens {
            return rendered;
        }

        if include_samples {
            let without_samples = self.render_last_n(n, false);
            if estimated_tokens(&without_samples) <= max_tokens {
                return without_samples;
            }
            return self.shrink_window(n, max_tokens);
        }

        self.shrink_window(n, max_tokens)
    }

    fn shrink_window(&self, n: usize, max_tokens: usize) -> String {
        let mut n = n;
        while n > 1 {
            n -= 1;
            let shrunk = self.render_last_n(n, false);
            if estimated_tokens(&shrunk) <= max_tokens {
                return shrunk;
            }
        }
        self.render_last_n(1, false)
    }

    fn render_last_n(&self, n: usize, include_samples: bool) -> String {
        let available = self.entries.len().min(n);
        let skip = self.entries.len().saturating_sub(available);

        let mut out = String::from("Recent query results:\n");
        for (i, result) in self.entries.iter().skip(skip).enumerate() {
            out.push_str(&format!(
                "[{}] question: {}\n    tables used: {}\n    rows: {}\n",
                i + 1,
                result.question,
                if result.tables_used.is_empty() {
                    "(unknown)".to_string()
                } else {
                    result.tables_used.join(", ")
                },
                result.row_count,
            ));

            for (col, values) in result.identifiers() {
                let shown: Vec<String> =
                    values.iter().take(MAX_ID_SAMPLES).map(value_to_string).collect();
                let remainder = values.len().saturating_sub(MAX_ID_SAMPLES);
                if remainder > 0 {
                    out.push_str(&format!(
                        "    {col}: {} (+{remainder} more)\n",
                        shown.join(", ")
                    ));
                } else {
                    out.push_str(&format!("    {col}: {}\n", shown.join(", ")));
                }
            }

            if include_samples {
                for row in result.structured_data.iter().take(MAX_SAMPLE_ROWS) {
                    let truncated: Map<String, Value> =
                        row.iter().take(MAX_SAMPLE_COLUMNS).map(|(k, v)| (k.clone(), v.clone())).collect();
                    out.push_str(&format!(
                        "    sample: {}\n",
                        serde_json::to_string(&truncated).unwrap_or_default()
                    ));
                }
            }
        }
        out
    }

    /// JSON-compatible round-trip shape preserving insertion order.
    pub fn to_serializable(&self) -> SerializableMemory {
        self.entries.iter().cloned().collect()
    }

    pub fn from_serializable(capacity: usize, entries: SerializableMemory) -> Self {
        let mut memory = Self::new(capacity);
        for entry in entries {
            memory.entries.push_back(entry);
        }
        memory
    }
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn estimated_tokens(text: &str) -> usize {
    text.len() / CHARS_PER_TOKEN
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(id: &str, name: &str) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("customerId".to_string(), json!(id));
        m.insert("name".to_string(), json!(name));
        m
    }

    #[test]
    fn evicts_oldest_past_capacity() {
        let mut mem = QueryResultMemory::new(2);
        mem.add("q1", vec![row("1", "a")], Some("select 1".into()), vec!["customers".into()]);
        mem.add("q2", vec![row("2", "b")], Some("select 2".into()), vec!["customers".into()]);
        mem.add("q3", vec![row("3", "c")], Some("select 3".into()), vec!["customers".into()]);

        assert_eq!(mem.len(), 2);
        assert_eq!(mem.latest().unwrap().question, "q3");
    }

    #[test]
    fn add_with_empty_structured_data_is_a_no_op() {
        let mut mem = QueryResultMemory::new(5);
        mem.add("empty", vec![], Some("select 1".into()), vec![]);
        assert!(mem.is_empty());
    }

    #[test]
    fn capacity_matches_testable_property() {
        let mut mem = QueryResultMemory::new(3);
        for i in 0..7 {
            mem.add(format!("q{i}"), vec![row(&i.to_string(), "n")], None, vec![]);
        }
        assert_eq!(mem.len(), 3);
        let recent = mem.recent(3);
        assert_eq!(recent[0].question, "q6");
        assert_eq!(recent[2].question, "q4");
    }

    #[test]
    fn identifiers_extracts_id_suffixed_columns_deduped() {
        let result = QueryResult::new(
            "who are the customers",
            vec![row("1", "a"), row("1", "a-dup"), row("2", "b")],
            Some("select * from customers".into()),
            vec!["customers".into()],
        );
        let ids = result.identifiers();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids.get("customerId").unwrap(), &vec![json!("1"), json!("2")]);
    }

    #[test]
    fn identifiers_skip_null_values() {
        let mut row_with_null = Map::new();
        row_with_null.insert("customerId".to_string(), Value::Null);
        let result = QueryResult::new("q", vec![row_with_null], None, vec![]);
        assert!(result.identifiers().is_empty());
    }

    #[test]
    fn all_identifiers_unions_across_recent_results() {
        let mut mem = QueryResultMemory::new(5);
        mem.add("q1", vec![row("1", "a")], None, vec![]);
        mem.add("q2", vec![row("2", "b")], None, vec![]);

        let union = mem.all_identifiers(2);
        assert_eq!(union.get("customerId").unwrap(), &vec![json!("2"), json!("1")]);
    }

    #[test]
    fn format_context_includes_question_and_tables() {
        let mut mem = QueryResultMemory::new(5);
        mem.add("how many customers?", vec![row("1", "a")], None, vec!["customers".into()]);

        let context = mem.format_context(5, 10_000, true);
        assert!(context.contains("how many customers?"));
        assert!(context.contains("customers"));
        assert!(context.contains("customerId: 1"));
    }

    #[test]
    fn format_context_degrades_under_tight_budget() {
        let mut mem = QueryResultMemory::new(5);
        for i in 0..5 {
            mem.add(
                format!("question {i}"),
                vec![row(&i.to_string(), &format!("name-{i}"))],
                None,
                vec![],
            );
        }

        let generous = mem.format_context(5, 10_000, true);
        let tight = mem.format_context(5, 5, true);

        assert!(tight.len() <= generous.len());
        assert!(!tight.contains("sample:"));
    }

    #[test]
    fn format_context_shrinks_window_when_still_over_budget() {
        let mut mem = QueryResultMemory::new(5);
        for i in 0..5 {
            mem.add(
                format!("a rather long question about entity number {i}"),
                vec![row(&i.to_string(), &format!("name-{i}"))],
                None,
                vec!["t".into()],
            );
        }

        let tiny = mem.format_context(5, 12, false);
        // Bounded: always resolves to at least the single latest entry.
        assert!(tiny.contains("question 4"));
    }

    #[test]
    fn empty_memory_formats_to_empty_string() {
        let mem = QueryResultMemory::new(3);
        assert_eq!(mem.format_context(5, 1000, true), "");
    }

    #[test]
    fn serializable_round_trip_preserves_order() {
        let mut mem = QueryResultMemory::new(5);
        mem.add("q1", vec![row("1", "a")], Some("select 1".into()), vec!["customers".into()]);
        mem.add("q2", vec![row("2", "b")], None, vec![]);

        let serialized = mem.to_serializable();
        let restored = QueryResultMemory::from_serializable(5, serialized);

        assert_eq!(restored.len(), mem.len());
        assert_eq!(restored.recent(2)[0].question, mem.recent(2)[0].question);
        assert_eq!(restored.recent(2)[1].question, mem.recent(2)[1].question);
    }
}
