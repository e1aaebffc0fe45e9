// src/join_graph.rs
// The schema relationship graph the classifier and SQL backend consult to
// recognize business-entity vocabulary ("customers", "orders placed last
// month"). Extracting this graph from a live database is out of scope
// here (spec Non-goal) — this module only defines the shape consumed at
// runtime and a trait boundary (`JoinGraphSource`) so a real extractor can
// be plugged in without touching the classifier or SQL backend.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableNode {
    pub name: String,
    pub columns: Vec<String>,
    /// Columns (or column combinations, flattened) known to uniquely
    /// identify a row in this table.
    #[serde(default)]
    pub unique_columns: Vec<String>,
}

impl TableNode {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self { name: name.into(), columns, unique_columns: Vec::new() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    ForeignKey,
    Heuristic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    OneToOne,
    NToOne,
    OneToN,
    NToN,
    Unknown,
}

/// A directed link between two tables discovered by schema introspection
/// (foreign key) or by inference over naming/data patterns (heuristic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    #[serde(rename = "type")]
    pub kind: RelationshipType,
    pub confidence: f32,
    pub cardinality: Cardinality,
    pub evidence: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinGraph {
    pub tables: Vec<TableNode>,
    pub relationships: Vec<Relationship>,
}

/// Tables that are part of the schema but never meaningful business
/// vocabulary — migration bookkeeping, sync/audit logs. Excluded from the
/// classifier's entity list regardless of how the rest of truncation
/// shakes out (spec.md §4.5/§9).
const SYSTEM_TABLE_DENYLIST: &[&str] = &[
    "schema_migrations",
    "migrations",
    "_sqlx_migrations",
    "sync_log",
    "audit_log",
    "flyway_schema_history",
];

/// Business entities known to be worth prioritizing in the classifier's
/// vocabulary ahead of the bound on its total size, when present in the
/// graph. Curated rather than derived — spec.md §9 calls this a "curated
/// priority list".
const PRIORITY_TABLES: &[&str] = &[
    "customers", "orders", "invoices", "work_orders", "inspections", "technicians", "assets",
    "accounts", "contracts", "employees", "locations",
];

/// Default cap on the classifier's vocabulary, beyond the always-included
/// priority tables, per spec.md §9 ("truncate to a bounded cardinality
/// (default 10 + priorities)").
const DEFAULT_VOCABULARY_BUDGET: usize = 10;

impl JoinGraph {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Table and column names, lowercased and deduplicated, used by the
    /// classifier as the vocabulary that marks a question as data-shaped.
    /// System tables are excluded; priority tables are always included;
    /// the remainder is truncated to `DEFAULT_VOCABULARY_BUDGET` entries.
    /// Computed once at startup and cached by the caller — the graph
    /// itself never changes over a process lifetime.
    pub fn business_entity_vocabulary(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut priority = Vec::new();
        let mut rest = Vec::new();

        for table in self.business_tables() {
            let name = table.name.to_lowercase();
            let is_priority = PRIORITY_TABLES.contains(&name.as_str());
            for term in std::iter::once(name.clone()).chain(table.columns.iter().map(|c| c.to_lowercase())) {
                if !seen.insert(term.clone()) {
                    continue;
                }
                if is_priority {
                    priority.push(term);
                } else {
                    rest.push(term);
                }
            }
        }

        rest.truncate(DEFAULT_VOCABULARY_BUDGET);
        priority.extend(rest);
        priority
    }

    /// Tables minus the deny-listed system tables.
    fn business_tables(&self) -> impl Iterator<Item = &TableNode> {
        self.tables
            .iter()
            .filter(|t| !SYSTEM_TABLE_DENYLIST.contains(&t.name.to_lowercase().as_str()))
    }

    pub fn table(&self, name: &str) -> Option<&TableNode> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Relationships originating at `table`, for a SQL backend picking a
    /// join path.
    pub fn relationships_from(&self, table: &str) -> Vec<&Relationship> {
        self.relationships.iter().filter(|r| r.from_table.eq_ignore_ascii_case(table)).collect()
    }
}

/// Source of the join graph at startup. The real implementation would
/// introspect a connected database's schema and foreign keys; tests and
/// this crate's default wiring use a static in-memory graph instead.
#[async_trait]
pub trait JoinGraphSource: Send + Sync {
    async fn load(&self) -> anyhow::Result<JoinGraph>;
}

pub struct StaticJoinGraphSource(pub JoinGraph);

#[async_trait]
impl JoinGraphSource for StaticJoinGraphSource {
    async fn load(&self) -> anyhow::Result<JoinGraph> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, columns: &[&str]) -> TableNode {
        TableNode::new(name, columns.iter().map(|c| c.to_string()).collect())
    }

    #[test]
    fn vocabulary_is_deduplicated_and_lowercased() {
        let graph = JoinGraph {
            tables: vec![
                table("Customers", &["CustomerId", "Name"]),
                table("Orders", &["CustomerId", "Total"]),
            ],
            relationships: vec![],
        };

        let vocab = graph.business_entity_vocabulary();
        assert_eq!(vocab.iter().filter(|v| *v == "customerid").count(), 1);
        assert!(vocab.contains(&"customers".to_string()));
        assert!(vocab.contains(&"orders".to_string()));
    }

    #[test]
    fn system_tables_are_excluded() {
        let graph = JoinGraph {
            tables: vec![table("customers", &["id"]), table("schema_migrations", &["version"])],
            relationships: vec![],
        };

        let vocab = graph.business_entity_vocabulary();
        assert!(!vocab.contains(&"schema_migrations".to_string()));
        assert!(!vocab.contains(&"version".to_string()));
    }

    #[test]
    fn priority_tables_always_survive_truncation() {
        let mut tables: Vec<TableNode> =
            (0..30).map(|i| table(&format!("table_{i}"), &[])).collect();
        tables.push(table("customers", &["customer_id"]));

        let graph = JoinGraph { tables, relationships: vec![] };
        let vocab = graph.business_entity_vocabulary();

        assert!(vocab.contains(&"customers".to_string()));
        assert!(vocab.len() <= DEFAULT_VOCABULARY_BUDGET + PRIORITY_TABLES.len() * 2);
    }

    #[test]
    fn relationships_from_filters_by_source_table() {
        let graph = JoinGraph {
            tables: vec![table("orders", &["customer_id"]), table("customers", &["id"])],
            relationships: vec![Relationship {
                from_table: "orders".into(),
                from_column: "customer_id".into(),
                to_table: "customers".into(),
                to_column: "id".into(),
                kind: RelationshipType::ForeignKey,
                confidence: 1.0,
                cardinality: Cardinality::NToOne,
                evidence: "foreign key constraint".into(),
            }],
        };

        assert_eq!(graph.relationships_from("orders").len(), 1);
        assert_eq!(graph.relationships_from("customers").len(), 0);
    }
}
