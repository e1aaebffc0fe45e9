// src/backends/sql.rs
// The SQL backend answers data-shaped questions. Translating a question
// into SQL and executing it are explicitly out of scope here (spec
// Non-goal: "producing SQL") — `SqlExecutor` is the trait boundary a real
// NL-to-SQL translator plugs into. This backend's own job is just to turn
// whatever rows the executor returns into a streamed, narrated answer.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::openai_client::OpenAiClient;
use super::{AdapterError, SqlAnswer, SqlBackend};

/// What a SQL executor produces: the generated SQL, the resulting rows
/// (already capped to the configured row limit), and the table names it
/// consulted, for `QueryResult::tables_used`.
pub struct ExecutedQuery {
    pub sql: String,
    pub rows: Vec<Map<String, Value>>,
    pub tables_used: Vec<String>,
}

#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Translate `question` into SQL and run it.
    async fn execute(&self, question: &str, context: &str) -> Result<ExecutedQuery, AdapterError>;
}

/// Stand-in for the NL-to-SQL translator and its schema graph, which
/// spec.md §1 explicitly treats as an external collaborator out of scope
/// for this crate. Used when no real executor is wired in so the `sql`
/// route still reaches `finalize` with a textual error, per spec.md §7
/// item 1, instead of the binary failing to start.
pub struct UnavailableSqlExecutor;

#[async_trait]
impl SqlExecutor for UnavailableSqlExecutor {
    async fn execute(&self, _question: &str, _context: &str) -> Result<ExecutedQuery, AdapterError> {
        Err(AdapterError::ProviderUnavailable(
            "no SQL executor is configured for this deployment".to_string(),
        ))
    }
}

pub struct LlmSqlBackend {
    executor: Arc<dyn SqlExecutor>,
    narrator: OpenAiClient,
}

impl LlmSqlBackend {
    pub fn new(executor: Arc<dyn SqlExecutor>, narrator: OpenAiClient) -> Self {
        Self { executor, narrator }
    }
}

const NARRATION_PROMPT: &str = "You are summarizing the result of a database query for a \
non-technical reader. Describe what the data shows in plain language. Do not mention SQL \
or the query itself unless asked.";

#[async_trait]
impl SqlBackend for LlmSqlBackend {
    fn name(&self) -> &'static str {
        "sql"
    }

    async fn answer(&self, question: &str, context: &str) -> Result<SqlAnswer, AdapterError> {
        let ExecutedQuery { sql, rows, tables_used } = self.executor.execute(question, context).await?;

        let rows_preview = serde_json::to_string(&rows.iter().take(20).collect::<Vec<_>>())
            .unwrap_or_default();
        let user_content = format!(
            "Question: {question}\nRow count: {}\nRows (preview): {rows_preview}",
            rows.len()
        );

        let stream = self.narrator.stream_chat(NARRATION_PROMPT, &user_content).await?;

        Ok(SqlAnswer { sql, rows, tables_used, stream })
    }
}
