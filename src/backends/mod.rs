// src/backends/mod.rs
// The uniform contract the workflow engine dispatches through, regardless
// of which of the three backends answered. Modeled directly on the
// teacher's `LlmProvider` trait: one `name()`, one async entry point that
// returns a token stream, errors folded into a single enum at the
// boundary instead of leaking provider-specific failure types upward.

pub mod general;
pub mod openai_client;
pub mod rag;
pub mod sql;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::event::Channel;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("failed to generate SQL for the question: {0}")]
    SqlGeneration(String),
    #[error("SQL execution failed: {0}")]
    SqlExecution(String),
    #[error("could not resolve a business entity in the question: {0}")]
    DomainResolution(String),
    #[error("document retrieval failed: {0}")]
    RagRetrieval(String),
    #[error("backend provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("backend call timed out")]
    Timeout,
}

#[derive(Debug, Clone)]
pub struct AdapterToken {
    pub channel: Channel,
    pub content: String,
}

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<AdapterToken, AdapterError>> + Send>>;

/// What the SQL backend produced, separate from its streamed narration,
/// so the caller can push a `QueryResult` into memory before the stream
/// finishes.
pub struct SqlAnswer {
    pub sql: String,
    pub rows: Vec<Map<String, Value>>,
    pub tables_used: Vec<String>,
    pub stream: TokenStream,
}

pub struct RagAnswer {
    pub tables_used: Vec<String>,
    pub stream: TokenStream,
}

#[async_trait]
pub trait SqlBackend: Send + Sync {
    fn name(&self) -> &'static str;
    async fn answer(&self, question: &str, context: &str) -> Result<SqlAnswer, AdapterError>;
}

#[async_trait]
pub trait RagBackend: Send + Sync {
    fn name(&self) -> &'static str;
    async fn answer(&self, question: &str, context: &str) -> Result<RagAnswer, AdapterError>;
}

#[async_trait]
pub trait GeneralBackend: Send + Sync {
    fn name(&self) -> &'static str;
    async fn answer(&self, question: &str, context: &str) -> Result<TokenStream, AdapterError>;
}
