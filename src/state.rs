// src/state.rs
// Application state shared across HTTP handlers: the conversation store,
// the workflow engine (itself wrapping the classifier and the three
// backend adapters), and the join graph's derived vocabulary. Assembled
// once at startup and cloned (cheaply, via `Arc`) into every request.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::backends::general::LlmGeneralBackend;
use crate::backends::openai_client::OpenAiClient;
use crate::backends::rag::{LlmRagBackend, UnavailableDocumentRetriever};
use crate::backends::sql::{LlmSqlBackend, UnavailableSqlExecutor};
use crate::backends::{GeneralBackend, RagBackend, SqlBackend};
use crate::classifier::TaskClassifier;
use crate::config::QaConfig;
use crate::conversation::ConversationStore;
use crate::join_graph::{JoinGraph, JoinGraphSource};
use crate::workflow::WorkflowEngine;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<QaConfig>,
    pub store: Arc<ConversationStore>,
    pub join_graph: Arc<JoinGraph>,
    pub workflow: Arc<WorkflowEngine>,
}

impl AppState {
    /// Assemble application state from configuration. `join_graph_source`
    /// is the trait boundary a real schema-graph extractor plugs into
    /// (spec.md §1 Non-goal: this crate does not extract it); callers
    /// without one can pass `StaticJoinGraphSource(JoinGraph::empty())`.
    pub async fn new(config: QaConfig, join_graph_source: Arc<dyn JoinGraphSource>) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        info!("connecting conversation store at {}", config.database.url);
        let store = Arc::new(
            ConversationStore::connect(&config.database.url, config.database.max_connections, config.database.busy_timeout_ms)
                .await
                .context("failed to connect conversation store")?,
        );

        info!("loading join graph");
        let join_graph = Arc::new(join_graph_source.load().await.context("failed to load join graph")?);
        let vocabulary = join_graph.business_entity_vocabulary();
        info!(entities = vocabulary.len(), "derived business-entity vocabulary");

        let narrator = OpenAiClient::new(
            config.llm.api_key.clone(),
            config.llm.model.clone(),
            config.llm.temperature,
            config.llm.max_output_tokens,
        )
        .context("failed to construct OpenAI client")?;

        let classifier = Arc::new(TaskClassifier::new(vocabulary, Arc::new(narrator.clone())));

        let sql: Arc<dyn SqlBackend> = Arc::new(LlmSqlBackend::new(Arc::new(UnavailableSqlExecutor), narrator.clone()));
        let rag: Arc<dyn RagBackend> = Arc::new(LlmRagBackend::new(Arc::new(UnavailableDocumentRetriever), narrator.clone()));
        let general: Arc<dyn GeneralBackend> = Arc::new(LlmGeneralBackend::new(narrator));

        let workflow = Arc::new(WorkflowEngine::with_history_limit(
            sql,
            rag,
            general,
            classifier,
            store.clone(),
            config.backends.clone(),
            config.memory.query_result_memory_size,
            config.memory.followup_max_context_tokens,
            config.memory.max_conversation_messages,
        ));

        Ok(Self { config: Arc::new(config), store, join_graph, workflow })
    }
}
