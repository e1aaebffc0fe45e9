// src/backends/rag.rs
// The RAG backend answers document-shaped questions. Retrieval itself
// (embeddings, vector store) is out of scope here (spec Non-goal) —
// `DocumentRetriever` is the trait boundary a real retrieval pipeline
// plugs into. This backend turns whatever passages come back into a
// streamed, cited answer.

use std::sync::Arc;

use async_trait::async_trait;

use super::openai_client::OpenAiClient;
use super::{AdapterError, RagAnswer, RagBackend};

#[derive(Debug, Clone)]
pub struct RetrievedPassage {
    pub source: String,
    pub text: String,
}

#[async_trait]
pub trait DocumentRetriever: Send + Sync {
    async fn retrieve(&self, question: &str, context: &str) -> Result<Vec<RetrievedPassage>, AdapterError>;
}

/// Stand-in for the vector store and embedding cache backing retrieval,
/// which spec.md §1 explicitly treats as an external collaborator out of
/// scope for this crate. Used when no real retriever is wired in.
pub struct UnavailableDocumentRetriever;

#[async_trait]
impl DocumentRetriever for UnavailableDocumentRetriever {
    async fn retrieve(&self, _question: &str, _context: &str) -> Result<Vec<RetrievedPassage>, AdapterError> {
        Err(AdapterError::ProviderUnavailable(
            "no document retriever is configured for this deployment".to_string(),
        ))
    }
}

pub struct LlmRagBackend {
    retriever: Arc<dyn DocumentRetriever>,
    narrator: OpenAiClient,
}

impl LlmRagBackend {
    pub fn new(retriever: Arc<dyn DocumentRetriever>, narrator: OpenAiClient) -> Self {
        Self { retriever, narrator }
    }
}

const NARRATION_PROMPT: &str = "Answer the question using only the provided passages. \
Cite the source of each claim by name. If the passages don't answer the question, say so.";

#[async_trait]
impl RagBackend for LlmRagBackend {
    fn name(&self) -> &'static str {
        "rag"
    }

    async fn answer(&self, question: &str, context: &str) -> Result<RagAnswer, AdapterError> {
        let passages = self.retriever.retrieve(question, context).await?;
        if passages.is_empty() {
            return Err(AdapterError::RagRetrieval("no relevant passages found".to_string()));
        }

        let tables_used: Vec<String> = passages.iter().map(|p| p.source.clone()).collect();
        let passages_text = passages
            .iter()
            .map(|p| format!("[{}] {}", p.source, p.text))
            .collect::<Vec<_>>()
            .join("\n\n");

        let user_content = format!("Question: {question}\n\nPassages:\n{passages_text}");
        let stream = self.narrator.stream_chat(NARRATION_PROMPT, &user_content).await?;

        Ok(RagAnswer { tables_used, stream })
    }
}
