// src/backends/general.rs
// The catch-all backend for questions that aren't data lookups or
// document lookups: general knowledge, clarification, small talk.

use async_trait::async_trait;

use super::openai_client::OpenAiClient;
use super::{AdapterError, GeneralBackend, TokenStream};

const SYSTEM_PROMPT: &str = "You are a helpful assistant answering a general question. \
Use the conversation context provided if relevant, and say so plainly when you don't know.";

pub struct LlmGeneralBackend {
    client: OpenAiClient,
}

impl LlmGeneralBackend {
    pub fn new(client: OpenAiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GeneralBackend for LlmGeneralBackend {
    fn name(&self) -> &'static str {
        "general"
    }

    async fn answer(&self, question: &str, context: &str) -> Result<TokenStream, AdapterError> {
        let user_content = if context.is_empty() {
            question.to_string()
        } else {
            format!("Context:\n{context}\n\nQuestion: {question}")
        };
        self.client.stream_chat(SYSTEM_PROMPT, &user_content).await
    }
}
