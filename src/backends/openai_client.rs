// src/backends/openai_client.rs
// Minimal streaming chat-completion client. Grounded on the teacher's
// `llm::provider::openai` (request shape, bearer auth, status-code error
// mapping) and `llm::provider::stream::StreamEvent::from_sse_line` (line
// parsing, `[DONE]` sentinel). Chat-completions deltas are flatter than
// the teacher's Responses-API events, so the parser here is simpler: a
// `choices[0].delta.content` text field, plus an optional
// `reasoning_content` field some OpenAI-compatible providers populate.

use std::time::Duration;

use async_stream::stream;
use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::event::Channel;

use super::{AdapterError, AdapterToken, TokenStream};

const BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    model: String,
    temperature: f32,
    max_output_tokens: usize,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: usize,
    stream: bool,
}

impl OpenAiClient {
    pub fn new(api_key: String, model: String, temperature: f32, max_output_tokens: usize) -> anyhow::Result<Self> {
        if api_key.trim().is_empty() {
            anyhow::bail!("OpenAI API key is required");
        }
        let client = Client::builder().timeout(Duration::from_secs(120)).build()?;
        Ok(Self { client, api_key, model, temperature, max_output_tokens })
    }

    /// Stream a completion for `system_prompt` + `user_content`, yielding
    /// `Final`-channel tokens as they arrive.
    pub async fn stream_chat(&self, system_prompt: &str, user_content: &str) -> Result<TokenStream, AdapterError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system_prompt },
                ChatMessage { role: "user", content: user_content },
            ],
            temperature: self.temperature,
            max_tokens: self.max_output_tokens,
            stream: true,
        };

        let response = self
            .client
            .post(format!("{BASE_URL}/chat/completions"))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| AdapterError::ProviderUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            crate::metrics::record_llm_call(&self.model, false);
            let body = response.text().await.unwrap_or_default();
            let message = match status.as_u16() {
                401 => "invalid OpenAI API key".to_string(),
                429 => "rate limit exceeded".to_string(),
                _ => format!("OpenAI request failed ({status}): {body}"),
            };
            return Err(AdapterError::ProviderUnavailable(message));
        }
        crate::metrics::record_llm_call(&self.model, true);

        let mut bytes_stream = response.bytes_stream();

        let token_stream = stream! {
            let mut buffer = String::new();
            while let Some(chunk) = bytes_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(AdapterError::ProviderUnavailable(e.to_string()));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline_pos) = buffer.find('\n') {
                    let line = buffer[..newline_pos].trim_end_matches('\r').to_string();
                    buffer.drain(..=newline_pos);
                    if let Some(token) = parse_sse_line(&line) {
                        yield Ok(token);
                    }
                }
            }
        };

        Ok(Box::pin(token_stream))
    }

    /// Single non-streamed completion, used by the classifier's LLM
    /// fallback where a one-word reply is all that's needed.
    pub async fn complete(&self, system_prompt: &str, user_content: &str) -> Result<String, AdapterError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system_prompt },
                ChatMessage { role: "user", content: user_content },
            ],
            temperature: self.temperature,
            max_tokens: self.max_output_tokens,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{BASE_URL}/chat/completions"))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| AdapterError::ProviderUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            crate::metrics::record_llm_call(&self.model, false);
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::ProviderUnavailable(format!(
                "OpenAI request failed ({status}): {body}"
            )));
        }
        crate::metrics::record_llm_call(&self.model, true);

        let body: Value = response
            .json()
            .await
            .map_err(|e| AdapterError::ProviderUnavailable(e.to_string()))?;

        body.pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| AdapterError::ProviderUnavailable("empty completion response".to_string()))
    }
}

fn parse_sse_line(line: &str) -> Option<AdapterToken> {
    let data = line.strip_prefix("data: ")?;
    if data == "[DONE]" {
        return None;
    }
    let json: Value = serde_json::from_str(data).ok()?;
    let delta = json.pointer("/choices/0/delta")?;

    if let Some(reasoning) = delta.get("reasoning_content").and_then(|v| v.as_str()) {
        if !reasoning.is_empty() {
            return Some(AdapterToken { channel: Channel::Reasoning, content: reasoning.to_string() });
        }
    }
    if let Some(content) = delta.get("content").and_then(|v| v.as_str()) {
        if !content.is_empty() {
            return Some(AdapterToken { channel: Channel::Final, content: content.to_string() });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"hello"}}]}"#;
        let token = parse_sse_line(line).unwrap();
        assert_eq!(token.content, "hello");
        assert!(matches!(token.channel, Channel::Final));
    }

    #[test]
    fn parses_reasoning_delta() {
        let line = r#"data: {"choices":[{"delta":{"reasoning_content":"thinking"}}]}"#;
        let token = parse_sse_line(line).unwrap();
        assert!(matches!(token.channel, Channel::Reasoning));
    }

    #[test]
    fn done_sentinel_yields_none() {
        assert!(parse_sse_line("data: [DONE]").is_none());
    }

    #[test]
    fn non_data_line_yields_none() {
        assert!(parse_sse_line(": keep-alive").is_none());
    }
}
