// src/event.rs
// The closed event protocol streamed to the HTTP edge. Every workflow run
// emits a prefix of these variants in order: at most one `RouteDecision`,
// zero or more `ToolStart`/`Token` pairs, then exactly one of `Complete` or
// `Error`. Modeled as a flat tagged enum the same way the teacher streams
// its own operation events over an mpsc channel and serializes LLM deltas
// in `llm::provider::stream::StreamEvent`.

use serde::{Deserialize, Serialize};

/// Which backend a question was routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Sql,
    Rag,
    General,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Sql => "sql",
            Route::Rag => "rag",
            Route::General => "general",
        }
    }
}

/// A tool invoked by a backend while answering (e.g. "sql_query",
/// "document_search"). Free-form but kept as a newtype rather than a raw
/// `String` at call sites so the event shape stays self-describing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendTool(pub String);

impl BackendTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

/// Which stream a token belongs to: the backend's visible reasoning trace,
/// or its final answer text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Reasoning,
    Final,
}

/// Summary statistics attached to a `Complete` event, per spec.md §4.1:
/// total tokens streamed plus the split between the reasoning and final
/// channels. Estimated the same way `query_memory`'s context budget is
/// (roughly one token per four characters) since no real tokenizer
/// dependency is wired in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionStats {
    pub tokens: usize,
    pub reasoning_tokens: usize,
    pub final_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    RouteDecision { route: Route },
    ToolStart { tool: BackendTool },
    Token { channel: Channel, content: String },
    Complete { stats: CompletionStats },
    Error { error: String },
}

impl WorkflowEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowEvent::Complete { .. } | WorkflowEvent::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_decision_serializes_with_tag() {
        let event = WorkflowEvent::RouteDecision { route: Route::Sql };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "route_decision");
        assert_eq!(json["route"], "sql");
    }

    #[test]
    fn token_carries_channel() {
        let event = WorkflowEvent::Token {
            channel: Channel::Reasoning,
            content: "thinking".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "token");
        assert_eq!(json["channel"], "reasoning");
    }

    #[test]
    fn complete_and_error_are_terminal() {
        assert!(WorkflowEvent::Complete { stats: CompletionStats::default() }.is_terminal());
        assert!(WorkflowEvent::Error { error: "boom".into() }.is_terminal());
        assert!(!WorkflowEvent::ToolStart { tool: BackendTool::new("x") }.is_terminal());
    }
}
