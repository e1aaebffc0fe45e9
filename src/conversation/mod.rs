// src/conversation/mod.rs
// Durable per-thread conversation storage: message history plus the
// workflow checkpoint (query-result memory and routing state) that lets a
// thread resume a follow-up question without replaying prior work.

mod store;

pub use store::ConversationStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::Route;
use crate::query_memory::QueryResultMemory;

/// A single conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

/// A single turn in a conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// The engine's resumable state for a thread: what it last routed to and
/// the bounded memory of SQL results gathered along the way. Persisted as a
/// single JSON blob keyed by conversation id, written only on a clean
/// completion (never on cancellation or error).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub conversation_id: String,
    pub last_route: Option<Route>,
    pub query_result_memory: QueryResultMemory,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(conversation_id: impl Into<String>, memory_capacity: usize) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            last_route: None,
            query_result_memory: QueryResultMemory::new(memory_capacity),
            updated_at: Utc::now(),
        }
    }
}
