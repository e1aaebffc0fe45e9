// src/config/memory.rs
// Conversation and query-result memory tuning

use serde::{Deserialize, Serialize};

use super::helpers::{env_bool, env_or, env_usize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub max_conversation_messages: usize,
    /// "simple" (default, implemented) or "tiered" (accepted, not yet
    /// implemented — see DESIGN.md) per spec.md §6's closed knob set.
    pub conversation_memory_strategy: String,
    pub query_result_memory_size: usize,
    pub followup_detection_enabled: bool,
    pub followup_max_context_tokens: usize,
}

impl MemoryConfig {
    pub fn from_env() -> Self {
        Self {
            max_conversation_messages: env_usize("QA_MAX_CONVERSATION_MESSAGES", 50),
            conversation_memory_strategy: env_or("QA_CONVERSATION_MEMORY_STRATEGY", "simple"),
            query_result_memory_size: env_usize("QA_QUERY_RESULT_MEMORY_SIZE", 5),
            followup_detection_enabled: env_bool("QA_FOLLOWUP_DETECTION_ENABLED", true),
            followup_max_context_tokens: env_usize("QA_FOLLOWUP_MAX_CONTEXT_TOKENS", 1500),
        }
    }
}
