// src/config/backends.rs
// Backend enablement and routing/execution limits

use serde::{Deserialize, Serialize};

use super::helpers::{env_bool, env_f32, env_usize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendsConfig {
    pub enable_sql_agent: bool,
    pub enable_rag_agent: bool,
    pub orchestrator_temperature: f32,
    pub sql_agent_max_iterations: usize,
    pub max_query_rows: usize,
    /// When true, the executor node withholds the chosen backend's
    /// Final-channel tokens and the finalize node re-prompts the answer
    /// through the general LLM, streaming it exactly once; when false, the
    /// backend's own Final-channel tokens are streamed directly and
    /// finalize is skipped. Either way, the Final channel is emitted by
    /// exactly one step, never both.
    pub finalize_passthrough: bool,
}

impl BackendsConfig {
    pub fn from_env() -> Self {
        Self {
            enable_sql_agent: env_bool("QA_ENABLE_SQL_AGENT", true),
            enable_rag_agent: env_bool("QA_ENABLE_RAG_AGENT", true),
            orchestrator_temperature: env_f32("QA_ORCHESTRATOR_TEMPERATURE", 0.0),
            sql_agent_max_iterations: env_usize("QA_SQL_AGENT_MAX_ITERATIONS", 4),
            max_query_rows: env_usize("QA_MAX_QUERY_ROWS", 500),
            finalize_passthrough: env_bool("QA_FINALIZE_PASSTHROUGH", true),
        }
    }
}
