// src/config/llm.rs
// LLM provider selection and generation parameters

use serde::{Deserialize, Serialize};

use super::helpers::{env_f32, env_or, env_usize, require_env};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "openai" is the only provider implemented; kept as a string so new
    /// adapters can be added without a config-shape change.
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: usize,
    pub api_key: String,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            provider: env_or("QA_LLM_PROVIDER", "openai"),
            model: env_or("QA_LLM_MODEL", "gpt-5.1-mini"),
            temperature: env_f32("QA_LLM_TEMPERATURE", 0.2),
            max_output_tokens: env_usize("QA_LLM_MAX_OUTPUT_TOKENS", 2048),
            api_key: require_env("QA_OPENAI_API_KEY"),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_key.trim().is_empty() {
            anyhow::bail!("QA_OPENAI_API_KEY is set but empty");
        }
        Ok(())
    }
}
