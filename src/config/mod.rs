// src/config/mod.rs
// Central configuration for the QA orchestrator

pub mod backends;
pub mod helpers;
pub mod llm;
pub mod memory;
pub mod server;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

lazy_static! {
    pub static ref CONFIG: QaConfig = QaConfig::from_env();
}

/// Top-level configuration, composed of domain sub-configs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaConfig {
    pub llm: llm::LlmConfig,
    pub memory: memory::MemoryConfig,
    pub backends: backends::BackendsConfig,
    pub server: server::ServerConfig,
    pub database: server::DatabaseConfig,
    pub logging: server::LoggingConfig,
}

impl QaConfig {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            llm: llm::LlmConfig::from_env(),
            memory: memory::MemoryConfig::from_env(),
            backends: backends::BackendsConfig::from_env(),
            server: server::ServerConfig::from_env(),
            database: server::DatabaseConfig::from_env(),
            logging: server::LoggingConfig::from_env(),
        }
    }

    /// Fail fast on startup if required config is missing or malformed.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.llm.validate()?;
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        self.server.bind_address()
    }
}

impl Default for QaConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
