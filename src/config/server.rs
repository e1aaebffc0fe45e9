// src/config/server.rs
// Server, database, and logging configuration

use serde::{Deserialize, Serialize};

use super::helpers::{env_bool, env_or, env_usize, require_env};

/// HTTP server bind configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_or("QA_HOST", "0.0.0.0"),
            port: env_usize("QA_PORT", 8080) as u16,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Conversation store database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        Self {
            url: require_env("QA_CONVERSATION_DB_PATH"),
            max_connections: env_usize("QA_SQLITE_MAX_CONNECTIONS", 8) as u32,
            busy_timeout_ms: env_usize("QA_SQLITE_BUSY_TIMEOUT_MS", 5000) as u64,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self {
            level: env_or("QA_LOG_LEVEL", "info"),
            json: env_bool("QA_LOG_JSON", false),
        }
    }
}
