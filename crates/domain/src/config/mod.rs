mod capabilities;
mod llm;
mod observability;
mod retrieval;
mod server;
mod sessions;
mod storage;
mod tasks;
mod turn;

pub use capabilities::*;
pub use llm::*;
pub use observability::*;
pub use retrieval::*;
pub use server::*;
pub use sessions::*;
pub use storage::*;
pub use tasks::*;
pub use turn::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub turn: TurnConfig,
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub tasks: TaskConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    fn error(field: &str, message: impl Into<String>) -> Self {
        Self { severity: ConfigSeverity::Error, field: field.into(), message: message.into() }
    }

    fn warning(field: &str, message: impl Into<String>) -> Self {
        Self { severity: ConfigSeverity::Warning, field: field.into(), message: message.into() }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(ConfigIssue::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            issues.push(ConfigIssue::error("server.host", "host must not be empty"));
        }

        if self.llm.base_url.is_empty() {
            issues.push(ConfigIssue::error("llm.base_url", "base_url must not be empty"));
        }
        if std::env::var(&self.llm.api_key_env).map_or(true, |v| v.is_empty()) {
            issues.push(ConfigIssue::warning(
                "llm.api_key_env",
                format!("environment variable {} is not set", self.llm.api_key_env),
            ));
        }

        if self.retrieval.chunk_size == 0 {
            issues.push(ConfigIssue::error("retrieval.chunk_size", "chunk_size must be greater than 0"));
        }
        if self.retrieval.chunk_overlap >= self.retrieval.chunk_size {
            issues.push(ConfigIssue::error(
                "retrieval.chunk_overlap",
                format!(
                    "overlap ({}) must be smaller than chunk_size ({})",
                    self.retrieval.chunk_overlap, self.retrieval.chunk_size
                ),
            ));
        }
        if self.retrieval.top_k == 0 {
            issues.push(ConfigIssue::warning("retrieval.top_k", "top_k = 0 disables retrieval context"));
        }

        if self.turn.max_round_trips == 0 {
            issues.push(ConfigIssue::error(
                "turn.max_round_trips",
                "max_round_trips must be at least 1",
            ));
        }

        if !self.capabilities.search_url.contains("{query}") {
            issues.push(ConfigIssue::error(
                "capabilities.search_url",
                "search_url must contain a {query} placeholder",
            ));
        }

        if self.tasks.max_attempts == 0 {
            issues.push(ConfigIssue::error("tasks.max_attempts", "max_attempts must be at least 1"));
        }
        if self.tasks.initial_backoff_ms > self.tasks.max_backoff_ms {
            issues.push(ConfigIssue::warning(
                "tasks.initial_backoff_ms",
                "initial backoff exceeds max_backoff_ms; every retry waits max_backoff_ms",
            ));
        }

        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            issues.push(ConfigIssue::warning(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        issues
    }

    /// True when [`validate`](Self::validate) reports no `Error`-severity issue.
    pub fn is_valid(&self) -> bool {
        self.validate()
            .iter()
            .all(|i| i.severity != ConfigSeverity::Error)
    }
}
