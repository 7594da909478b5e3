use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;
use crate::types::AgentDefinition;

/// How to launch one tool-server child process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeLimits {
    /// Ceiling on simultaneously running agent executions.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Bound on every in-memory history (events, tool executions, outcomes).
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Default timeout for a single RPC round-trip.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Timeout for the initialize handshake.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Wall-clock budget for one agent execution.
    #[serde(default = "default_execution_timeout_ms")]
    pub execution_timeout_ms: u64,
    /// Coarse cron evaluation period.
    #[serde(default = "default_cron_tick_secs")]
    pub cron_tick_secs: u64,
}

fn default_max_concurrent() -> usize {
    5
}

fn default_history_limit() -> usize {
    100
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_execution_timeout_ms() -> u64 {
    120_000
}

fn default_cron_tick_secs() -> u64 {
    60
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            history_limit: default_history_limit(),
            request_timeout_ms: default_request_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            execution_timeout_ms: default_execution_timeout_ms(),
            cron_tick_secs: default_cron_tick_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub limits: RuntimeLimits,
    /// Agent definitions are produced by the configuration layer and treated
    /// as pre-validated; the registry re-checks structural completeness only.
    #[serde(default)]
    pub agents: Vec<AgentDefinition>,
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}
