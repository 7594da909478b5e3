use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use agentmesh_core::TriggerInfo;

/// Per-run state. Created on admission, discarded after the run; the
/// retained outcome lives in the runtime's bounded history.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub agent_id: String,
    pub execution_id: String,
    pub trigger: TriggerInfo,
    pub start_time_ms: i64,
    /// Wall-clock budget for the whole run, enforced by the runtime.
    pub timeout: Duration,
}

impl ExecutionContext {
    pub fn new(agent_id: &str, trigger: TriggerInfo, timeout: Duration) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            execution_id: uuid::Uuid::new_v4().to_string(),
            trigger,
            start_time_ms: chrono::Utc::now().timestamp_millis(),
            timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
}

/// One executed action (tool or skill call) in a run's action log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub kind: String,
    pub name: String,
    pub params: Value,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Terminal outcome of one agent execution.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub agent_id: String,
    pub status: RunStatus,
    pub trigger: TriggerInfo,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub actions: Vec<ActionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
