use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Error,
}

/// One entry in the executor's bounded history.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecution {
    pub id: String,
    pub tool: String,
    pub params: Value,
    pub status: ExecutionStatus,
    pub start_time_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolExecution {
    pub fn new(tool: &str, params: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tool: tool.to_string(),
            params,
            status: ExecutionStatus::Pending,
            start_time_ms: chrono::Utc::now().timestamp_millis(),
            end_time_ms: None,
            error: None,
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time_ms.map(|end| end - self.start_time_ms)
    }
}

/// Per-tool aggregates derived from the history.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStats {
    pub calls: u64,
    pub successes: u64,
    pub errors: u64,
    pub avg_duration_ms: f64,
}

/// Non-raising outcome envelope used by the batch helpers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub tool: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn ok(tool: &str, result: Value) -> Self {
        Self {
            tool: tool.to_string(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(tool: &str, error: String) -> Self {
        Self {
            tool: tool.to_string(),
            success: false,
            result: None,
            error: Some(error),
        }
    }
}
