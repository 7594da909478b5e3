use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{debug, warn};

use agentmesh_core::{Error, Result};
use agentmesh_events::EventBus;

use crate::record::{ExecutionOutcome, ExecutionStatus, ToolExecution, ToolStats};
use crate::ToolTransport;

/// Executes tool calls through a transport, adding parameter validation,
/// bounded execution history, per-tool statistics, lifecycle events, and
/// batch helpers. No retries — a failed call fails.
pub struct ToolExecutor {
    transport: Arc<dyn ToolTransport>,
    bus: Arc<EventBus>,
    history_limit: usize,
    history: Mutex<VecDeque<ToolExecution>>,
    /// tool name → declared required parameter fields, from the last schema
    /// refresh. Tools absent from the map are executed unvalidated.
    required: Mutex<HashMap<String, Vec<String>>>,
}

impl ToolExecutor {
    pub fn new(
        transport: Arc<dyn ToolTransport>,
        bus: Arc<EventBus>,
        history_limit: usize,
    ) -> Self {
        Self {
            transport,
            bus,
            history_limit,
            history: Mutex::new(VecDeque::new()),
            required: Mutex::new(HashMap::new()),
        }
    }

    /// Re-read the transport's tool list and cache each tool's declared
    /// required fields for validation.
    pub async fn refresh_schemas(&self) -> Result<()> {
        let tools = self.transport.list_tools().await?;
        let mut map = HashMap::new();
        for tool in &tools {
            let fields: Vec<String> = tool
                .input_schema
                .get("required")
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            map.insert(tool.name.clone(), fields);
        }
        debug!(tools = map.len(), "tool schemas refreshed");
        *self.required.lock().expect("schema lock poisoned") = map;
        Ok(())
    }

    fn check_required(&self, tool: &str, params: &Value) -> Result<()> {
        let map = self.required.lock().expect("schema lock poisoned");
        if let Some(fields) = map.get(tool) {
            for field in fields {
                if params.get(field).is_none() {
                    return Err(Error::MissingParameter(format!("{}.{}", tool, field)));
                }
            }
        }
        Ok(())
    }

    fn push_entry(&self, entry: ToolExecution) {
        let mut history = self.history.lock().expect("history lock poisoned");
        history.push_back(entry);
        while history.len() > self.history_limit {
            history.pop_front();
        }
    }

    fn update_entry(&self, id: &str, f: impl FnOnce(&mut ToolExecution)) {
        let mut history = self.history.lock().expect("history lock poisoned");
        if let Some(entry) = history.iter_mut().rev().find(|e| e.id == id) {
            f(entry);
        }
    }

    /// Execute one tool call. Validates declared required parameters before
    /// touching the transport, records the execution, and re-raises failures.
    pub async fn execute(&self, tool: &str, params: Value) -> Result<Value> {
        let entry = ToolExecution::new(tool, params.clone());
        let id = entry.id.clone();
        self.push_entry(entry);

        if let Err(e) = self.check_required(tool, &params) {
            self.update_entry(&id, |entry| {
                entry.status = ExecutionStatus::Error;
                entry.end_time_ms = Some(chrono::Utc::now().timestamp_millis());
                entry.error = Some(e.to_string());
            });
            self.bus.emit(
                "tool.execution.failed",
                json!({ "id": id, "tool": tool, "error": e.to_string() }),
            );
            return Err(e);
        }

        self.update_entry(&id, |entry| entry.status = ExecutionStatus::Running);
        self.bus
            .emit("tool.execution.started", json!({ "id": id, "tool": tool }));

        // The caller may drop this future mid-call (per-run timeouts do); the
        // guard makes sure the running entry still reaches a terminal status.
        let mut guard = CancelGuard {
            executor: self,
            id: id.as_str(),
            tool,
            armed: true,
        };
        let outcome = self.transport.call_tool(tool, params).await;
        guard.armed = false;
        drop(guard);

        match outcome {
            Ok(result) => {
                self.update_entry(&id, |entry| {
                    entry.status = ExecutionStatus::Success;
                    entry.end_time_ms = Some(chrono::Utc::now().timestamp_millis());
                });
                self.bus
                    .emit("tool.execution.completed", json!({ "id": id, "tool": tool }));
                Ok(result)
            }
            Err(e) => {
                warn!(tool, error = %e, "tool execution failed");
                self.update_entry(&id, |entry| {
                    entry.status = ExecutionStatus::Error;
                    entry.end_time_ms = Some(chrono::Utc::now().timestamp_millis());
                    entry.error = Some(e.to_string());
                });
                self.bus.emit(
                    "tool.execution.failed",
                    json!({ "id": id, "tool": tool, "error": e.to_string() }),
                );
                Err(e)
            }
        }
    }

    /// Like `execute` but never raises; the outcome is folded into an envelope.
    pub async fn execute_safe(&self, tool: &str, params: Value) -> ExecutionOutcome {
        match self.execute(tool, params).await {
            Ok(result) => ExecutionOutcome::ok(tool, result),
            Err(e) => ExecutionOutcome::err(tool, e.to_string()),
        }
    }

    /// Issue every call concurrently; envelopes come back in input order.
    pub async fn execute_parallel(&self, calls: Vec<(String, Value)>) -> Vec<ExecutionOutcome> {
        join_all(
            calls
                .into_iter()
                .map(|(tool, params)| async move { self.execute_safe(&tool, params).await }),
        )
        .await
    }

    /// Run calls one at a time, stopping at (and propagating) the first error.
    pub async fn execute_sequence(&self, calls: Vec<(String, Value)>) -> Result<Vec<Value>> {
        let mut results = Vec::with_capacity(calls.len());
        for (tool, params) in calls {
            results.push(self.execute(&tool, params).await?);
        }
        Ok(results)
    }

    pub fn history(&self) -> Vec<ToolExecution> {
        self.history
            .lock()
            .expect("history lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Aggregates for one tool, derived from the retained history.
    pub fn stats(&self, tool: &str) -> ToolStats {
        let history = self.history.lock().expect("history lock poisoned");
        let mut stats = ToolStats::default();
        let mut total_ms = 0i64;
        let mut timed = 0u64;
        for entry in history.iter().filter(|e| e.tool == tool) {
            stats.calls += 1;
            match entry.status {
                ExecutionStatus::Success => stats.successes += 1,
                ExecutionStatus::Error => stats.errors += 1,
                _ => {}
            }
            if let Some(ms) = entry.duration_ms() {
                total_ms += ms;
                timed += 1;
            }
        }
        if timed > 0 {
            stats.avg_duration_ms = total_ms as f64 / timed as f64;
        }
        stats
    }
}

/// Marks an execution entry as errored if its future is dropped while the
/// tool call is still in flight.
struct CancelGuard<'a> {
    executor: &'a ToolExecutor,
    id: &'a str,
    tool: &'a str,
    armed: bool,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(tool = self.tool, "tool execution cancelled mid-flight");
        self.executor.update_entry(self.id, |entry| {
            if entry.status == ExecutionStatus::Running {
                entry.status = ExecutionStatus::Error;
                entry.end_time_ms = Some(chrono::Utc::now().timestamp_millis());
                entry.error = Some("execution cancelled".to_string());
            }
        });
        self.executor.bus.emit(
            "tool.execution.failed",
            json!({ "id": self.id, "tool": self.tool, "error": "execution cancelled" }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmesh_protocol::ToolDescriptor;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Transport stub: "echo" succeeds and requires "x", "flaky" always
    /// fails, "free" has no declared schema.
    struct MockTransport {
        calls: Mutex<Vec<String>>,
    }

    impl MockTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ToolTransport for MockTransport {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
            Ok(vec![
                ToolDescriptor {
                    name: "echo".to_string(),
                    description: None,
                    input_schema: json!({ "type": "object", "required": ["x"] }),
                },
                ToolDescriptor {
                    name: "flaky".to_string(),
                    description: None,
                    input_schema: json!({ "type": "object" }),
                },
            ])
        }

        async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
            self.calls.lock().unwrap().push(name.to_string());
            match name {
                "flaky" => Err(Error::Tool("flaky blew up".to_string())),
                _ => Ok(json!({ "echoed": arguments })),
            }
        }
    }

    async fn executor_with_mock(limit: usize) -> (ToolExecutor, Arc<MockTransport>) {
        let transport = MockTransport::new();
        let bus = EventBus::new(100);
        let executor = ToolExecutor::new(transport.clone(), bus, limit);
        executor.refresh_schemas().await.unwrap();
        (executor, transport)
    }

    #[tokio::test]
    async fn test_missing_parameter_fails_before_transport() {
        let (executor, transport) = executor_with_mock(100).await;
        let err = executor.execute("echo", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::MissingParameter(_)));
        assert!(transport.calls().is_empty());

        let history = executor.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ExecutionStatus::Error);
    }

    #[tokio::test]
    async fn test_execute_records_success() {
        let (executor, _) = executor_with_mock(100).await;
        let result = executor.execute("echo", json!({"x": 1})).await.unwrap();
        assert_eq!(result["echoed"]["x"], 1);

        let history = executor.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ExecutionStatus::Success);
        assert!(history[0].end_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_execute_sequence_stops_at_first_error() {
        let (executor, transport) = executor_with_mock(100).await;
        let err = executor
            .execute_sequence(vec![
                ("flaky".to_string(), json!({})),
                ("echo".to_string(), json!({"x": 1})),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Tool(_)));
        // The second call was never attempted.
        assert_eq!(transport.calls(), vec!["flaky"]);
    }

    #[tokio::test]
    async fn test_execute_parallel_collects_envelopes() {
        let (executor, _) = executor_with_mock(100).await;
        let outcomes = executor
            .execute_parallel(vec![
                ("echo".to_string(), json!({"x": 1})),
                ("flaky".to_string(), json!({})),
                ("echo".to_string(), json!({"x": 2})),
            ])
            .await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].success);
        assert!(!outcomes[1].success);
        assert!(outcomes[1].error.as_deref().unwrap().contains("flaky"));
        assert!(outcomes[2].success);
    }

    /// Never answers, so callers can exercise cancellation.
    struct StalledTransport;

    #[async_trait]
    impl ToolTransport for StalledTransport {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
            Ok(vec![])
        }

        async fn call_tool(&self, _name: &str, _arguments: Value) -> Result<Value> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cancelled_call_reaches_terminal_status() {
        let bus = EventBus::new(100);
        let executor = ToolExecutor::new(Arc::new(StalledTransport), bus.clone(), 100);

        let result = tokio::time::timeout(
            Duration::from_millis(50),
            executor.execute("stalled", json!({})),
        )
        .await;
        assert!(result.is_err());

        let history = executor.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ExecutionStatus::Error);
        assert!(history[0].error.as_deref().unwrap().contains("cancelled"));
        assert_eq!(executor.stats("stalled").errors, 1);

        let names: Vec<String> = bus.history().into_iter().map(|e| e.name).collect();
        assert!(names.contains(&"tool.execution.failed".to_string()));
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let (executor, _) = executor_with_mock(3).await;
        for i in 0..5 {
            let _ = executor.execute("echo", json!({"x": i})).await;
        }
        assert_eq!(executor.history().len(), 3);
    }

    #[tokio::test]
    async fn test_stats_aggregation() {
        let (executor, _) = executor_with_mock(100).await;
        executor.execute("echo", json!({"x": 1})).await.unwrap();
        executor.execute("echo", json!({"x": 2})).await.unwrap();
        let _ = executor.execute("flaky", json!({})).await;

        let echo = executor.stats("echo");
        assert_eq!(echo.calls, 2);
        assert_eq!(echo.successes, 2);
        assert_eq!(echo.errors, 0);

        let flaky = executor.stats("flaky");
        assert_eq!(flaky.calls, 1);
        assert_eq!(flaky.errors, 1);
    }
}
