use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use agentmesh_core::{AgentDefinition, Error, Result, TriggerInfo};
use agentmesh_events::EventBus;
use agentmesh_skills::SkillRegistry;
use agentmesh_tools::ToolExecutor;

use crate::context::{ActionRecord, ExecutionContext, ExecutionRecord, RunStatus};
use crate::memory::{MemoryTurn, WorkingMemory};
use crate::planner::{ActionKind, ActionPlanner, PlanningContext};
use crate::registry::AgentRegistry;

struct RuntimeState {
    active: usize,
    history: VecDeque<ExecutionRecord>,
}

/// Runs agents: admission control, planning, tool/skill dispatch, outcome
/// bookkeeping. At most `max_concurrent` executions run at once; the next
/// call is rejected before any context is allocated.
pub struct AgentRuntime {
    registry: Arc<AgentRegistry>,
    executor: Arc<ToolExecutor>,
    skills: Arc<SkillRegistry>,
    bus: Arc<EventBus>,
    memory: Arc<dyn WorkingMemory>,
    planner: Option<Arc<dyn ActionPlanner>>,
    max_concurrent: usize,
    execution_timeout: Duration,
    history_limit: usize,
    state: Mutex<RuntimeState>,
}

impl AgentRuntime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<AgentRegistry>,
        executor: Arc<ToolExecutor>,
        skills: Arc<SkillRegistry>,
        bus: Arc<EventBus>,
        memory: Arc<dyn WorkingMemory>,
        planner: Option<Arc<dyn ActionPlanner>>,
        max_concurrent: usize,
        execution_timeout: Duration,
        history_limit: usize,
    ) -> Self {
        Self {
            registry,
            executor,
            skills,
            bus,
            memory,
            planner,
            max_concurrent,
            execution_timeout,
            history_limit,
            state: Mutex::new(RuntimeState {
                active: 0,
                history: VecDeque::new(),
            }),
        }
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().expect("runtime state lock poisoned").active
    }

    pub fn history(&self) -> Vec<ExecutionRecord> {
        self.state
            .lock()
            .expect("runtime state lock poisoned")
            .history
            .iter()
            .cloned()
            .collect()
    }

    /// Execute one agent run.
    ///
    /// Rejects immediately — without allocating a context — if the agent is
    /// unknown, disabled, or the concurrency ceiling is already reached.
    /// Once admitted, any failure inside the run (including the per-run
    /// timeout) is converted into a `Failed` record rather than propagated.
    pub async fn execute(
        &self,
        agent_id: &str,
        input: Option<String>,
        trigger: Option<TriggerInfo>,
    ) -> Result<ExecutionRecord> {
        let agent = self
            .registry
            .get(agent_id)
            .ok_or_else(|| Error::UnknownAgent(agent_id.to_string()))?;
        if !agent.enabled {
            return Err(Error::AgentDisabled(agent_id.to_string()));
        }

        // Check-and-increment must be atomic so the ceiling holds under
        // concurrent admission.
        {
            let mut state = self.state.lock().expect("runtime state lock poisoned");
            if state.active >= self.max_concurrent {
                return Err(Error::ConcurrencyLimitExceeded {
                    limit: self.max_concurrent,
                });
            }
            state.active += 1;
        }

        let trigger = trigger.unwrap_or_else(|| TriggerInfo::manual(Value::Null));
        let context = ExecutionContext::new(agent_id, trigger, self.execution_timeout);
        info!(agent = agent_id, execution = %context.execution_id, trigger = %context.trigger.kind, "agent execution started");
        self.bus.emit(
            "agent.execution.started",
            json!({
                "agentId": agent_id,
                "executionId": context.execution_id,
                "trigger": context.trigger.kind,
            }),
        );

        let body = self.run_agent(&agent, &context, input.as_deref());
        let outcome = match tokio::time::timeout(context.timeout, body).await {
            Ok(Ok((actions, output))) => (RunStatus::Completed, actions, output, None),
            Ok(Err((actions, e))) => (RunStatus::Failed, actions, None, Some(e.to_string())),
            Err(_) => (
                RunStatus::Failed,
                Vec::new(),
                None,
                Some(format!(
                    "execution exceeded {}ms budget",
                    context.timeout.as_millis()
                )),
            ),
        };

        let (status, actions, output, error) = outcome;
        let record = ExecutionRecord {
            execution_id: context.execution_id.clone(),
            agent_id: agent_id.to_string(),
            status,
            trigger: context.trigger.clone(),
            start_time_ms: context.start_time_ms,
            end_time_ms: chrono::Utc::now().timestamp_millis(),
            actions,
            output,
            error,
        };

        // Unconditional cleanup: the slot is released and the outcome
        // retained whatever happened above.
        {
            let mut state = self.state.lock().expect("runtime state lock poisoned");
            state.active -= 1;
            state.history.push_back(record.clone());
            while state.history.len() > self.history_limit {
                state.history.pop_front();
            }
        }

        match record.status {
            RunStatus::Completed => {
                self.bus.emit(
                    "agent.execution.completed",
                    json!({ "agentId": agent_id, "executionId": record.execution_id }),
                );
            }
            RunStatus::Failed => {
                warn!(agent = agent_id, execution = %record.execution_id, error = ?record.error, "agent execution failed");
                self.bus.emit(
                    "agent.execution.failed",
                    json!({
                        "agentId": agent_id,
                        "executionId": record.execution_id,
                        "error": record.error,
                    }),
                );
            }
        }

        Ok(record)
    }

    /// The run body: plan actions if a planner is configured and textual
    /// input is present, otherwise fall back to the agent's first skill.
    /// Errors carry the actions executed so far so the record keeps them.
    async fn run_agent(
        &self,
        agent: &AgentDefinition,
        context: &ExecutionContext,
        input: Option<&str>,
    ) -> std::result::Result<(Vec<ActionRecord>, Option<Value>), (Vec<ActionRecord>, Error)> {
        let session = format!("agent:{}", agent.id);
        if let Some(text) = input {
            self.memory
                .append(&session, MemoryTurn::new("user", text))
                .await;
        }

        let mut actions = Vec::new();

        if let (Some(planner), Some(text)) = (&self.planner, input) {
            let planning = PlanningContext {
                agent: agent.clone(),
                input: text.to_string(),
                trigger: context.trigger.clone(),
                available_tools: agent.tools.clone(),
            };
            let requests = planner
                .plan_actions(&planning)
                .await
                .map_err(|e| (Vec::new(), e))?;
            debug!(agent = %agent.id, proposed = requests.len(), "planner proposed actions");

            let mut last_output = None;
            for request in requests {
                let outcome = match request.kind {
                    ActionKind::Tool => {
                        self.executor
                            .execute(&request.name, request.params.clone())
                            .await
                    }
                    ActionKind::Skill => {
                        self.skills
                            .execute(&request.name, request.params.clone())
                            .await
                    }
                };
                // A failed action is logged in the action log; the run
                // continues with the remaining proposals.
                match outcome {
                    Ok(result) => {
                        last_output = Some(result.clone());
                        actions.push(ActionRecord {
                            kind: kind_str(request.kind).to_string(),
                            name: request.name,
                            params: request.params,
                            success: true,
                            result: Some(result),
                            error: None,
                        });
                    }
                    Err(e) => {
                        actions.push(ActionRecord {
                            kind: kind_str(request.kind).to_string(),
                            name: request.name,
                            params: request.params,
                            success: false,
                            result: None,
                            error: Some(e.to_string()),
                        });
                    }
                }
            }

            let summary = format!(
                "executed {} actions ({} ok)",
                actions.len(),
                actions.iter().filter(|a| a.success).count()
            );
            self.memory
                .append(&session, MemoryTurn::new("assistant", &summary))
                .await;
            return Ok((actions, last_output));
        }

        // No planner (or no textual input): run the first configured skill
        // against the trigger payload.
        let skill_name = agent
            .skills
            .first()
            .ok_or_else(|| {
                (
                    Vec::new(),
                    Error::Skill(format!("agent {} has no skills configured", agent.id)),
                )
            })?
            .clone();
        let payload = context.trigger.payload.clone();
        match self.skills.execute(&skill_name, payload.clone()).await {
            Ok(result) => {
                actions.push(ActionRecord {
                    kind: "skill".to_string(),
                    name: skill_name,
                    params: payload,
                    success: true,
                    result: Some(result.clone()),
                    error: None,
                });
                Ok((actions, Some(result)))
            }
            Err(e) => {
                actions.push(ActionRecord {
                    kind: "skill".to_string(),
                    name: skill_name,
                    params: payload,
                    success: false,
                    result: None,
                    error: Some(e.to_string()),
                });
                Err((actions, e))
            }
        }
    }
}

fn kind_str(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Tool => "tool",
        ActionKind::Skill => "skill",
    }
}
