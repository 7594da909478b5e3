use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use agentmesh_core::{AgentDefinition, Result, TriggerInfo};

/// One step proposed by a planner: a tool or skill invocation by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    pub kind: ActionKind,
    pub name: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Tool,
    Skill,
}

/// Everything a planner gets to see for one run.
#[derive(Debug, Clone)]
pub struct PlanningContext {
    pub agent: AgentDefinition,
    pub input: String,
    pub trigger: TriggerInfo,
    /// Names of tools currently reachable through the executor.
    pub available_tools: Vec<String>,
}

/// Narrow seam to whatever reasoning backend proposes actions. The core has
/// no dependency on any particular model provider; an implementation may call
/// an LLM, a rules engine, or nothing at all.
#[async_trait]
pub trait ActionPlanner: Send + Sync {
    async fn plan_actions(&self, context: &PlanningContext) -> Result<Vec<ActionRequest>>;
}
