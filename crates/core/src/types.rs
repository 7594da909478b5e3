use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An event flowing through the bus. Ephemeral — kept only in the bus's
/// bounded history ring, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Hierarchical dot-delimited name, e.g. "agent.execution.completed".
    pub name: String,
    #[serde(default)]
    pub payload: Value,
    pub timestamp_ms: i64,
}

impl Event {
    pub fn new(name: &str, payload: Value) -> Self {
        Self {
            name: name.to_string(),
            payload,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// A condition that causes an agent to execute.
///
/// The configuration layer hands these over as records tagged by a `type`
/// field; the closed enum makes registration exhaustively checked instead of
/// probing for field presence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Trigger {
    Event {
        patterns: Vec<String>,
    },
    Cron {
        schedule: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
    Manual {},
    Webhook {
        path: String,
        #[serde(default = "default_webhook_methods")]
        methods: Vec<String>,
    },
}

fn default_webhook_methods() -> Vec<String> {
    vec!["POST".to_string()]
}

/// A configured unit of autonomous behavior bound to skills/tools and
/// one or more triggers. Produced by the configuration layer, consumed
/// read-only by the registry and runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// What caused a particular agent execution. Carried into the execution
/// context and surfaced in lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerInfo {
    /// "event" | "cron" | "manual" | "webhook"
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl TriggerInfo {
    pub fn manual(payload: Value) -> Self {
        Self {
            kind: "manual".to_string(),
            event_name: None,
            payload,
        }
    }

    pub fn event(name: &str, payload: Value) -> Self {
        Self {
            kind: "event".to_string(),
            event_name: Some(name.to_string()),
            payload,
        }
    }

    pub fn cron(schedule: &str) -> Self {
        Self {
            kind: "cron".to_string(),
            event_name: None,
            payload: serde_json::json!({ "schedule": schedule }),
        }
    }
}
