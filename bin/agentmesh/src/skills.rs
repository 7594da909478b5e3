use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use agentmesh_core::Result;
use agentmesh_events::EventBus;
use agentmesh_skills::{Skill, SkillRegistry};

/// Returns its trigger payload unchanged. Useful for smoke-testing agent
/// wiring without any tool server.
struct EchoSkill;

#[async_trait]
impl Skill for EchoSkill {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Returns the trigger payload unchanged"
    }

    async fn execute(&self, payload: Value) -> Result<Value> {
        Ok(payload)
    }
}

/// Logs its payload and republishes it on the bus as "announce.message".
struct AnnounceSkill {
    bus: Arc<EventBus>,
}

#[async_trait]
impl Skill for AnnounceSkill {
    fn name(&self) -> &str {
        "announce"
    }

    fn description(&self) -> &str {
        "Logs the payload and republishes it as an announce.message event"
    }

    async fn execute(&self, payload: Value) -> Result<Value> {
        info!(payload = %payload, "announce");
        self.bus.emit("announce.message", payload);
        Ok(json!({ "announced": true }))
    }
}

pub fn register_builtins(registry: &mut SkillRegistry, bus: Arc<EventBus>) {
    registry.register(Arc::new(EchoSkill));
    registry.register(Arc::new(AnnounceSkill { bus }));
}
