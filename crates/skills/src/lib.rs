pub mod registry;

use async_trait::async_trait;
use serde_json::Value;

use agentmesh_core::Result;

pub use registry::SkillRegistry;

/// A predefined automation, distinct from a single raw tool call. Typically
/// composed of one or more tool calls behind a stable name.
#[async_trait]
pub trait Skill: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    async fn execute(&self, payload: Value) -> Result<Value>;
}
