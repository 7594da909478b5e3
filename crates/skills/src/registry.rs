use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use agentmesh_core::{Error, Result};

use crate::Skill;

/// Holds the predefined automations agents can run by name.
#[derive(Default, Clone)]
pub struct SkillRegistry {
    skills: HashMap<String, Arc<dyn Skill>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, skill: Arc<dyn Skill>) {
        debug!(skill = skill.name(), "skill registered");
        self.skills.insert(skill.name().to_string(), skill);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Skill>> {
        self.skills.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.skills.keys().map(String::as_str).collect()
    }

    /// Run one skill against a payload, mapping failures into the skill
    /// error kind.
    pub async fn execute(&self, name: &str, payload: Value) -> Result<Value> {
        let skill = self
            .get(name)
            .ok_or_else(|| Error::Skill(format!("unknown skill: {}", name)))?;
        skill
            .execute(payload)
            .await
            .map_err(|e| Error::Skill(format!("{}: {}", name, e)))
    }
}
