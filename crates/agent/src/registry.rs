use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use agentmesh_core::{AgentDefinition, Error, Result, Trigger};
use agentmesh_events::pattern_matches;

/// A cron trigger owned by one agent, as the scheduler consumes it.
#[derive(Debug, Clone, PartialEq)]
pub struct CronEntry {
    pub agent_id: String,
    pub schedule: String,
    pub timezone: Option<String>,
}

#[derive(Default)]
struct Inner {
    agents: HashMap<String, AgentDefinition>,
    /// event pattern → agent ids. Matching against concrete event names
    /// happens at lookup time, so patterns may themselves carry wildcards.
    event_index: HashMap<String, Vec<String>>,
    /// webhook path → agent ids, for the excluded HTTP layer to query.
    webhook_index: HashMap<String, Vec<String>>,
}

/// Holds agent definitions and indexes their triggers.
#[derive(Default)]
pub struct AgentRegistry {
    inner: Mutex<Inner>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an agent. Definitions come from the
    /// configuration layer pre-validated; only structural completeness is
    /// re-checked here.
    pub fn register(&self, agent: AgentDefinition) -> Result<()> {
        if agent.id.is_empty() {
            return Err(Error::Validation("agent id is required".to_string()));
        }
        if agent.name.is_empty() {
            return Err(Error::Validation(format!("agent {}: name is required", agent.id)));
        }
        if agent.description.is_empty() {
            return Err(Error::Validation(format!(
                "agent {}: description is required",
                agent.id
            )));
        }
        if agent.skills.is_empty() {
            return Err(Error::Validation(format!(
                "agent {}: at least one skill is required",
                agent.id
            )));
        }

        let mut inner = self.inner.lock().expect("registry lock poisoned");
        remove_from_indexes(&mut inner, &agent.id);
        if agent.enabled {
            index_triggers(&mut inner, &agent);
        }
        debug!(agent = %agent.id, triggers = agent.triggers.len(), "agent registered");
        inner.agents.insert(agent.id.clone(), agent);
        Ok(())
    }

    /// Remove an agent and every trigger index entry referencing it.
    pub fn unregister(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        remove_from_indexes(&mut inner, id);
        inner.agents.remove(id).is_some()
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let agent = inner
            .agents
            .get_mut(id)
            .ok_or_else(|| Error::UnknownAgent(id.to_string()))?;
        agent.enabled = enabled;
        let agent = agent.clone();
        remove_from_indexes(&mut inner, id);
        if enabled {
            index_triggers(&mut inner, &agent);
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<AgentDefinition> {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .agents
            .get(id)
            .cloned()
    }

    pub fn list(&self) -> Vec<AgentDefinition> {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .agents
            .values()
            .cloned()
            .collect()
    }

    /// Agents whose event patterns match the concrete event name.
    pub fn agents_for_event(&self, event_name: &str) -> Vec<String> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        let mut ids: Vec<String> = Vec::new();
        for (pattern, agents) in &inner.event_index {
            if pattern_matches(pattern, event_name) {
                for id in agents {
                    if !ids.contains(id) {
                        ids.push(id.clone());
                    }
                }
            }
        }
        ids
    }

    /// Cron triggers of every enabled agent.
    pub fn cron_entries(&self) -> Vec<CronEntry> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        let mut entries = Vec::new();
        for agent in inner.agents.values().filter(|a| a.enabled) {
            for trigger in &agent.triggers {
                if let Trigger::Cron { schedule, timezone } = trigger {
                    entries.push(CronEntry {
                        agent_id: agent.id.clone(),
                        schedule: schedule.clone(),
                        timezone: timezone.clone(),
                    });
                }
            }
        }
        entries
    }

    /// Agents bound to a webhook path.
    pub fn agents_for_webhook(&self, path: &str) -> Vec<String> {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .webhook_index
            .get(path)
            .cloned()
            .unwrap_or_default()
    }
}

fn index_triggers(inner: &mut Inner, agent: &AgentDefinition) {
    for trigger in &agent.triggers {
        match trigger {
            Trigger::Event { patterns } => {
                for pattern in patterns {
                    inner
                        .event_index
                        .entry(pattern.clone())
                        .or_default()
                        .push(agent.id.clone());
                }
            }
            Trigger::Webhook { path, .. } => {
                inner
                    .webhook_index
                    .entry(path.clone())
                    .or_default()
                    .push(agent.id.clone());
            }
            // Cron triggers are read straight off the definitions by the
            // scheduler; manual triggers need no index at all.
            Trigger::Cron { .. } | Trigger::Manual {} => {}
        }
    }
}

fn remove_from_indexes(inner: &mut Inner, id: &str) {
    inner.event_index.retain(|_, agents| {
        agents.retain(|a| a != id);
        !agents.is_empty()
    });
    inner.webhook_index.retain(|_, agents| {
        agents.retain(|a| a != id);
        !agents.is_empty()
    });
}
