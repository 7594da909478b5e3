use std::path::Path;

use serde_json::Value;

use agentmesh_core::{AgentDefinition, Config, Trigger};

/// Write a starter configuration with one manually-triggered echo agent, so
/// `agentmesh agent echo` works before any tool server is configured.
pub async fn run(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    let config = Config {
        servers: vec![],
        limits: Default::default(),
        agents: vec![AgentDefinition {
            id: "echo".to_string(),
            name: "Echo".to_string(),
            description: "Replays whatever payload triggers it".to_string(),
            skills: vec!["echo".to_string()],
            tools: vec![],
            triggers: vec![Trigger::Manual {}],
            capabilities: Value::Null,
            enabled: true,
        }],
    };
    config.save(path).await?;
    println!("wrote {}", path.display());
    Ok(())
}
