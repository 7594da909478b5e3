use std::path::Path;

use anyhow::Context;
use serde_json::Value;

use agentmesh_core::TriggerInfo;

/// Execute one agent with a manual trigger and print the execution record.
pub async fn run(
    config_path: &Path,
    agent_id: &str,
    input: Option<String>,
    payload: Option<String>,
) -> anyhow::Result<()> {
    let payload: Value = match payload {
        Some(raw) => serde_json::from_str(&raw).context("payload is not valid JSON")?,
        None => Value::Null,
    };

    let stack = super::build(config_path).await?;
    let record = stack
        .runtime
        .execute(agent_id, input, Some(TriggerInfo::manual(payload)))
        .await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    stack.dispose().await;
    Ok(())
}
