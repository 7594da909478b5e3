use std::path::Path;
use std::time::Duration;

use anyhow::Context;

use agentmesh_core::Config;
use agentmesh_events::EventBus;
use agentmesh_protocol::Connector;

/// Connect to each configured tool server (or just `server`) and print the
/// tools it exposes.
pub async fn list(config_path: &Path, server: Option<String>) -> anyhow::Result<()> {
    let config = Config::load(config_path)
        .await
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let bus = EventBus::new(config.limits.history_limit);

    let mut matched = false;
    for server_config in &config.servers {
        if let Some(filter) = &server {
            if filter != &server_config.name {
                continue;
            }
        }
        matched = true;

        let connector = Connector::new(
            server_config.clone(),
            bus.clone(),
            Duration::from_millis(config.limits.request_timeout_ms),
        );
        match connector
            .connect(Duration::from_millis(config.limits.handshake_timeout_ms))
            .await
        {
            Ok(server_info) => {
                let tools = connector.list_tools().await?;
                println!();
                println!(
                    "{} ({} v{}): {} tools",
                    server_config.name,
                    server_info.name,
                    server_info.version,
                    tools.len()
                );
                for tool in &tools {
                    let desc = tool.description.as_deref().unwrap_or("");
                    let short: String = desc.chars().take(64).collect();
                    let ellipsis = if desc.chars().count() > 64 { "..." } else { "" };
                    println!("  {:<24} {}{}", tool.name, short, ellipsis);
                }
                connector.dispose().await;
            }
            Err(e) => {
                println!("{}: unavailable ({})", server_config.name, e);
            }
        }
    }

    if !matched {
        match server {
            Some(name) => println!("no server named '{}' in config", name),
            None => println!("no tool servers configured"),
        }
    }
    Ok(())
}
