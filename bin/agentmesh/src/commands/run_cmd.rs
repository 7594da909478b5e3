use std::path::Path;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::info;

use agentmesh_scheduler::TriggerManager;

/// Run the long-lived daemon: connect tool servers, register agents, start
/// the trigger manager, and wait for ctrl-c.
pub async fn run(config_path: &Path) -> anyhow::Result<()> {
    let stack = super::build(config_path).await?;
    info!(
        servers = stack.connectors.len(),
        agents = stack.config.agents.len(),
        "agentmesh daemon starting"
    );

    let manager = TriggerManager::new(
        stack.bus.clone(),
        stack.registry.clone(),
        stack.runtime.clone(),
        Duration::from_secs(stack.config.limits.cron_tick_secs),
    );
    manager.start();

    let (shutdown_tx, _) = broadcast::channel(1);
    let cron_loop = tokio::spawn(manager.clone().run_loop(shutdown_tx.subscribe()));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    let _ = shutdown_tx.send(());
    manager.stop();
    let _ = cron_loop.await;
    stack.dispose().await;

    info!("agentmesh daemon stopped");
    Ok(())
}
