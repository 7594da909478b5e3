pub mod agent_cmd;
pub mod init;
pub mod run_cmd;
pub mod tools_cmd;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use agentmesh_agent::{AgentRegistry, AgentRuntime, InMemoryWorkingMemory};
use agentmesh_core::Config;
use agentmesh_events::EventBus;
use agentmesh_protocol::Connector;
use agentmesh_skills::SkillRegistry;
use agentmesh_tools::{MultiTransport, ToolExecutor};

/// Everything a command needs after wiring: the loaded configuration plus the
/// live component graph.
pub(crate) struct Stack {
    pub config: Config,
    pub bus: Arc<EventBus>,
    pub connectors: Vec<Arc<Connector>>,
    pub registry: Arc<AgentRegistry>,
    pub runtime: Arc<AgentRuntime>,
}

impl Stack {
    pub(crate) async fn dispose(&self) {
        for connector in &self.connectors {
            connector.dispose().await;
        }
    }
}

/// Load the configuration and bring up the component graph: bus, one
/// connector per configured server (unreachable servers are skipped with a
/// warning), executor, builtin skills, registry, and runtime.
pub(crate) async fn build(config_path: &Path) -> anyhow::Result<Stack> {
    let config = Config::load(config_path)
        .await
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let limits = config.limits.clone();

    let bus = EventBus::new(limits.history_limit);

    let mut connectors = Vec::new();
    let mut transport = MultiTransport::new();
    for server in &config.servers {
        let connector = Arc::new(Connector::new(
            server.clone(),
            bus.clone(),
            Duration::from_millis(limits.request_timeout_ms),
        ));
        match connector
            .connect(Duration::from_millis(limits.handshake_timeout_ms))
            .await
        {
            Ok(server_info) => {
                info!(
                    server = %server.name,
                    name = %server_info.name,
                    version = %server_info.version,
                    "tool server connected"
                );
                transport.add(&server.name, connector.clone());
                connectors.push(connector);
            }
            Err(e) => {
                warn!(server = %server.name, error = %e, "tool server unavailable, continuing without it");
            }
        }
    }

    let executor = Arc::new(ToolExecutor::new(
        Arc::new(transport),
        bus.clone(),
        limits.history_limit,
    ));
    if !connectors.is_empty() {
        if let Err(e) = executor.refresh_schemas().await {
            warn!(error = %e, "could not load tool schemas");
        }
    }

    let mut skills = SkillRegistry::new();
    crate::skills::register_builtins(&mut skills, bus.clone());

    let registry = Arc::new(AgentRegistry::new());
    for agent in &config.agents {
        if let Err(e) = registry.register(agent.clone()) {
            warn!(agent = %agent.id, error = %e, "agent definition rejected");
        }
    }

    let runtime = Arc::new(AgentRuntime::new(
        registry.clone(),
        executor,
        Arc::new(skills),
        bus.clone(),
        Arc::new(InMemoryWorkingMemory::new(limits.history_limit)),
        None,
        limits.max_concurrent,
        Duration::from_millis(limits.execution_timeout_ms),
        limits.history_limit,
    ));

    Ok(Stack {
        config,
        bus,
        connectors,
        registry,
        runtime,
    })
}
