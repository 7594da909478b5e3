use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use agentmesh_core::{Error, Result};
use agentmesh_protocol::ToolDescriptor;

use crate::ToolTransport;

/// Aggregates several tool servers behind one transport. Tool names are
/// qualified as `<server>__<tool>`; unqualified names are routed only when a
/// single server is attached.
#[derive(Default)]
pub struct MultiTransport {
    transports: Vec<(String, Arc<dyn ToolTransport>)>,
}

impl MultiTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, server: &str, transport: Arc<dyn ToolTransport>) {
        self.transports.push((server.to_string(), transport));
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }
}

#[async_trait]
impl ToolTransport for MultiTransport {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let mut all = Vec::new();
        for (server, transport) in &self.transports {
            for mut tool in transport.list_tools().await? {
                tool.name = format!("{}__{}", server, tool.name);
                all.push(tool);
            }
        }
        Ok(all)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        if let Some((server, tool)) = name.split_once("__") {
            let transport = self
                .transports
                .iter()
                .find(|(s, _)| s == server)
                .map(|(_, t)| t)
                .ok_or_else(|| Error::Tool(format!("unknown tool server: {}", server)))?;
            return transport.call_tool(tool, arguments).await;
        }
        match self.transports.as_slice() {
            [(_, only)] => only.call_tool(name, arguments).await,
            [] => Err(Error::Tool("no tool servers attached".to_string())),
            _ => Err(Error::Tool(format!(
                "unqualified tool name '{}' with multiple servers attached",
                name
            ))),
        }
    }
}
