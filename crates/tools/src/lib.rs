pub mod executor;
pub mod multi;
pub mod record;

use async_trait::async_trait;
use serde_json::Value;

use agentmesh_core::Result;
use agentmesh_protocol::{Connector, ToolDescriptor};

pub use executor::ToolExecutor;
pub use multi::MultiTransport;
pub use record::{ExecutionOutcome, ExecutionStatus, ToolExecution, ToolStats};

/// Seam between the executor and whatever actually runs the tools. The
/// production transport is a [`Connector`]; tests substitute stubs.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value>;
}

#[async_trait]
impl ToolTransport for Connector {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        Connector::list_tools(self).await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        Connector::call_tool(self, name, arguments).await
    }
}
