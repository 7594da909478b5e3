pub mod context;
pub mod memory;
pub mod planner;
pub mod registry;
pub mod runtime;

pub use context::{ActionRecord, ExecutionContext, ExecutionRecord, RunStatus};
pub use memory::{InMemoryWorkingMemory, MemoryTurn, WorkingMemory};
pub use planner::{ActionKind, ActionPlanner, ActionRequest, PlanningContext};
pub use registry::{AgentRegistry, CronEntry};
pub use runtime::AgentRuntime;
