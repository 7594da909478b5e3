pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, RuntimeLimits, ServerConfig};
pub use error::{Error, Result};
pub use types::{AgentDefinition, Event, Trigger, TriggerInfo};
