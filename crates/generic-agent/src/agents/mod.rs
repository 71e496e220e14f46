mod agent;
mod descriptor;
pub mod item_tools;

pub use agent::{Agent, AgentError, AgentEvent, ReplyContext, DEFAULT_MAX_TURNS};
pub use descriptor::{
    build_generic_agent, AgentDescriptor, GENERIC_AGENT_INSTRUCTION, GENERIC_AGENT_NAME,
};
pub use item_tools::GetItemsTool;
