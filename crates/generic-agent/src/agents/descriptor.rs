use std::sync::Arc;

use indoc::indoc;

use super::item_tools::GetItemsTool;
use crate::items::ItemFormat;
use crate::model::{ModelConfig, DEFAULT_MODEL};
use crate::tool::{Tool, ToolHandler};

pub const GENERIC_AGENT_NAME: &str = "GenericAgent";

pub const GENERIC_AGENT_INSTRUCTION: &str = indoc! {r#"
    You are a helpful assistant that provides information about available items.
    ALWAYS Wait for the user to ask for the list of items before providing it.

    ## USER CONTEXT:
    - User name: "{user_name}"
"#};

/// An agent's immutable configuration: who it is, which model answers for it
/// and which backend tools it may call.
#[derive(Clone)]
pub struct AgentDescriptor {
    pub name: String,
    pub model: ModelConfig,
    /// Template rendered against session state on every turn.
    pub instruction: String,
    pub tools: Vec<Arc<dyn ToolHandler>>,
}

impl std::fmt::Debug for AgentDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentDescriptor")
            .field("name", &self.name)
            .field("model", &self.model.model_name)
            .field(
                "tools",
                &self.tools.iter().map(|t| t.tool().name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl AgentDescriptor {
    pub fn tool_declarations(&self) -> Vec<Tool> {
        self.tools.iter().map(|handler| handler.tool()).collect()
    }

    pub fn find_tool(&self, name: &str) -> Option<&Arc<dyn ToolHandler>> {
        self.tools.iter().find(|handler| handler.tool().name == name)
    }
}

/// Builds the one agent this server hosts.
pub fn build_generic_agent(format: ItemFormat) -> Arc<AgentDescriptor> {
    Arc::new(AgentDescriptor {
        name: GENERIC_AGENT_NAME.to_string(),
        model: ModelConfig::new(DEFAULT_MODEL.to_string()),
        instruction: GENERIC_AGENT_INSTRUCTION.to_string(),
        tools: vec![Arc::new(GetItemsTool::new(format))],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt_template::render_instruction;
    use serde_json::{json, Map};

    #[test]
    fn test_generic_agent_descriptor() {
        let agent = build_generic_agent(ItemFormat::Labels);
        assert_eq!(agent.name, "GenericAgent");
        assert_eq!(agent.model.model_name, "gemini-2.5-flash");
        assert_eq!(agent.tools.len(), 1);
        assert!(agent.find_tool("get_items").is_some());
        assert!(agent.find_tool("render_ItemsList").is_none());
        assert!(agent.instruction.contains("{user_name}"));
    }

    #[test]
    fn test_instruction_renders_user_name() {
        let agent = build_generic_agent(ItemFormat::Records);
        let mut state = Map::new();
        state.insert("user_name".into(), json!("Joe Doe"));
        let rendered = render_instruction(&agent.instruction, &state);
        assert!(rendered.contains(r#"- User name: "Joe Doe""#));
        assert!(rendered.starts_with("You are a helpful assistant"));
    }
}
