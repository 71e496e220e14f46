use async_trait::async_trait;
use serde_json::Value;

use crate::items::{get_items, ItemFormat};
use crate::tool::{Tool, ToolError, ToolHandler, ToolResult};

pub const GET_ITEMS_TOOL_NAME: &str = "get_items";
pub const GET_ITEMS_DESCRIPTION: &str = "Returns a list of available items.";

/// Zero-argument lookup over the mock catalog.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetItemsTool {
    format: ItemFormat,
}

impl GetItemsTool {
    pub fn new(format: ItemFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> ItemFormat {
        self.format
    }
}

#[async_trait]
impl ToolHandler for GetItemsTool {
    fn tool(&self) -> Tool {
        Tool::without_parameters(GET_ITEMS_TOOL_NAME, GET_ITEMS_DESCRIPTION)
    }

    // Arguments are ignored; models occasionally send `{}` or nothing at all.
    async fn call(&self, _arguments: Value) -> ToolResult<Value> {
        serde_json::to_value(get_items(self.format))
            .map_err(|e| ToolError::ExecutionError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_labels_result() {
        let result = GetItemsTool::new(ItemFormat::Labels)
            .call(json!({}))
            .await
            .unwrap();
        assert_eq!(
            result,
            json!(["Item 1", "Item 2", "Item 3", "Item 4", "Item 5"])
        );
    }

    #[tokio::test]
    async fn test_records_result_ignores_arguments() {
        let result = GetItemsTool::new(ItemFormat::Records)
            .call(json!({"unexpected": true}))
            .await
            .unwrap();
        let entries = result.as_array().unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0]["name"], "Item 1");
        assert!(entries[4]["description"].is_string());
    }

    #[test]
    fn test_declaration() {
        let tool = GetItemsTool::default().tool();
        assert_eq!(tool.name, "get_items");
        assert_eq!(tool.description, "Returns a list of available items.");
        assert_eq!(tool.input_schema["properties"], json!({}));
    }
}
