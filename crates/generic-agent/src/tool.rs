//! Tools the model may call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Declaration of a tool as the model sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl Tool {
    pub fn new<N: Into<String>, D: Into<String>>(name: N, description: D, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// A tool that takes no arguments.
    pub fn without_parameters<N: Into<String>, D: Into<String>>(name: N, description: D) -> Self {
        Self::new(
            name,
            description,
            json!({"type": "object", "properties": {}, "required": []}),
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),
    #[error("Execution failed: {0}")]
    ExecutionError(String),
}

pub type ToolResult<T> = Result<T, ToolError>;

/// A tool implemented on the server side of the conversation.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn tool(&self) -> Tool;

    async fn call(&self, arguments: Value) -> ToolResult<Value>;
}
