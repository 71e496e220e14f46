use crate::message::{Message, MessageContent, Role, ToolCall};
use crate::model::ModelConfig;
use crate::providers::base::Usage;
use crate::providers::errors::ProviderError;
use crate::tool::Tool;
use rand::{distributions::Alphanumeric, Rng};
use serde_json::{json, Map, Value};

/// Convert internal Message format to Google's API message specification.
///
/// Consecutive messages with the same role are merged into one turn. Gemini
/// expects every `functionResponse` answering one model turn in a single
/// user turn, and server-side and client-side tool results arrive as
/// separate messages.
pub fn format_messages(messages: &[Message]) -> Vec<Value> {
    let mut turns: Vec<(&'static str, Vec<Value>)> = Vec::new();
    for (role, parts) in messages
        .iter()
        .filter(|message| !message.is_empty())
        .map(|message| {
            let role = match message.role {
                Role::User => "user",
                Role::Assistant => "model",
            };
            let mut parts = Vec::new();
            for content in &message.content {
                match content {
                    MessageContent::Text { text } => {
                        if !text.is_empty() {
                            parts.push(json!({"text": text}));
                        }
                    }
                    MessageContent::ToolRequest(request) => {
                        let mut function_call = Map::new();
                        function_call.insert("name".to_string(), json!(request.tool_call.name));
                        if request
                            .tool_call
                            .arguments
                            .as_object()
                            .is_some_and(|args| !args.is_empty())
                        {
                            function_call
                                .insert("args".to_string(), request.tool_call.arguments.clone());
                        }
                        parts.push(json!({"functionCall": function_call}));
                    }
                    MessageContent::ToolResponse(response) => {
                        let payload = if response.is_error {
                            json!({"error": response.result})
                        } else {
                            json!({"content": response.result})
                        };
                        parts.push(json!({
                            "functionResponse": {
                                "name": response.name,
                                "response": payload,
                            }
                        }));
                    }
                }
            }
            (role, parts)
        })
    {
        match turns.last_mut() {
            Some((last_role, last_parts)) if *last_role == role => last_parts.extend(parts),
            _ => turns.push((role, parts)),
        }
    }

    turns
        .into_iter()
        .map(|(role, parts)| json!({"role": role, "parts": parts}))
        .collect()
}

/// Convert internal Tool format to Google's API tool specification
pub fn format_tools(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            let mut declaration = Map::new();
            declaration.insert("name".to_string(), json!(tool.name));
            declaration.insert("description".to_string(), json!(tool.description));
            // Gemini rejects an empty `properties` object, so zero-argument
            // tools are declared without parameters.
            if tool
                .input_schema
                .get("properties")
                .and_then(Value::as_object)
                .is_some_and(|p| !p.is_empty())
            {
                declaration.insert("parameters".to_string(), tool.input_schema.clone());
            }
            Value::Object(declaration)
        })
        .collect()
}

fn generate_call_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

/// Convert Google's API response to internal Message format
pub fn response_to_message(response: &Value) -> Result<Message, ProviderError> {
    let created = chrono::Utc::now().timestamp();
    let Some(candidate) = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
    else {
        return Ok(Message::new(Role::Assistant, created, Vec::new()));
    };

    let parts = candidate
        .get("content")
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut content = Vec::new();
    for part in parts {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            content.push(MessageContent::text(text));
        } else if let Some(function_call) = part.get("functionCall") {
            let name = function_call
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ProviderError::ResponseParseError("functionCall without a name".to_string())
                })?;
            let arguments = function_call
                .get("args")
                .cloned()
                .unwrap_or_else(|| json!({}));
            content.push(MessageContent::tool_request(
                generate_call_id(),
                ToolCall::new(name, arguments),
            ));
        }
    }
    Ok(Message::new(Role::Assistant, created, content))
}

/// Extract usage information from Google's API response
pub fn get_usage(data: &Value) -> Usage {
    let Some(metadata) = data.get("usageMetadata") else {
        tracing::debug!("No usage data found in response");
        return Usage::default();
    };
    let count = |key: &str| metadata.get(key).and_then(Value::as_u64).map(|v| v as i32);
    Usage::new(
        count("promptTokenCount"),
        count("candidatesTokenCount"),
        count("totalTokenCount"),
    )
}

/// Create a complete request payload for Google's API
pub fn create_request(
    model_config: &ModelConfig,
    system: &str,
    messages: &[Message],
    tools: &[Tool],
) -> Value {
    let mut payload = Map::new();
    payload.insert(
        "system_instruction".to_string(),
        json!({"parts": [{"text": system}]}),
    );
    payload.insert("contents".to_string(), json!(format_messages(messages)));
    if !tools.is_empty() {
        payload.insert(
            "tools".to_string(),
            json!({"functionDeclarations": format_tools(tools)}),
        );
    }
    let mut generation_config = Map::new();
    if let Some(temp) = model_config.temperature {
        generation_config.insert("temperature".to_string(), json!(temp as f64));
    }
    if let Some(tokens) = model_config.max_tokens {
        generation_config.insert("maxOutputTokens".to_string(), json!(tokens));
    }
    if !generation_config.is_empty() {
        payload.insert("generationConfig".to_string(), json!(generation_config));
    }

    Value::Object(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_usage() {
        let data = json!({
            "usageMetadata": {
                "promptTokenCount": 1,
                "candidatesTokenCount": 2,
                "totalTokenCount": 3
            }
        });
        let usage = get_usage(&data);
        assert_eq!(usage.input_tokens, Some(1));
        assert_eq!(usage.output_tokens, Some(2));
        assert_eq!(usage.total_tokens, Some(3));
        assert_eq!(get_usage(&json!({})), Usage::default());
    }

    #[test]
    fn test_message_to_google_spec_text_message() {
        let messages = vec![
            Message::user().with_text("Hello"),
            Message::assistant().with_text("World"),
        ];
        let payload = format_messages(&messages);
        assert_eq!(payload.len(), 2);
        assert_eq!(payload[0]["role"], "user");
        assert_eq!(payload[0]["parts"][0]["text"], "Hello");
        assert_eq!(payload[1]["role"], "model");
        assert_eq!(payload[1]["parts"][0]["text"], "World");
    }

    #[test]
    fn test_tool_round_trip_parts() {
        let messages = vec![
            Message::assistant().with_tool_request("id", ToolCall::new("get_items", json!({}))),
            Message::user().with_tool_response("id", "get_items", json!(["Item 1"])),
        ];
        let payload = format_messages(&messages);
        assert_eq!(payload[0]["parts"][0]["functionCall"]["name"], "get_items");
        assert!(payload[0]["parts"][0]["functionCall"].get("args").is_none());
        assert_eq!(
            payload[1]["parts"][0]["functionResponse"]["response"]["content"][0],
            "Item 1"
        );
    }

    #[test]
    fn test_split_tool_responses_share_one_turn() {
        let messages = vec![
            Message::user().with_text("show items"),
            Message::assistant()
                .with_tool_request("a", ToolCall::new("get_items", json!({})))
                .with_tool_request("b", ToolCall::new("render_ItemsList", json!({"items": []}))),
            Message::user().with_tool_response("a", "get_items", json!(["Item 1"])),
            Message::user().with_tool_response("b", "render_ItemsList", json!("done")),
        ];
        let payload = format_messages(&messages);
        assert_eq!(payload.len(), 3);
        assert_eq!(payload[1]["parts"].as_array().unwrap().len(), 2);
        assert_eq!(payload[2]["role"], "user");
        let parts = payload[2]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["functionResponse"]["name"], "get_items");
        assert_eq!(parts[1]["functionResponse"]["name"], "render_ItemsList");
    }

    #[test]
    fn test_format_tools_omits_empty_parameters() {
        let tools = vec![
            Tool::without_parameters("get_items", "Returns a list of available items."),
            Tool::new(
                "render_ItemsList",
                "Render items",
                json!({"type": "object", "properties": {"items": {"type": "array"}}}),
            ),
        ];
        let formatted = format_tools(&tools);
        assert!(formatted[0].get("parameters").is_none());
        assert_eq!(formatted[1]["parameters"]["properties"]["items"]["type"], "array");
    }

    #[test]
    fn test_response_to_message() {
        let response = json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "Here are the items:"},
                        {"functionCall": {"name": "get_items"}}
                    ]
                }
            }]
        });
        let message = response_to_message(&response).unwrap();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.as_concat_text(), "Here are the items:");
        let request = message.tool_requests().next().unwrap();
        assert_eq!(request.tool_call.name, "get_items");
        assert_eq!(request.tool_call.arguments, json!({}));
        assert_eq!(request.id.len(), 8);
    }

    #[test]
    fn test_response_without_candidates_is_empty() {
        let message = response_to_message(&json!({})).unwrap();
        assert!(message.is_empty());
    }

    #[test]
    fn test_create_request_includes_generation_config() {
        let config = ModelConfig::new("gemini-2.5-flash".to_string())
            .with_temperature(Some(0.5))
            .with_max_tokens(Some(256));
        let payload = create_request(
            &config,
            "be helpful",
            &[Message::user().with_text("hi")],
            &[Tool::without_parameters("get_items", "items")],
        );
        assert_eq!(payload["system_instruction"]["parts"][0]["text"], "be helpful");
        assert_eq!(payload["generationConfig"]["maxOutputTokens"], 256);
        assert_eq!(
            payload["tools"]["functionDeclarations"][0]["name"],
            "get_items"
        );
    }
}
