//! Resolves which user an AG-UI request belongs to.

use std::sync::Arc;

use serde_json::Value;

use crate::ag_ui::RunAgentInput;

pub const ANONYMOUS_USER_ID: &str = "anonymous";
pub const USER_ID_STATE_KEY: &str = "user_id";

/// Maps an inbound request to the user id its session is stored under.
pub type UserIdExtractor = Arc<dyn Fn(&RunAgentInput) -> String + Send + Sync>;

/// The default extractor: `state.user_id` when it is present and truthy,
/// otherwise [`ANONYMOUS_USER_ID`].
pub fn user_id_from_state(input: &RunAgentInput) -> String {
    resolve_user_id(input.state.as_ref())
}

pub fn default_extractor() -> UserIdExtractor {
    Arc::new(user_id_from_state)
}

/// Never fails: anything that is not an object carrying a truthy `user_id`
/// collapses to the fallback.
pub fn resolve_user_id(state: Option<&Value>) -> String {
    state
        .and_then(Value::as_object)
        .and_then(|map| map.get(USER_ID_STATE_KEY))
        .filter(|value| is_truthy(value))
        .map(|value| match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| ANONYMOUS_USER_ID.to_string())
}

/// JSON truthiness: `null`, `false`, `0`, `""`, `[]` and `{}` are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input_with_state(state: Option<Value>) -> RunAgentInput {
        let mut input = RunAgentInput::new("thread-1", "run-1");
        input.state = state;
        input
    }

    #[test]
    fn test_user_id_is_read_from_state() {
        let input = input_with_state(Some(json!({"user_id": "u42"})));
        assert_eq!(user_id_from_state(&input), "u42");
    }

    #[test]
    fn test_empty_state_falls_back() {
        let input = input_with_state(Some(json!({})));
        assert_eq!(user_id_from_state(&input), "anonymous");
    }

    #[test]
    fn test_missing_state_falls_back() {
        assert_eq!(user_id_from_state(&input_with_state(None)), "anonymous");
        assert_eq!(
            user_id_from_state(&input_with_state(Some(Value::Null))),
            "anonymous"
        );
    }

    #[test]
    fn test_falsy_user_id_falls_back() {
        for value in [json!(""), json!(0), json!(false), json!(null), json!([])] {
            let input = input_with_state(Some(json!({ "user_id": value })));
            assert_eq!(user_id_from_state(&input), "anonymous");
        }
    }

    #[test]
    fn test_non_mapping_state_falls_back() {
        for state in [json!("user_id"), json!(["user_id"]), json!(7), json!(true)] {
            assert_eq!(resolve_user_id(Some(&state)), "anonymous");
        }
    }

    #[test]
    fn test_non_string_user_id_is_rendered() {
        assert_eq!(resolve_user_id(Some(&json!({"user_id": 42}))), "42");
    }

    #[test]
    fn test_default_extractor_matches_function() {
        let extractor = default_extractor();
        let input = input_with_state(Some(json!({"user_id": "user-123", "user_name": "Joe"})));
        assert_eq!(extractor(&input), "user-123");
    }
}
