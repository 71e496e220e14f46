//! Instruction templating.
//!
//! Instructions reference session state with `{key}` placeholders. A trailing
//! `?` (`{key?}`) marks a placeholder as optional; both forms render an absent
//! key as the empty string. Braced text that is not a state key, such as a
//! JSON snippet, is left untouched.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{+[^{}]*\}+").expect("placeholder pattern is valid"));

const STATE_PREFIXES: [&str; 3] = ["app:", "user:", "temp:"];

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first == '_' || first.is_ascii_alphabetic() => {
            chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        }
        _ => false,
    }
}

fn is_state_key(name: &str) -> bool {
    let bare = STATE_PREFIXES
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
        .unwrap_or(name);
    is_identifier(bare)
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Replace `{key}` placeholders in `template` with values from `state`.
pub fn render_instruction(template: &str, state: &Map<String, Value>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let raw = &caps[0];
            let inner = raw.trim_matches(|c| c == '{' || c == '}').trim();
            let (name, optional) = match inner.strip_suffix('?') {
                Some(name) => (name, true),
                None => (inner, false),
            };

            if !is_state_key(name) {
                return raw.to_string();
            }

            match state.get(name) {
                Some(value) => render_value(value),
                None => {
                    if !optional {
                        tracing::debug!(key = name, "instruction placeholder has no state value");
                    }
                    String::new()
                }
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_substitutes_user_name() {
        let rendered = render_instruction(
            r#"- User name: "{user_name}""#,
            &state(json!({"user_name": "Joe Doe"})),
        );
        assert_eq!(rendered, r#"- User name: "Joe Doe""#);
    }

    #[test]
    fn test_missing_keys_render_empty() {
        let rendered = render_instruction("Hi {user_name}, {nickname?}!", &Map::new());
        assert_eq!(rendered, "Hi , !");
    }

    #[test]
    fn test_non_identifier_braces_are_kept() {
        let template = r#"Reply with {"ok": true} or {not a key}"#;
        assert_eq!(render_instruction(template, &Map::new()), template);
    }

    #[test]
    fn test_prefixed_and_structured_values() {
        let rendered = render_instruction(
            "{user:tier} / {count}",
            &state(json!({"user:tier": "gold", "count": 3})),
        );
        assert_eq!(rendered, "gold / 3");
    }
}
