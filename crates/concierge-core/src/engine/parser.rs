//! Action-envelope parsing.
//!
//! The engine prompts the model for a JSON envelope,
//! `{"thought": ..., "action": {...}}`, where the action is either a tool
//! invocation or a final answer.  Models wrap JSON in markdown fences
//! despite instructions, so extraction is fence-tolerant.

use serde_json::Value;

use crate::error::{CoreError, Result};

/// A parsed action envelope.
#[derive(Debug, Clone)]
pub struct ParsedAction {
    pub thought: String,
    pub action: Action,
}

/// What the model asked for.
#[derive(Debug, Clone)]
pub enum Action {
    Tool { name: String, arguments: Value },
    Answer { text: String },
}

/// Parse the model's raw output into an action envelope.
pub fn parse_action(text: &str) -> Result<ParsedAction> {
    let json_str = extract_json_block(text);

    let v: Value = serde_json::from_str(json_str).map_err(|e| CoreError::ParseError {
        reason: format!("output is not valid JSON: {e}"),
    })?;

    let thought = v["thought"].as_str().unwrap_or_default().to_owned();

    let action = &v["action"];
    if !action.is_object() {
        return Err(CoreError::ParseError {
            reason: "missing `action` object".into(),
        });
    }

    if let Some(answer) = action["answer"].as_str() {
        return Ok(ParsedAction {
            thought,
            action: Action::Answer {
                text: answer.to_owned(),
            },
        });
    }

    if let Some(tool) = action["tool"].as_str() {
        if tool.is_empty() {
            return Err(CoreError::ParseError {
                reason: "`action.tool` must be a non-empty string".into(),
            });
        }
        let arguments = match &action["arguments"] {
            Value::Null => Value::Object(serde_json::Map::new()),
            args @ Value::Object(_) => args.clone(),
            other => {
                return Err(CoreError::ParseError {
                    reason: format!("`action.arguments` must be an object, got {other}"),
                });
            }
        };
        return Ok(ParsedAction {
            thought,
            action: Action::Tool {
                name: tool.to_owned(),
                arguments,
            },
        });
    }

    Err(CoreError::ParseError {
        reason: "`action` must contain either `tool` or `answer`".into(),
    })
}

/// Try to extract a JSON block from text that might be wrapped in markdown
/// code fences.
fn extract_json_block(text: &str) -> &str {
    let trimmed = text.trim();

    // Check for ```json ... ``` fences.
    if let Some(start) = trimmed.find("```json") {
        let json_start = start + 7; // len("```json")
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    // Check for ``` ... ``` fences (without language tag).
    if let Some(start) = trimmed.find("```") {
        let json_start = start + 3;
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    // Try the raw text as JSON.
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tool_action() {
        let parsed = parse_action(
            r#"{"thought": "need the time", "action": {"tool": "clock", "arguments": {}}}"#,
        )
        .unwrap();
        assert_eq!(parsed.thought, "need the time");
        match parsed.action {
            Action::Tool { name, arguments } => {
                assert_eq!(name, "clock");
                assert!(arguments.as_object().unwrap().is_empty());
            }
            _ => panic!("expected tool action"),
        }
    }

    #[test]
    fn parses_answer_action() {
        let parsed =
            parse_action(r#"{"thought": "done", "action": {"answer": "It is noon."}}"#).unwrap();
        match parsed.action {
            Action::Answer { text } => assert_eq!(text, "It is noon."),
            _ => panic!("expected answer action"),
        }
    }

    #[test]
    fn tolerates_fenced_output() {
        let text = "Sure, here is my action:\n```json\n{\"thought\": \"t\", \"action\": {\"answer\": \"ok\"}}\n```";
        let parsed = parse_action(text).unwrap();
        assert!(matches!(parsed.action, Action::Answer { .. }));
    }

    #[test]
    fn missing_arguments_defaults_to_empty_object() {
        let parsed =
            parse_action(r#"{"thought": "t", "action": {"tool": "clock"}}"#).unwrap();
        match parsed.action {
            Action::Tool { arguments, .. } => assert!(arguments.is_object()),
            _ => panic!("expected tool action"),
        }
    }

    #[test]
    fn prose_is_a_parse_error() {
        let err = parse_action("I think the answer is probably 42.").unwrap_err();
        assert!(matches!(err, CoreError::ParseError { .. }));
    }

    #[test]
    fn action_without_tool_or_answer_is_rejected() {
        let err = parse_action(r#"{"thought": "t", "action": {"plan": "later"}}"#).unwrap_err();
        assert!(matches!(err, CoreError::ParseError { .. }));
    }

    #[test]
    fn non_object_arguments_rejected() {
        let err = parse_action(
            r#"{"thought": "t", "action": {"tool": "clock", "arguments": "now"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::ParseError { .. }));
    }
}
