//! Prompt assembly for the reasoning loop.
//!
//! The loop never uses provider-native function calling; every tier is
//! driven through the same JSON action envelope, so behavior does not
//! change when the gateway falls back to a tier without tool support.

use serde_json::json;

use crate::chat::{Message, ToolDefinition};
use crate::engine::state::{ReasoningState, StepAction, StepStatus};
use crate::query::Query;

/// Injected after a step whose output could not be parsed.
pub const CORRECTIVE_INSTRUCTION: &str = "Your previous reply was not a valid action envelope. \
     Reply with a single JSON object of the form \
     {\"thought\": \"...\", \"action\": {\"tool\": \"...\", \"arguments\": {...}}} \
     or {\"thought\": \"...\", \"action\": {\"answer\": \"...\"}}. \
     No prose outside the JSON object.";

/// System prompt for the step loop, listing the permitted tools.
pub fn system_prompt(tools: &[ToolDefinition]) -> String {
    let mut prompt = String::from(
        "You are a concierge assistant that solves the user's request step by step.\n\
         \n\
         Each turn, reply with exactly one JSON object and nothing else:\n\
         {\"thought\": \"<your reasoning>\", \"action\": {\"tool\": \"<name>\", \"arguments\": {...}}}\n\
         to invoke a tool, or\n\
         {\"thought\": \"<your reasoning>\", \"action\": {\"answer\": \"<final answer>\"}}\n\
         when you can answer the user.\n\
         \n\
         Rules:\n\
         - Use only the tools listed below, with arguments matching their schema.\n\
         - Prefer answering directly once you have what you need.\n\
         - When a tool result contradicts what you believe, the tool result wins.\n",
    );

    if tools.is_empty() {
        prompt.push_str("\nNo tools are available; answer directly.\n");
    } else {
        prompt.push_str("\nAvailable tools:\n");
        for tool in tools {
            prompt.push_str(&format!(
                "- {}: {}\n  arguments schema: {}\n",
                tool.name, tool.description, tool.input_schema
            ));
        }
    }
    prompt
}

/// System prompt for the direct (single-shot) strategy.
pub fn direct_system_prompt() -> &'static str {
    "You are a concierge assistant. Answer the user's request directly, \
     accurately, and concisely."
}

/// Rebuild the conversation for the next model call: history, the query,
/// then one assistant/user pair per completed step.
pub fn transcript(query: &Query, state: &ReasoningState) -> Vec<Message> {
    let mut messages = Vec::with_capacity(2 + query.history.len() + state.steps().len() * 2);

    messages.extend(query.history.iter().cloned());
    messages.push(Message::user(&query.text));

    for step in state.steps() {
        match (&step.action, step.status) {
            (StepAction::Tool { name, arguments }, status) => {
                let envelope = json!({
                    "thought": step.thought,
                    "action": {"tool": name, "arguments": arguments},
                });
                messages.push(Message::assistant(envelope.to_string()));
                let label = match status {
                    StepStatus::Ok => "Observation",
                    _ => "Tool error",
                };
                messages.push(Message::user(format!("{label}: {}", step.observation)));
            }
            (StepAction::Malformed, _) => {
                messages.push(Message::assistant("(unparseable output)"));
                messages.push(Message::user(format!(
                    "{CORRECTIVE_INSTRUCTION}\nParse failure: {}",
                    step.observation
                )));
            }
            // Answer steps end the loop; a finalized state is never
            // rendered back into a prompt.
            (StepAction::Answer, _) => {}
        }
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::state::ReasoningStep;
    use uuid::Uuid;

    #[test]
    fn system_prompt_lists_tools() {
        let tools = vec![ToolDefinition {
            name: "calculator".into(),
            description: "math".into(),
            input_schema: json!({"type": "object"}),
        }];
        let prompt = system_prompt(&tools);
        assert!(prompt.contains("- calculator: math"));
        assert!(prompt.contains("\"thought\""));
    }

    #[test]
    fn transcript_interleaves_steps() {
        let query = Query::new("What time is it?");
        let mut state = ReasoningState::new(Uuid::now_v7());
        state.push_step(ReasoningStep {
            thought: "check the clock".into(),
            action: StepAction::Tool {
                name: "clock".into(),
                arguments: json!({}),
            },
            observation: "2026-08-31T12:00:00Z".into(),
            status: StepStatus::Ok,
            trusted: false,
        });

        let messages = transcript(&query, &state);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "What time is it?");
        assert!(messages[1].content.contains("\"tool\":\"clock\""));
        assert!(messages[2].content.starts_with("Observation: "));
    }

    #[test]
    fn parse_failures_inject_corrective_instruction() {
        let query = Query::new("hi");
        let mut state = ReasoningState::new(Uuid::now_v7());
        state.push_step(ReasoningStep {
            thought: String::new(),
            action: StepAction::Malformed,
            observation: "output is not valid JSON".into(),
            status: StepStatus::ParseError,
            trusted: false,
        });

        let messages = transcript(&query, &state);
        assert!(messages[2].content.contains("valid action envelope"));
    }
}
