//! Per-query reasoning state.
//!
//! One [`ReasoningState`] exists per in-flight query, owned by the engine
//! run that created it and never shared.  It is the full record of a run:
//! every step, every model-call attempt, and the termination marker.  The
//! final answer is derived from this record alone, so replaying a finalized
//! state always reproduces the same answer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::usage::UsageLedger;

/// What the model decided to do in one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    /// Invoke a tool with the given arguments.
    Tool { name: String, arguments: Value },
    /// Produce the final answer; the text lives in the step observation.
    Answer,
    /// The model output could not be parsed into an action at all.
    Malformed,
}

/// How a step concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    ToolError,
    ParseError,
}

/// One completed think/act/observe cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningStep {
    /// The model's stated reasoning for this step.
    pub thought: String,
    pub action: StepAction,
    /// Tool output, answer text, or error message, truncated to the
    /// configured observation limit.
    pub observation: String,
    pub status: StepStatus,
    /// Whether the observation came from a trusted tool and must be cited
    /// over model recall.
    pub trusted: bool,
}

impl ReasoningStep {
    fn action_tool(&self) -> Option<(&str, &Value)> {
        match &self.action {
            StepAction::Tool { name, arguments } => Some((name, arguments)),
            _ => None,
        }
    }
}

/// The accumulated record of one engine run.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReasoningState {
    /// Correlates this run with its query across logs and sinks.
    pub query_id: Uuid,
    pub started_at: DateTime<Utc>,
    steps: Vec<ReasoningStep>,
    ledger: UsageLedger,
    terminated: bool,
}

impl ReasoningState {
    pub fn new(query_id: Uuid) -> Self {
        Self {
            query_id,
            started_at: Utc::now(),
            steps: Vec::new(),
            ledger: UsageLedger::new(),
            terminated: false,
        }
    }

    /// Completed steps, oldest first.
    pub fn steps(&self) -> &[ReasoningStep] {
        &self.steps
    }

    /// The model-attempt ledger for this run.
    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut UsageLedger {
        &mut self.ledger
    }

    /// Append a completed step.
    pub fn push_step(&mut self, step: ReasoningStep) {
        self.steps.push(step);
    }

    /// Mark the run finished. No further steps may be appended.
    pub fn terminate(&mut self) {
        self.terminated = true;
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// The successful answer step, if the run produced one.
    pub fn answer_step(&self) -> Option<&ReasoningStep> {
        self.steps
            .iter()
            .rev()
            .find(|s| matches!(s.action, StepAction::Answer) && s.status == StepStatus::Ok)
    }

    /// Most recent successful observation of any kind, for degraded
    /// answers when the run ends without an answer step.
    pub fn last_successful_observation(&self) -> Option<&ReasoningStep> {
        self.steps
            .iter()
            .rev()
            .find(|s| s.status == StepStatus::Ok && !matches!(s.action, StepAction::Answer))
    }

    /// Trusted successful tool observations, most recent first.
    pub fn trusted_observations(&self) -> Vec<&ReasoningStep> {
        self.steps
            .iter()
            .rev()
            .filter(|s| s.trusted && s.status == StepStatus::Ok)
            .collect()
    }

    /// The tool name whose repeated identical failure should force
    /// termination, if the last two steps are identical failures of the
    /// same (tool, arguments) pair.
    pub fn repeated_failure(&self) -> Option<&str> {
        let [.., prev, last] = self.steps.as_slice() else {
            return None;
        };
        if last.status != StepStatus::ToolError || prev.status != StepStatus::ToolError {
            return None;
        }
        let (last_tool, last_args) = last.action_tool()?;
        let (prev_tool, prev_args) = prev.action_tool()?;
        (last_tool == prev_tool && last_args == prev_args && last.observation == prev.observation)
            .then_some(last_tool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_error(name: &str, args: Value, message: &str) -> ReasoningStep {
        ReasoningStep {
            thought: "try the tool".into(),
            action: StepAction::Tool {
                name: name.into(),
                arguments: args,
            },
            observation: message.into(),
            status: StepStatus::ToolError,
            trusted: false,
        }
    }

    #[test]
    fn repeated_identical_failures_detected() {
        let mut state = ReasoningState::new(Uuid::now_v7());
        state.push_step(tool_error("crm_lookup", json!({"id": 7}), "upstream 500"));
        assert_eq!(state.repeated_failure(), None);

        state.push_step(tool_error("crm_lookup", json!({"id": 7}), "upstream 500"));
        assert_eq!(state.repeated_failure(), Some("crm_lookup"));
    }

    #[test]
    fn different_arguments_do_not_trip() {
        let mut state = ReasoningState::new(Uuid::now_v7());
        state.push_step(tool_error("crm_lookup", json!({"id": 7}), "upstream 500"));
        state.push_step(tool_error("crm_lookup", json!({"id": 8}), "upstream 500"));
        assert_eq!(state.repeated_failure(), None);
    }

    #[test]
    fn trusted_observations_are_most_recent_first() {
        let mut state = ReasoningState::new(Uuid::now_v7());
        for (i, trusted) in [(0, true), (1, false), (2, true)] {
            state.push_step(ReasoningStep {
                thought: format!("step {i}"),
                action: StepAction::Tool {
                    name: "lookup".into(),
                    arguments: json!({}),
                },
                observation: format!("obs {i}"),
                status: StepStatus::Ok,
                trusted,
            });
        }
        let trusted: Vec<&str> = state
            .trusted_observations()
            .iter()
            .map(|s| s.observation.as_str())
            .collect();
        assert_eq!(trusted, vec!["obs 2", "obs 0"]);
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut state = ReasoningState::new(Uuid::now_v7());
        state.push_step(tool_error("clock", json!({}), "timed out"));
        state.terminate();

        let text = serde_json::to_string(&state).unwrap();
        let back: ReasoningState = serde_json::from_str(&text).unwrap();
        assert_eq!(back.query_id, state.query_id);
        assert_eq!(back.steps().len(), 1);
        assert!(back.is_terminated());
    }
}
