//! Reasoning engine.
//!
//! Runs one query to completion as a bounded think/act/observe loop (or a
//! single direct call for simple queries).  Every external effect is
//! bounded: step count, wall-clock deadline, spend ceiling, parse retries,
//! and a loop breaker for a model stuck re-issuing a failing tool call.
//! The run's entire record lives in [`ReasoningState`]; the final answer is
//! a pure function of that record.

pub mod parser;
pub mod prompt;
pub mod state;

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use state::{ReasoningState, ReasoningStep, StepAction, StepStatus};

use crate::chat::{ChatRequest, Message, ToolCall};
use crate::error::CoreError;
use crate::gateway::{ModelGateway, ModelReply};
use crate::query::Query;
use crate::router::{RoutingDecision, Strategy};
use crate::tools::{ToolExecutor, ToolResult};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Engine bounds. All of these are hard limits, not hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum think/act/observe cycles per run.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Corrective retries after unparseable model output.
    #[serde(default = "default_max_parse_retries")]
    pub max_parse_retries: u32,

    /// Tool observations are truncated to this many characters before they
    /// enter the state and the next prompt.
    #[serde(default = "default_max_observation_len")]
    pub max_observation_len: usize,

    /// Per-query spend ceiling in USD. The engine refuses to start a model
    /// call whose worst-case cost could push the ledger past it, so the
    /// recorded total never exceeds the ceiling.
    #[serde(default = "default_cost_ceiling")]
    pub cost_ceiling: Decimal,
}

fn default_max_steps() -> usize {
    8
}

fn default_max_parse_retries() -> u32 {
    2
}

fn default_max_observation_len() -> usize {
    2000
}

fn default_cost_ceiling() -> Decimal {
    dec!(0.50)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_parse_retries: default_max_parse_retries(),
            max_observation_len: default_max_observation_len(),
            cost_ceiling: default_cost_ceiling(),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// A trusted observation backing the final answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub tool: String,
    pub observation: String,
}

/// The composed result of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub text: String,
    /// True when the run hit a bound before the model produced a proper
    /// answer and the text is best-effort.
    pub truncated: bool,
    /// Trusted observations, most recent first.
    pub citations: Vec<Citation>,
}

/// A run that finished with an answer (possibly truncated).
#[derive(Debug)]
pub struct EngineSuccess {
    pub answer: FinalAnswer,
    pub state: ReasoningState,
}

/// A run that terminated on a typed error. Partial progress is preserved.
#[derive(Debug)]
pub struct EngineFailure {
    pub error: CoreError,
    pub state: ReasoningState,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct ReasoningEngine {
    gateway: Arc<ModelGateway>,
    executor: ToolExecutor,
    config: EngineConfig,
}

impl ReasoningEngine {
    pub fn new(gateway: Arc<ModelGateway>, executor: ToolExecutor, config: EngineConfig) -> Self {
        Self {
            gateway,
            executor,
            config,
        }
    }

    /// Execute one query under the given routing decision.
    pub async fn run(
        &self,
        query: &Query,
        decision: &RoutingDecision,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<EngineSuccess, EngineFailure> {
        match decision.strategy {
            Strategy::Direct => self.direct(query, decision, deadline, cancel).await,
            Strategy::Reasoning => self.react(query, decision, deadline, cancel).await,
        }
    }

    /// Single-shot strategy: one model call, the reply is the answer.
    async fn direct(
        &self,
        query: &Query,
        decision: &RoutingDecision,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<EngineSuccess, EngineFailure> {
        let mut state = ReasoningState::new(query.id);

        let mut messages = vec![Message::system(prompt::direct_system_prompt())];
        messages.extend(query.history.iter().cloned());
        messages.push(Message::user(&query.text));
        let request = ChatRequest::new(messages).with_images(query.media.clone());

        // Same worst-case bound as the step loop: the single call must fit
        // under the ceiling before it starts.
        let projected = self.gateway.worst_case_cost(&request, decision.start_tier);
        if projected > self.config.cost_ceiling {
            return Err(self.fail(
                CoreError::CostCeilingExceeded {
                    spent: Decimal::ZERO,
                    ceiling: self.config.cost_ceiling,
                },
                state,
            ));
        }

        match self
            .gateway
            .send(request, decision.start_tier, deadline, cancel)
            .await
        {
            Ok(resp) => {
                state.ledger_mut().extend(resp.attempts);
                let text = match resp.reply {
                    ModelReply::Text(t) => t,
                    // Direct requests carry no tools; treat a stray tool
                    // call as an empty answer rather than crashing.
                    ModelReply::ToolCalls(_) => String::new(),
                };
                state.push_step(ReasoningStep {
                    thought: String::new(),
                    action: StepAction::Answer,
                    observation: text,
                    status: StepStatus::Ok,
                    trusted: false,
                });
                state.terminate();
                let answer = compose_answer(&state);
                Ok(EngineSuccess { answer, state })
            }
            Err(failure) => {
                state.ledger_mut().extend(failure.attempts);
                state.terminate();
                Err(EngineFailure {
                    error: failure.error,
                    state,
                })
            }
        }
    }

    /// The step loop.
    async fn react(
        &self,
        query: &Query,
        decision: &RoutingDecision,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<EngineSuccess, EngineFailure> {
        let mut state = ReasoningState::new(query.id);
        let definitions = self
            .executor
            .registry()
            .definitions(&decision.tools_enabled);
        let system = prompt::system_prompt(&definitions);
        let mut parse_retries = 0u32;

        loop {
            // Bounds, checked on every Thinking entry.
            if state.steps().len() >= self.config.max_steps {
                tracing::info!(query_id = %query.id, "step budget exhausted, truncating");
                break;
            }
            if cancel.is_cancelled() {
                return Err(self.fail(CoreError::Cancelled, state));
            }
            if Instant::now() >= deadline {
                return Err(self.fail(CoreError::DeadlineExceeded, state));
            }
            let spent = state.ledger().total_cost();
            if spent >= self.config.cost_ceiling {
                return Err(self.fail(
                    CoreError::CostCeilingExceeded {
                        spent,
                        ceiling: self.config.cost_ceiling,
                    },
                    state,
                ));
            }

            let mut messages = vec![Message::system(&system)];
            messages.extend(prompt::transcript(query, &state));
            let request = ChatRequest::new(messages).with_images(query.media.clone());

            // The true cost of a call is only known after it is billed, so
            // the ceiling is enforced against a worst-case bound: a call
            // that could push the ledger past the ceiling never starts.
            let projected = self.gateway.worst_case_cost(&request, decision.start_tier);
            if spent + projected > self.config.cost_ceiling {
                tracing::info!(
                    query_id = %query.id,
                    spent = %spent,
                    projected = %projected,
                    ceiling = %self.config.cost_ceiling,
                    "next model call could breach the cost ceiling, aborting"
                );
                return Err(self.fail(
                    CoreError::CostCeilingExceeded {
                        spent,
                        ceiling: self.config.cost_ceiling,
                    },
                    state,
                ));
            }

            let raw = match self
                .gateway
                .send(request, decision.start_tier, deadline, cancel)
                .await
            {
                Ok(resp) => {
                    state.ledger_mut().extend(resp.attempts);
                    match resp.reply {
                        ModelReply::Text(text) => text,
                        // A tier that answers with a native tool call is
                        // folded back into the envelope path.
                        ModelReply::ToolCalls(calls) => match calls.into_iter().next() {
                            Some(tc) => json!({
                                "thought": "",
                                "action": {"tool": tc.name, "arguments": tc.arguments},
                            })
                            .to_string(),
                            None => String::new(),
                        },
                    }
                }
                Err(failure) => {
                    state.ledger_mut().extend(failure.attempts);
                    return Err(self.fail(failure.error, state));
                }
            };

            match parser::parse_action(&raw) {
                Err(err) => {
                    state.push_step(ReasoningStep {
                        thought: String::new(),
                        action: StepAction::Malformed,
                        observation: self.clip(err.to_string()),
                        status: StepStatus::ParseError,
                        trusted: false,
                    });
                    parse_retries += 1;
                    if parse_retries > self.config.max_parse_retries {
                        tracing::warn!(
                            query_id = %query.id,
                            retries = parse_retries,
                            "parse retries exhausted, truncating"
                        );
                        break;
                    }
                }
                Ok(parsed) => match parsed.action {
                    parser::Action::Answer { text } => {
                        state.push_step(ReasoningStep {
                            thought: parsed.thought,
                            action: StepAction::Answer,
                            observation: text,
                            status: StepStatus::Ok,
                            trusted: false,
                        });
                        break;
                    }
                    parser::Action::Tool { name, arguments } => {
                        parse_retries = 0;
                        let call = ToolCall {
                            id: Uuid::now_v7().to_string(),
                            name: name.clone(),
                            arguments: arguments.clone(),
                        };
                        let result = self.executor.execute(&call, &decision.tools_enabled).await;
                        match result {
                            ToolResult::Success { observation } => {
                                state.push_step(ReasoningStep {
                                    thought: parsed.thought,
                                    action: StepAction::Tool { name: name.clone(), arguments },
                                    observation: self.clip(observation),
                                    status: StepStatus::Ok,
                                    trusted: self.executor.is_trusted(&name),
                                });
                            }
                            ToolResult::Failure { message, .. } => {
                                state.push_step(ReasoningStep {
                                    thought: parsed.thought,
                                    action: StepAction::Tool { name, arguments },
                                    observation: self.clip(message),
                                    status: StepStatus::ToolError,
                                    trusted: false,
                                });
                                if let Some(tool) = state.repeated_failure() {
                                    let tool = tool.to_owned();
                                    return Err(
                                        self.fail(CoreError::LoopBreakerTriggered { tool }, state)
                                    );
                                }
                            }
                        }
                    }
                },
            }
        }

        state.terminate();
        let answer = compose_answer(&state);
        Ok(EngineSuccess { answer, state })
    }

    fn fail(&self, error: CoreError, mut state: ReasoningState) -> EngineFailure {
        state.terminate();
        tracing::warn!(query_id = %state.query_id, error = %error, "run terminated on error");
        EngineFailure { error, state }
    }

    /// Truncate an observation on a char boundary.
    fn clip(&self, mut text: String) -> String {
        let max = self.config.max_observation_len;
        if text.len() > max {
            let mut end = max;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
            text.push('…');
        }
        text
    }
}

// ---------------------------------------------------------------------------
// Answer composition
// ---------------------------------------------------------------------------

/// Compose the final answer from a finalized state.
///
/// Pure: the same state always yields a byte-identical answer.
pub fn compose_answer(state: &ReasoningState) -> FinalAnswer {
    let citations: Vec<Citation> = state
        .trusted_observations()
        .iter()
        .filter_map(|step| match &step.action {
            StepAction::Tool { name, .. } => Some(Citation {
                tool: name.clone(),
                observation: step.observation.clone(),
            }),
            _ => None,
        })
        .collect();

    let (mut text, truncated) = match state.answer_step() {
        Some(step) => (step.observation.clone(), false),
        None => match state.last_successful_observation() {
            Some(step) => (
                format!(
                    "I could not fully complete the request within its limits. \
                     The most recent finding was: {}",
                    step.observation
                ),
                true,
            ),
            None => (
                "I could not complete the request within its limits.".to_owned(),
                true,
            ),
        },
    };

    if !citations.is_empty() {
        let mut sources: Vec<&str> = Vec::new();
        for citation in &citations {
            if !sources.contains(&citation.tool.as_str()) {
                sources.push(&citation.tool);
            }
        }
        text.push_str(&format!(
            "\n\nBased on verified data from: {}.",
            sources.join(", ")
        ));
    }

    FinalAnswer {
        text,
        truncated,
        citations,
    }
}

/// Best-effort answer for a failed run: the most recent trusted observation
/// when one exists, otherwise an explicit unable-to-answer result.
pub fn degraded_answer(state: &ReasoningState, error: &CoreError) -> FinalAnswer {
    let citations: Vec<Citation> = state
        .trusted_observations()
        .iter()
        .filter_map(|step| match &step.action {
            StepAction::Tool { name, .. } => Some(Citation {
                tool: name.clone(),
                observation: step.observation.clone(),
            }),
            _ => None,
        })
        .collect();

    let text = match citations.first() {
        Some(citation) => format!(
            "I could not finish answering ({error}). \
             The most recent verified information from {}: {}",
            citation.tool, citation.observation
        ),
        None => format!("I was unable to answer this request: {error}."),
    };

    FinalAnswer {
        text,
        truncated: true,
        citations,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
