//! Integration tests for the concierge-core crate.
//!
//! These exercise the full router → engine → gateway → tool path with
//! scripted transports and tools, no live model connection.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use concierge_core::gateway::transport::{TokenCounts, TransportReply};
use concierge_core::{
    AgentCore, ChatRequest, CoreError, EngineConfig, HeuristicClassifier, ModelGateway, ModelReply,
    ModelTier, ModelTransport, Provider, Query, ReasoningEngine, RoutingDecision, Strategy,
    TierTable, Tool, ToolExecutor, ToolRegistry, TransportError, compose_answer,
};

// ═══════════════════════════════════════════════════════════════════════
//  Test doubles
// ═══════════════════════════════════════════════════════════════════════

/// Replays a scripted sequence of text replies, then fails.
struct Scripted {
    replies: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelTransport for Scripted {
    async fn call(
        &self,
        _request: &ChatRequest,
        _timeout: Duration,
    ) -> Result<TransportReply, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TransportError::Network("script exhausted".into()))?;
        Ok(TransportReply {
            reply: ModelReply::Text(text),
            tokens: TokenCounts {
                input_tokens: 100,
                output_tokens: 25,
            },
        })
    }
}

/// Always fails the same way.
struct FailsWith(fn() -> TransportError);

#[async_trait]
impl ModelTransport for FailsWith {
    async fn call(
        &self,
        _request: &ChatRequest,
        _timeout: Duration,
    ) -> Result<TransportReply, TransportError> {
        Err((self.0)())
    }
}

/// Never completes; relies on the gateway's timeout or cancellation.
struct Hangs;

#[async_trait]
impl ModelTransport for Hangs {
    async fn call(
        &self,
        _request: &ChatRequest,
        _timeout: Duration,
    ) -> Result<TransportReply, TransportError> {
        futures::future::pending().await
    }
}

/// A trusted tool that always fails the same way, for loop-breaker runs.
struct BrokenLookup;

#[async_trait]
impl Tool for BrokenLookup {
    fn name(&self) -> &str {
        "crm_lookup"
    }
    fn description(&self) -> &str {
        "record lookup"
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }
    fn trusted(&self) -> bool {
        true
    }
    async fn run(&self, _arguments: Value) -> concierge_core::Result<Value> {
        Err(CoreError::Internal("upstream unavailable".into()))
    }
}

/// Echoes its argument back; trusted.
struct EchoLookup;

#[async_trait]
impl Tool for EchoLookup {
    fn name(&self) -> &str {
        "crm_lookup"
    }
    fn description(&self) -> &str {
        "record lookup"
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"account": {"type": "integer"}},
            "required": ["account"],
            "additionalProperties": false
        })
    }
    fn trusted(&self) -> bool {
        true
    }
    async fn run(&self, arguments: Value) -> concierge_core::Result<Value> {
        Ok(Value::String(format!(
            "account {} is in good standing",
            arguments["account"]
        )))
    }
}

fn single_tier(transport: Arc<dyn ModelTransport>) -> Arc<ModelGateway> {
    let tiers = TierTable::new(vec![
        ModelTier::new(1, Provider::Anthropic, "haiku").with_prices(dec!(0.25), dec!(1.25)),
    ])
    .unwrap();
    Arc::new(ModelGateway::new(tiers, vec![transport]).unwrap())
}

fn engine(gateway: Arc<ModelGateway>, tools: Vec<Arc<dyn Tool>>, config: EngineConfig) -> ReasoningEngine {
    let registry = Arc::new(ToolRegistry::new(tools).unwrap());
    ReasoningEngine::new(gateway, ToolExecutor::new(registry), config)
}

fn reasoning_decision(tools: &[&str]) -> RoutingDecision {
    RoutingDecision {
        strategy: Strategy::Reasoning,
        start_tier: 0,
        tools_enabled: tools.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
    }
}

fn far_deadline() -> Instant {
    Instant::now() + Duration::from_secs(300)
}

// ═══════════════════════════════════════════════════════════════════════
//  Bounds hold on every run
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn step_and_cost_bounds_hold() {
    let tool_call = r#"{"thought": "again", "action": {"tool": "crm_lookup", "arguments": {"account": 7}}}"#;
    let replies = vec![tool_call; 20];
    let transport = Scripted::new(&replies);
    let config = EngineConfig {
        max_steps: 4,
        cost_ceiling: dec!(1.00),
        ..EngineConfig::default()
    };
    let eng = engine(single_tier(transport), vec![Arc::new(EchoLookup)], config.clone());

    let run = eng
        .run(
            &Query::new("check account 7 forever"),
            &reasoning_decision(&["crm_lookup"]),
            far_deadline(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(run.state.steps().len() <= config.max_steps);
    assert!(run.state.ledger().total_cost() <= config.cost_ceiling);
    assert!(run.answer.truncated);
}

// ═══════════════════════════════════════════════════════════════════════
//  Content rejection short-circuits the ladder
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn content_rejection_stops_the_ladder() {
    let tiers = TierTable::new(vec![
        ModelTier::new(1, Provider::Anthropic, "haiku"),
        ModelTier::new(2, Provider::Anthropic, "sonnet"),
    ])
    .unwrap();
    let rejecting: Arc<dyn ModelTransport> =
        Arc::new(FailsWith(|| TransportError::ContentRejected("policy".into())));
    let second = Scripted::new(&[r#"{"thought": "t", "action": {"answer": "hi"}}"#]);
    let gateway = Arc::new(ModelGateway::new(tiers, vec![rejecting, second.clone()]).unwrap());

    let eng = engine(gateway, vec![Arc::new(EchoLookup)], EngineConfig::default());
    let failure = eng
        .run(
            &Query::new("something over the line"),
            &reasoning_decision(&["crm_lookup"]),
            far_deadline(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        failure.error,
        CoreError::ContentRejected { tier_rank: 1, .. }
    ));
    assert_eq!(second.calls(), 0);
}

// ═══════════════════════════════════════════════════════════════════════
//  Answer composition is replayable
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn composer_replay_is_byte_identical() {
    let transport = Scripted::new(&[
        r#"{"thought": "look it up", "action": {"tool": "crm_lookup", "arguments": {"account": 7}}}"#,
        r#"{"thought": "done", "action": {"answer": "Account 7 is in good standing."}}"#,
    ]);
    let eng = engine(
        single_tier(transport),
        vec![Arc::new(EchoLookup)],
        EngineConfig::default(),
    );

    let run = eng
        .run(
            &Query::new("is account 7 ok?"),
            &reasoning_decision(&["crm_lookup"]),
            far_deadline(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let replayed = compose_answer(&run.state);
    assert_eq!(replayed, run.answer);
    assert_eq!(replayed.text, run.answer.text);
    assert_eq!(run.answer.citations.len(), 1);
}

// ═══════════════════════════════════════════════════════════════════════
//  Loop breaker
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn loop_breaker_fires_on_second_identical_failure() {
    let bad = r#"{"thought": "retry", "action": {"tool": "crm_lookup", "arguments": {}}}"#;
    let transport = Scripted::new(&[bad, bad, bad, bad]);
    let eng = engine(
        single_tier(transport),
        vec![Arc::new(BrokenLookup)],
        EngineConfig::default(),
    );

    let failure = eng
        .run(
            &Query::new("look up the record"),
            &reasoning_decision(&["crm_lookup"]),
            far_deadline(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        failure.error,
        CoreError::LoopBreakerTriggered { ref tool } if tool == "crm_lookup"
    ));
    // Terminated right at the second identical failure, not later.
    assert_eq!(failure.state.steps().len(), 2);
}

// ═══════════════════════════════════════════════════════════════════════
//  Cancellation releases in-flight calls
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn cancellation_releases_a_blocking_transport() {
    let eng = engine(
        single_tier(Arc::new(Hangs)),
        vec![Arc::new(EchoLookup)],
        EngineConfig::default(),
    );
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let failure = eng
        .run(
            &Query::new("hello"),
            &reasoning_decision(&["crm_lookup"]),
            far_deadline(),
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(failure.error, CoreError::Cancelled));
}

// ═══════════════════════════════════════════════════════════════════════
//  Fallback accounting
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn tier_one_failures_escalate_with_zero_cost_entries() {
    let tiers = TierTable::new(vec![
        ModelTier::new(1, Provider::Anthropic, "haiku").with_prices(dec!(0.25), dec!(1.25)),
        ModelTier::new(2, Provider::Anthropic, "sonnet").with_prices(dec!(3), dec!(15)),
    ])
    .unwrap();
    let flaky: Arc<dyn ModelTransport> =
        Arc::new(FailsWith(|| TransportError::Timeout(Duration::from_secs(30))));
    let steady = Scripted::new(&[
        r#"{"thought": "look", "action": {"tool": "crm_lookup", "arguments": {"account": 9}}}"#,
        r#"{"thought": "done", "action": {"answer": "Account 9 is fine."}}"#,
    ]);
    let gateway = Arc::new(ModelGateway::new(tiers, vec![flaky, steady]).unwrap());

    let eng = engine(gateway, vec![Arc::new(EchoLookup)], EngineConfig::default());
    let run = eng
        .run(
            &Query::new("check account 9"),
            &reasoning_decision(&["crm_lookup"]),
            far_deadline(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!run.answer.truncated);
    let totals = run.state.ledger().totals();
    // Two loop iterations: each one timed out on tier 1 (zero cost) and
    // succeeded on tier 2.
    assert_eq!(totals.failed_attempts, 2);
    assert_eq!(totals.attempts, 4);
    assert!(
        run.state
            .ledger()
            .entries()
            .iter()
            .filter(|u| !u.success)
            .all(|u| u.cost == dec!(0) && u.tier_rank == 1)
    );
    assert!(
        run.state
            .ledger()
            .entries()
            .iter()
            .filter(|u| u.success)
            .all(|u| u.tier_rank == 2)
    );
}

// ═══════════════════════════════════════════════════════════════════════
//  Invalid tool arguments keep the loop alive
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn invalid_arguments_become_a_tool_error_step() {
    let transport = Scripted::new(&[
        // `account` must be an integer.
        r#"{"thought": "look", "action": {"tool": "crm_lookup", "arguments": {"account": "seven"}}}"#,
        r#"{"thought": "fix it", "action": {"tool": "crm_lookup", "arguments": {"account": 7}}}"#,
        r#"{"thought": "done", "action": {"answer": "Account 7 is in good standing."}}"#,
    ]);
    let eng = engine(
        single_tier(transport),
        vec![Arc::new(EchoLookup)],
        EngineConfig::default(),
    );

    let run = eng
        .run(
            &Query::new("check account seven"),
            &reasoning_decision(&["crm_lookup"]),
            far_deadline(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!run.answer.truncated);
    assert_eq!(run.state.steps().len(), 3);
    assert_eq!(
        run.state.steps()[0].status,
        concierge_core::StepStatus::ToolError
    );
    assert_eq!(run.state.steps()[1].status, concierge_core::StepStatus::Ok);
}

// ═══════════════════════════════════════════════════════════════════════
//  A clipped attempt's timeout is a deadline, not an unhealthy tier
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn clipped_timeout_is_deadline_exceeded() {
    let tiers = TierTable::new(vec![
        ModelTier::new(1, Provider::Anthropic, "haiku")
            .with_max_latency(Duration::from_secs(3)),
        ModelTier::new(2, Provider::Anthropic, "sonnet")
            .with_max_latency(Duration::from_secs(3)),
    ])
    .unwrap();
    let gateway = Arc::new(
        ModelGateway::new(
            tiers,
            vec![Arc::new(Hangs) as Arc<dyn ModelTransport>, Arc::new(Hangs)],
        )
        .unwrap(),
    );

    let eng = engine(gateway, vec![Arc::new(EchoLookup)], EngineConfig::default());
    let failure = eng
        .run(
            &Query::new("hello"),
            &reasoning_decision(&["crm_lookup"]),
            Instant::now() + Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    // First attempt burns its full 3s budget; the second gets the clipped
    // 2s remainder, so its timeout means the deadline is spent.
    assert!(matches!(failure.error, CoreError::DeadlineExceeded));
    assert!(!matches!(
        failure.error,
        CoreError::AllProvidersExhausted { .. }
    ));
}

// ═══════════════════════════════════════════════════════════════════════
//  Full core path
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn agent_core_routes_and_answers() {
    let transport = Scripted::new(&["Paris."]);
    let gateway = single_tier(transport);
    let registry = Arc::new(
        ToolRegistry::new(vec![
            Arc::new(concierge_core::tools::builtin::CalculatorTool),
            Arc::new(concierge_core::tools::builtin::ClockTool),
        ])
        .unwrap(),
    );
    let core = AgentCore::new(
        gateway,
        registry,
        Arc::new(HeuristicClassifier),
        EngineConfig::default(),
        Duration::from_secs(60),
    );

    // A short factual query routes Direct; the raw reply is the answer.
    let answered = core
        .answer_default(&Query::new("Capital of France?"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(answered.answer.text, "Paris.");
    assert!(!answered.answer.truncated);
    assert_eq!(answered.usage.attempts, 1);
    assert!(answered.usage.cost > dec!(0));
}
