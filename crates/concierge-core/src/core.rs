//! Top-level orchestration.
//!
//! [`AgentCore`] ties the router, engine, and persistence sink together
//! behind two entry points: `answer` (strict, typed errors with partial
//! state) and `respond` (lenient, always produces a `FinalAnswer`).

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::engine::{
    EngineConfig, EngineFailure, EngineSuccess, FinalAnswer, ReasoningEngine, ReasoningState,
    degraded_answer,
};
use crate::error::CoreError;
use crate::gateway::ModelGateway;
use crate::query::Query;
use crate::router::{Classifier, Router};
use crate::sink::{PersistenceSink, RunRecord, TracingSink};
use crate::tools::{ToolExecutor, ToolRegistry};
use crate::usage::UsageTotals;

/// A completed query with its answer and full run record.
#[derive(Debug)]
pub struct Answered {
    pub answer: FinalAnswer,
    pub state: ReasoningState,
    pub usage: UsageTotals,
}

/// A failed query. Partial progress is never discarded.
#[derive(Debug)]
pub struct CoreFailure {
    pub error: CoreError,
    pub state: ReasoningState,
}

impl CoreFailure {
    /// A best-effort answer for callers that must always reply: backed by
    /// the most recent trusted observation when one exists, otherwise an
    /// explicit unable-to-answer result.
    pub fn degraded(&self) -> FinalAnswer {
        degraded_answer(&self.state, &self.error)
    }
}

/// The assembled orchestration core.
pub struct AgentCore {
    router: Router,
    engine: ReasoningEngine,
    sink: Arc<dyn PersistenceSink>,
    default_deadline: Duration,
}

impl AgentCore {
    /// Assemble a core from its parts. Runs are recorded to the tracing
    /// sink unless [`Self::with_sink`] replaces it.
    pub fn new(
        gateway: Arc<ModelGateway>,
        registry: Arc<ToolRegistry>,
        classifier: Arc<dyn Classifier>,
        engine_config: EngineConfig,
        default_deadline: Duration,
    ) -> Self {
        let router = Router::new(classifier, gateway.tiers().clone(), Arc::clone(&registry));
        let executor = ToolExecutor::new(registry);
        let engine = ReasoningEngine::new(gateway, executor, engine_config);
        Self {
            router,
            engine,
            sink: Arc::new(TracingSink),
            default_deadline,
        }
    }

    /// Replace the persistence sink.
    pub fn with_sink(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The default per-query deadline.
    pub fn default_deadline(&self) -> Duration {
        self.default_deadline
    }

    /// Answer one query, bounded by `deadline`.
    pub async fn answer(
        &self,
        query: &Query,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Answered, CoreFailure> {
        let decision = self.router.route(query).await;
        tracing::info!(
            query_id = %query.id,
            strategy = ?decision.strategy,
            start_tier = decision.start_tier,
            "query accepted"
        );

        match self.engine.run(query, &decision, deadline, cancel).await {
            Ok(EngineSuccess { answer, state }) => {
                self.persist(RunRecord::answered(&state, &answer));
                let usage = state.ledger().totals();
                Ok(Answered {
                    answer,
                    state,
                    usage,
                })
            }
            Err(EngineFailure { error, state }) => {
                self.persist(RunRecord::failed(&state, &error));
                Err(CoreFailure { error, state })
            }
        }
    }

    /// Answer with the default deadline.
    pub async fn answer_default(
        &self,
        query: &Query,
        cancel: &CancellationToken,
    ) -> Result<Answered, CoreFailure> {
        self.answer(query, Instant::now() + self.default_deadline, cancel)
            .await
    }

    /// Lenient entry point: a failure becomes a degraded answer instead of
    /// an error.
    pub async fn respond(
        &self,
        query: &Query,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Answered {
        match self.answer(query, deadline, cancel).await {
            Ok(answered) => answered,
            Err(failure) => {
                let answer = failure.degraded();
                let usage = failure.state.ledger().totals();
                Answered {
                    answer,
                    state: failure.state,
                    usage,
                }
            }
        }
    }

    fn persist(&self, record: RunRecord<'_>) {
        if let Err(e) = self.sink.record(&record) {
            tracing::warn!(query_id = %record.query_id, error = %e, "sink write failed");
        }
    }
}
