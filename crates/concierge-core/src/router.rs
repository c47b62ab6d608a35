//! Query router.
//!
//! Classifies an incoming query and turns the classification plus the
//! user's entitlements into a [`RoutingDecision`]: which strategy to use,
//! which model tier to start at, and which tools the run may touch.  The
//! decision is advisory about tiers — the gateway may still escalate
//! internally — but the permitted tool set is binding.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::gateway::TierTable;
use crate::query::{Query, UserTier};
use crate::tools::ToolRegistry;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Estimated complexity of a query, used to select strategy and start tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    /// Simple, factual, or short queries.
    Simple,
    /// Moderate queries requiring some reasoning or a tool call.
    Medium,
    /// Queries requiring deep reasoning, multi-step work, or code.
    Complex,
}

/// Pluggable query classifier.
///
/// The default is heuristic; a model-backed implementation can be swapped
/// in without touching the router.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, query: &Query) -> Result<Complexity>;
}

/// Heuristic classifier: word count, code markers, multi-step markers, and
/// analysis keywords.
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    /// Estimate the complexity of a query from its text.
    pub fn estimate(text: &str) -> Complexity {
        let lower = text.to_lowercase();
        let word_count = lower.split_whitespace().count();
        let has_code_markers = lower.contains("```")
            || lower.contains("fn ")
            || lower.contains("class ")
            || lower.contains("def ");
        let has_multi_step = lower.contains(" and then ")
            || lower.contains(" after that ")
            || lower.contains(" step ")
            || lower.contains(" steps ");
        let has_analysis_keywords = lower.contains("analyze")
            || lower.contains("compare")
            || lower.contains("evaluate")
            || lower.contains("synthesize")
            || lower.contains("design")
            || lower.contains("architect");

        if has_code_markers || has_analysis_keywords || (has_multi_step && word_count > 50) {
            Complexity::Complex
        } else if word_count > 30 || has_multi_step {
            Complexity::Medium
        } else {
            Complexity::Simple
        }
    }
}

#[async_trait]
impl Classifier for HeuristicClassifier {
    async fn classify(&self, query: &Query) -> Result<Complexity> {
        Ok(Self::estimate(&query.text))
    }
}

// ---------------------------------------------------------------------------
// Routing decision
// ---------------------------------------------------------------------------

/// How a query should be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One model call, no tools, reply is the answer.
    Direct,
    /// The full step loop with tools.
    Reasoning,
}

/// The router's verdict for one query.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub strategy: Strategy,
    /// Zero-based index into the tier table to start at.
    pub start_tier: usize,
    /// Tools this run may invoke; enforced at dispatch.
    pub tools_enabled: BTreeSet<String>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Maps a query to a routing decision.
pub struct Router {
    classifier: Arc<dyn Classifier>,
    tiers: TierTable,
    registry: Arc<ToolRegistry>,
}

impl Router {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        tiers: TierTable,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            classifier,
            tiers,
            registry,
        }
    }

    /// Decide strategy, start tier, and permitted tools for a query.
    ///
    /// Classification failure never degrades silently: the query takes the
    /// safest path (reasoning strategy, strongest tier, full entitled tool
    /// set).
    pub async fn route(&self, query: &Query) -> RoutingDecision {
        let entitled = self.registry.entitled(query.user_tier);

        let complexity = match self.classifier.classify(query).await {
            Ok(c) => c,
            Err(err) => {
                tracing::warn!(
                    query_id = %query.id,
                    error = %err,
                    "classification failed, taking the safest route"
                );
                return RoutingDecision {
                    strategy: Strategy::Reasoning,
                    start_tier: self.tiers.strongest(),
                    tools_enabled: entitled,
                };
            }
        };

        let (strategy, mut start_tier) = match complexity {
            Complexity::Simple => (Strategy::Direct, 0),
            Complexity::Medium => (Strategy::Reasoning, 1.min(self.tiers.strongest())),
            Complexity::Complex => (Strategy::Reasoning, self.tiers.strongest()),
        };

        // Paying tiers skip the cheapest model.
        if query.user_tier >= UserTier::Premium {
            start_tier = (start_tier + 1).min(self.tiers.strongest());
        }

        // Image queries must start on a tier that can see them.
        if !query.media.is_empty()
            && let Some(vision_tier) = self.tiers.first_vision_capable(start_tier)
        {
            start_tier = vision_tier;
        }

        tracing::debug!(
            query_id = %query.id,
            ?complexity,
            ?strategy,
            start_tier,
            tool_count = entitled.len(),
            "routed query"
        );

        RoutingDecision {
            strategy,
            start_tier,
            tools_enabled: entitled,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::gateway::{ModelTier, Provider, TierCapabilities};
    use crate::query::MediaRef;
    use crate::tools::builtin::{CalculatorTool, ClockTool};

    struct FailingClassifier;

    #[async_trait]
    impl Classifier for FailingClassifier {
        async fn classify(&self, _query: &Query) -> Result<Complexity> {
            Err(CoreError::Internal("classifier offline".into()))
        }
    }

    fn tiers() -> TierTable {
        TierTable::new(vec![
            ModelTier::new(1, Provider::Anthropic, "haiku"),
            ModelTier::new(2, Provider::Anthropic, "sonnet").with_capabilities(
                TierCapabilities {
                    function_calling: true,
                    vision: true,
                },
            ),
            ModelTier::new(3, Provider::Anthropic, "opus"),
        ])
        .unwrap()
    }

    fn router(classifier: Arc<dyn Classifier>) -> Router {
        let registry =
            ToolRegistry::new(vec![Arc::new(CalculatorTool), Arc::new(ClockTool)]).unwrap();
        Router::new(classifier, tiers(), Arc::new(registry))
    }

    #[tokio::test]
    async fn simple_query_goes_direct_to_cheapest() {
        let r = router(Arc::new(HeuristicClassifier));
        let decision = r.route(&Query::new("What time is it?")).await;
        assert_eq!(decision.strategy, Strategy::Direct);
        assert_eq!(decision.start_tier, 0);
    }

    #[tokio::test]
    async fn complex_query_starts_at_strongest() {
        let r = router(Arc::new(HeuristicClassifier));
        let decision = r
            .route(&Query::new(
                "Analyze our quarterly spend and design a savings plan",
            ))
            .await;
        assert_eq!(decision.strategy, Strategy::Reasoning);
        assert_eq!(decision.start_tier, 2);
    }

    #[tokio::test]
    async fn premium_users_skip_the_cheapest_tier() {
        let r = router(Arc::new(HeuristicClassifier));
        let decision = r
            .route(&Query::new("What time is it?").with_user_tier(UserTier::Premium))
            .await;
        assert_eq!(decision.start_tier, 1);
    }

    #[tokio::test]
    async fn image_queries_bump_to_a_vision_tier() {
        let r = router(Arc::new(HeuristicClassifier));
        let query = Query::new("What is on this receipt?").with_media(MediaRef {
            location: "https://example.com/receipt.png".into(),
            mime_type: "image/png".into(),
        });
        let decision = r.route(&query).await;
        assert_eq!(decision.start_tier, 1);
    }

    #[tokio::test]
    async fn classification_failure_takes_the_safest_route() {
        let r = router(Arc::new(FailingClassifier));
        let decision = r.route(&Query::new("hello")).await;
        assert_eq!(decision.strategy, Strategy::Reasoning);
        assert_eq!(decision.start_tier, 2);
        assert!(decision.tools_enabled.contains("calculator"));
        assert!(decision.tools_enabled.contains("clock"));
    }
}
