//! Model gateway.
//!
//! One entry point, [`ModelGateway::send`], hides a ladder of model tiers
//! behind a single call: try the chosen start tier, and on transient failure
//! walk up the ladder until a tier answers or every tier has failed.  Every
//! attempt, successful or not, produces a [`TokenUsage`] record so callers
//! can account for spend exactly.

pub mod tier;
pub mod transport;

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub use tier::{ModelTier, Provider, TierCapabilities, TierTable};
pub use transport::{
    HttpTransport, ModelReply, ModelTransport, TokenCounts, TransportError, TransportReply,
};

use crate::chat::ChatRequest;
use crate::error::CoreError;
use crate::usage::TokenUsage;

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// A successful gateway call.
#[derive(Debug)]
pub struct GatewayResponse {
    /// What the serving tier produced.
    pub reply: ModelReply,
    /// Rank of the tier that actually answered.
    pub used_tier: u8,
    /// One record per attempt, failures included.
    pub attempts: Vec<TokenUsage>,
}

/// A failed gateway call.
///
/// Carries the usage records accumulated before the failure so spend is
/// never lost, even on the error path.
#[derive(Debug)]
pub struct GatewayFailure {
    /// Why the call failed.
    pub error: CoreError,
    /// One record per attempt made before giving up.
    pub attempts: Vec<TokenUsage>,
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Tiered model access with automatic fallback and cost accounting.
pub struct ModelGateway {
    tiers: TierTable,
    transports: Vec<Arc<dyn ModelTransport>>,
}

impl ModelGateway {
    /// Build a gateway from a validated tier table and one transport per
    /// tier, in the same order.
    pub fn new(
        tiers: TierTable,
        transports: Vec<Arc<dyn ModelTransport>>,
    ) -> crate::error::Result<Self> {
        if transports.len() != tiers.len() {
            return Err(CoreError::Config {
                reason: format!(
                    "expected {} transports for {} tiers, got {}",
                    tiers.len(),
                    tiers.len(),
                    transports.len()
                ),
            });
        }
        Ok(Self { tiers, transports })
    }

    /// Build a gateway that talks HTTP to each tier's provider.
    pub fn over_http(
        tiers: TierTable,
        anthropic_key: &str,
        openai_key: &str,
    ) -> crate::error::Result<Self> {
        let mut transports: Vec<Arc<dyn ModelTransport>> = Vec::with_capacity(tiers.len());
        for tier in tiers.iter() {
            let key = match tier.provider {
                Provider::Anthropic => anthropic_key,
                Provider::OpenAi => openai_key,
            };
            let transport = HttpTransport::new(tier.provider, key, tier.base_url.clone())
                .map_err(|e| CoreError::Config {
                    reason: format!("failed to build transport for tier {}: {e}", tier.rank),
                })?;
            transports.push(Arc::new(transport));
        }
        Self::new(tiers, transports)
    }

    /// The configured tier table.
    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }

    /// Upper bound on what one [`send`](Self::send) starting at `start` can
    /// charge: the estimated prompt tokens plus the full output allowance,
    /// priced at the most expensive tier the fallback walk could reach.
    /// Failed attempts cost nothing, so at most one tier ever charges.
    pub fn worst_case_cost(&self, request: &ChatRequest, start: usize) -> Decimal {
        let input = estimate_tokens(request);
        let output = request.max_tokens.unwrap_or(4096);
        self.tiers
            .iter()
            .skip(start)
            .map(|tier| TokenUsage::charged(tier, input, output).cost)
            .max()
            .unwrap_or(Decimal::ZERO)
    }

    /// Send a request starting at the tier with zero-based index `start`,
    /// falling back upward on transient failure.
    ///
    /// Per-attempt latency budget is the tier's own budget clipped to the
    /// time remaining before `deadline`; a timeout on a clipped attempt
    /// means the overall deadline is spent, not that the tier is unhealthy,
    /// so it surfaces as [`CoreError::DeadlineExceeded`] rather than
    /// triggering another fallback.
    pub async fn send(
        &self,
        request: ChatRequest,
        start: usize,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<GatewayResponse, GatewayFailure> {
        let mut attempts: Vec<TokenUsage> = Vec::new();

        let Some(start_tier) = self.tiers.get(start) else {
            return Err(GatewayFailure {
                error: CoreError::Internal(format!("start tier index {start} out of range")),
                attempts,
            });
        };

        // Fail fast when the prompt does not fit the tier the router
        // picked: escalating will not shrink it and the caller must
        // compact instead.
        let estimated_tokens = estimate_tokens(&request);
        if estimated_tokens > start_tier.context_window {
            return Err(GatewayFailure {
                error: CoreError::ContextOverflow {
                    estimated_tokens,
                    context_window: start_tier.context_window,
                    tier_rank: start_tier.rank,
                },
                attempts,
            });
        }

        for index in start..self.tiers.len() {
            let tier = &self.tiers[index];
            let transport = &self.transports[index];

            // A fallback tier may have a smaller window than the start
            // tier; a request that cannot fit is skipped, not attempted.
            if estimated_tokens > tier.context_window {
                tracing::warn!(
                    tier_rank = tier.rank,
                    estimated_tokens,
                    context_window = tier.context_window,
                    "prompt does not fit this tier, skipping"
                );
                continue;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(GatewayFailure {
                    error: CoreError::DeadlineExceeded,
                    attempts,
                });
            }
            let clipped = remaining < tier.max_latency();
            let attempt_timeout = remaining.min(tier.max_latency());

            let mut attempt_request = request.clone();
            attempt_request.model = tier.model.clone();
            if !tier.capabilities.function_calling {
                attempt_request.tools.clear();
            }
            if !tier.capabilities.vision {
                attempt_request.images.clear();
            }

            tracing::debug!(
                tier_rank = tier.rank,
                model = %tier.model,
                timeout_ms = attempt_timeout.as_millis() as u64,
                clipped,
                "dispatching model attempt"
            );

            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    attempts.push(TokenUsage::failed(tier.rank));
                    return Err(GatewayFailure { error: CoreError::Cancelled, attempts });
                }
                res = tokio::time::timeout(attempt_timeout, transport.call(&attempt_request, attempt_timeout)) => {
                    match res {
                        Ok(inner) => inner,
                        Err(_) => Err(TransportError::Timeout(attempt_timeout)),
                    }
                }
            };

            match outcome {
                Ok(reply) => {
                    attempts.push(TokenUsage::charged(
                        tier,
                        reply.tokens.input_tokens,
                        reply.tokens.output_tokens,
                    ));
                    tracing::info!(
                        tier_rank = tier.rank,
                        model = %tier.model,
                        input_tokens = reply.tokens.input_tokens,
                        output_tokens = reply.tokens.output_tokens,
                        "model attempt succeeded"
                    );
                    return Ok(GatewayResponse {
                        reply: reply.reply,
                        used_tier: tier.rank,
                        attempts,
                    });
                }
                Err(err) => {
                    attempts.push(TokenUsage::failed(tier.rank));

                    if let TransportError::ContentRejected(reason) = err {
                        return Err(GatewayFailure {
                            error: CoreError::ContentRejected {
                                tier_rank: tier.rank,
                                reason,
                            },
                            attempts,
                        });
                    }
                    if clipped && matches!(err, TransportError::Timeout(_)) {
                        return Err(GatewayFailure {
                            error: CoreError::DeadlineExceeded,
                            attempts,
                        });
                    }

                    tracing::warn!(
                        tier_rank = tier.rank,
                        model = %tier.model,
                        error = %err,
                        "model attempt failed, falling back"
                    );
                }
            }
        }

        Err(GatewayFailure {
            error: CoreError::AllProvidersExhausted {
                attempts: attempts.len(),
            },
            attempts,
        })
    }
}

/// Rough prompt-size estimate: one token per four bytes of message content,
/// plus a fixed per-message overhead for role framing.
fn estimate_tokens(request: &ChatRequest) -> u32 {
    const PER_MESSAGE_OVERHEAD: u32 = 8;

    let content_bytes: usize = request
        .messages
        .iter()
        .map(|m| m.content.len())
        .sum::<usize>();
    (content_bytes / 4) as u32 + request.messages.len() as u32 * PER_MESSAGE_OVERHEAD
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
