//! Model tier configuration.
//!
//! A [`ModelTier`] is one ranked (provider, model) pair with pricing,
//! latency, and capability metadata.  Tiers live in a validated
//! [`TierTable`] that is loaded once at startup and read-only thereafter;
//! hot reload swaps the whole table atomically.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Which wire protocol the tier's endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Anthropic Messages API.
    Anthropic,
    /// OpenAI Chat Completions API (also covers compatible endpoints such
    /// as Ollama, Together, and vLLM).
    OpenAi,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anthropic => write!(f, "anthropic"),
            Self::OpenAi => write!(f, "openai"),
        }
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Capability flags for a tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCapabilities {
    /// The model supports native function calling.
    #[serde(default)]
    pub function_calling: bool,

    /// The model accepts image inputs.
    #[serde(default)]
    pub vision: bool,
}

// ---------------------------------------------------------------------------
// Tier
// ---------------------------------------------------------------------------

fn default_max_latency_ms() -> u64 {
    30_000
}

fn default_context_window() -> u32 {
    128_000
}

/// One ranked (provider, model) pair with cost, latency, and capability
/// metadata.  Rank 1 is the cheapest tier; fallback walks toward higher
/// ranks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelTier {
    /// Ordered rank, 1-based and contiguous within a [`TierTable`].
    pub rank: u8,

    /// Which wire protocol the endpoint speaks.
    pub provider: Provider,

    /// Model identifier, e.g. `"claude-haiku-3-20241022"`.
    pub model: String,

    /// Override base URL; defaults to the provider's public endpoint.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Cost per million input tokens, USD.
    #[serde(default)]
    pub input_price: Decimal,

    /// Cost per million output tokens, USD.
    #[serde(default)]
    pub output_price: Decimal,

    /// Per-attempt latency budget in milliseconds.
    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: u64,

    /// Context window in tokens; requests that do not fit fail fast.
    #[serde(default = "default_context_window")]
    pub context_window: u32,

    /// Capability flags.
    #[serde(default)]
    pub capabilities: TierCapabilities,
}

impl ModelTier {
    /// Create a tier with default pricing, latency, and capabilities.
    pub fn new(rank: u8, provider: Provider, model: impl Into<String>) -> Self {
        Self {
            rank,
            provider,
            model: model.into(),
            base_url: None,
            input_price: Decimal::ZERO,
            output_price: Decimal::ZERO,
            max_latency_ms: default_max_latency_ms(),
            context_window: default_context_window(),
            capabilities: TierCapabilities::default(),
        }
    }

    /// Builder: per-million-token prices (input, output), USD.
    pub fn with_prices(mut self, input: Decimal, output: Decimal) -> Self {
        self.input_price = input;
        self.output_price = output;
        self
    }

    /// Builder: per-attempt latency budget.
    pub fn with_max_latency(mut self, latency: Duration) -> Self {
        self.max_latency_ms = latency.as_millis() as u64;
        self
    }

    /// Builder: context window in tokens.
    pub fn with_context_window(mut self, tokens: u32) -> Self {
        self.context_window = tokens;
        self
    }

    /// Builder: capability flags.
    pub fn with_capabilities(mut self, capabilities: TierCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// The per-attempt latency budget as a [`Duration`].
    pub fn max_latency(&self) -> Duration {
        Duration::from_millis(self.max_latency_ms)
    }
}

// ---------------------------------------------------------------------------
// Tier table
// ---------------------------------------------------------------------------

/// The ordered, validated set of tiers for this process.
///
/// Read-only after construction.  Indexing is zero-based; `rank` (1-based)
/// is the display/accounting identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierTable {
    tiers: Vec<ModelTier>,
}

impl TierTable {
    /// Build a table, validating that ranks are contiguous from 1 and
    /// prices are non-negative.
    pub fn new(tiers: Vec<ModelTier>) -> Result<Self> {
        if tiers.is_empty() {
            return Err(CoreError::Config {
                reason: "tier table must contain at least one tier".into(),
            });
        }
        for (i, tier) in tiers.iter().enumerate() {
            let expected = (i + 1) as u8;
            if tier.rank != expected {
                return Err(CoreError::Config {
                    reason: format!(
                        "tier ranks must be contiguous from 1: position {i} has rank {}",
                        tier.rank
                    ),
                });
            }
            if tier.input_price < Decimal::ZERO || tier.output_price < Decimal::ZERO {
                return Err(CoreError::Config {
                    reason: format!("tier {} has a negative price", tier.rank),
                });
            }
            if tier.max_latency_ms == 0 {
                return Err(CoreError::Config {
                    reason: format!("tier {} has a zero latency budget", tier.rank),
                });
            }
        }
        Ok(Self { tiers })
    }

    /// Number of configured tiers.
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    /// Whether the table is empty (never true for a validated table).
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Tier at a zero-based index.
    pub fn get(&self, index: usize) -> Option<&ModelTier> {
        self.tiers.get(index)
    }

    /// All tiers, cheapest first.
    pub fn iter(&self) -> impl Iterator<Item = &ModelTier> {
        self.tiers.iter()
    }

    /// Zero-based index of the strongest (highest-rank) tier.
    pub fn strongest(&self) -> usize {
        self.tiers.len() - 1
    }

    /// First index at or after `start` whose tier supports vision, if any.
    pub fn first_vision_capable(&self, start: usize) -> Option<usize> {
        self.tiers[start.min(self.tiers.len())..]
            .iter()
            .position(|t| t.capabilities.vision)
            .map(|offset| start + offset)
    }
}

impl std::ops::Index<usize> for TierTable {
    type Output = ModelTier;

    fn index(&self, index: usize) -> &ModelTier {
        &self.tiers[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn table() -> TierTable {
        TierTable::new(vec![
            ModelTier::new(1, Provider::Anthropic, "small").with_prices(dec!(0.8), dec!(4)),
            ModelTier::new(2, Provider::Anthropic, "medium")
                .with_prices(dec!(3), dec!(15))
                .with_capabilities(TierCapabilities {
                    function_calling: true,
                    vision: true,
                }),
            ModelTier::new(3, Provider::OpenAi, "large").with_prices(dec!(10), dec!(40)),
        ])
        .unwrap()
    }

    #[test]
    fn validates_contiguous_ranks() {
        let bad = TierTable::new(vec![
            ModelTier::new(1, Provider::Anthropic, "a"),
            ModelTier::new(3, Provider::Anthropic, "b"),
        ]);
        assert!(bad.is_err());

        let empty = TierTable::new(vec![]);
        assert!(empty.is_err());
    }

    #[test]
    fn strongest_is_last() {
        let t = table();
        assert_eq!(t.strongest(), 2);
        assert_eq!(t.get(t.strongest()).unwrap().rank, 3);
    }

    #[test]
    fn vision_search_respects_start() {
        let t = table();
        assert_eq!(t.first_vision_capable(0), Some(1));
        assert_eq!(t.first_vision_capable(1), Some(1));
        assert_eq!(t.first_vision_capable(2), None);
    }

    #[test]
    fn latency_round_trip() {
        let tier = ModelTier::new(1, Provider::OpenAi, "m")
            .with_max_latency(Duration::from_secs(5));
        assert_eq!(tier.max_latency(), Duration::from_secs(5));
    }
}
