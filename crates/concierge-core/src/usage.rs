//! Token and cost accounting.
//!
//! Every model-call attempt — success or failure — produces one
//! [`TokenUsage`] record.  Records accumulate in an append-only
//! [`UsageLedger`] owned by a single reasoning run and are merged into
//! [`UsageTotals`] only at finalization.  Costs use [`Decimal`] arithmetic
//! so many small additions never drift.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::gateway::tier::ModelTier;

/// Prices are quoted in USD per million tokens.
const TOKENS_PER_PRICE_UNIT: Decimal = dec!(1_000_000);

// ---------------------------------------------------------------------------
// Per-attempt record
// ---------------------------------------------------------------------------

/// Accounting record for one model-call attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the prompt.
    pub input_tokens: u32,

    /// Number of tokens the model generated.
    pub output_tokens: u32,

    /// Derived cost in USD.  Zero for a failed attempt that produced no
    /// billable tokens.
    pub cost: Decimal,

    /// Rank of the tier this attempt targeted.
    pub tier_rank: u8,

    /// Whether the attempt produced a usable response.
    pub success: bool,
}

impl TokenUsage {
    /// Record for a successful attempt, with cost derived from the tier's
    /// per-million-token prices.
    pub fn charged(tier: &ModelTier, input_tokens: u32, output_tokens: u32) -> Self {
        let cost = Decimal::from(input_tokens) * tier.input_price / TOKENS_PER_PRICE_UNIT
            + Decimal::from(output_tokens) * tier.output_price / TOKENS_PER_PRICE_UNIT;
        Self {
            input_tokens,
            output_tokens,
            cost,
            tier_rank: tier.rank,
            success: true,
        }
    }

    /// Record for a failed attempt that produced no tokens.
    pub fn failed(tier_rank: u8) -> Self {
        Self {
            input_tokens: 0,
            output_tokens: 0,
            cost: Decimal::ZERO,
            tier_rank,
            success: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Append-only sequence of [`TokenUsage`] records for one query.
///
/// Owned by exactly one in-flight [`crate::engine::state::ReasoningState`];
/// entries are never reordered, deduplicated, or removed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageLedger {
    entries: Vec<TokenUsage>,
}

impl UsageLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one attempt record.
    pub fn push(&mut self, usage: TokenUsage) {
        self.entries.push(usage);
    }

    /// Append a batch of attempt records, preserving order.
    pub fn extend(&mut self, usages: impl IntoIterator<Item = TokenUsage>) {
        self.entries.extend(usages);
    }

    /// All recorded attempts, in append order.
    pub fn entries(&self) -> &[TokenUsage] {
        &self.entries
    }

    /// Total accumulated cost across all attempts.
    pub fn total_cost(&self) -> Decimal {
        self.entries.iter().map(|u| u.cost).sum()
    }

    /// Merge into summary totals.  Called once at finalization.
    pub fn totals(&self) -> UsageTotals {
        let mut totals = UsageTotals::default();
        for entry in &self.entries {
            totals.input_tokens += u64::from(entry.input_tokens);
            totals.output_tokens += u64::from(entry.output_tokens);
            totals.cost += entry.cost;
            totals.attempts += 1;
            if !entry.success {
                totals.failed_attempts += 1;
            }
        }
        totals
    }
}

/// Merged accounting summary for one finalized query, for billing and
/// observability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    /// Total prompt tokens across all attempts.
    pub input_tokens: u64,

    /// Total generated tokens across all attempts.
    pub output_tokens: u64,

    /// Total cost in USD.
    pub cost: Decimal,

    /// Number of model-call attempts, including failures.
    pub attempts: u32,

    /// How many of those attempts failed (always zero-cost).
    pub failed_attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::tier::{ModelTier, Provider};

    fn tier() -> ModelTier {
        ModelTier::new(1, Provider::Anthropic, "test-model")
            .with_prices(dec!(3.00), dec!(15.00))
    }

    #[test]
    fn charged_cost_is_exact_decimal() {
        let usage = TokenUsage::charged(&tier(), 1000, 200);
        // 1000 * 3.00/1M + 200 * 15.00/1M = 0.003 + 0.003
        assert_eq!(usage.cost, dec!(0.006));
        assert!(usage.success);
    }

    #[test]
    fn failed_attempt_costs_nothing() {
        let usage = TokenUsage::failed(2);
        assert_eq!(usage.cost, Decimal::ZERO);
        assert_eq!(usage.tier_rank, 2);
        assert!(!usage.success);
    }

    #[test]
    fn ledger_is_append_only_and_sums_exactly() {
        let mut ledger = UsageLedger::new();
        // Many small additions must not drift.
        for _ in 0..1000 {
            ledger.push(TokenUsage::charged(&tier(), 100, 10));
        }
        assert_eq!(ledger.entries().len(), 1000);
        // 1000 * (100*3 + 10*15) / 1M = 1000 * 0.00045
        assert_eq!(ledger.total_cost(), dec!(0.45));
    }

    #[test]
    fn totals_merge() {
        let mut ledger = UsageLedger::new();
        ledger.push(TokenUsage::failed(1));
        ledger.push(TokenUsage::failed(1));
        ledger.push(TokenUsage::charged(&tier(), 500, 100));

        let totals = ledger.totals();
        assert_eq!(totals.attempts, 3);
        assert_eq!(totals.failed_attempts, 2);
        assert_eq!(totals.input_tokens, 500);
        assert_eq!(totals.output_tokens, 100);
        assert_eq!(totals.cost, dec!(0.003));
    }
}
