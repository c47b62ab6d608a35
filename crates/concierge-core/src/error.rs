//! Core error types.
//!
//! All orchestration subsystems surface errors through [`CoreError`].  The
//! taxonomy distinguishes transient failures (recovered locally by retry or
//! tier fallback) from non-transient ones (surfaced to the caller together
//! with whatever partial reasoning state was gathered).

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Unified error type for the orchestration core.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    // -- Model gateway -------------------------------------------------------
    /// The rendered prompt does not fit the chosen tier's context window.
    /// The gateway fails fast; truncation is the caller's responsibility.
    #[error("prompt (~{estimated_tokens} tokens) exceeds tier {tier_rank} context window ({context_window} tokens)")]
    ContextOverflow {
        estimated_tokens: u32,
        context_window: u32,
        tier_rank: u8,
    },

    /// The provider rejected the request on content-policy grounds.
    /// Non-transient: no further tier is attempted for this call.
    #[error("content rejected by tier {tier_rank}: {reason}")]
    ContentRejected { tier_rank: u8, reason: String },

    /// Every configured tier failed with a transient error.
    #[error("all {attempts} provider tiers exhausted")]
    AllProvidersExhausted { attempts: usize },

    // -- Tool executor -------------------------------------------------------
    /// Tool arguments did not match the tool's declared schema, or the tool
    /// is unknown / not permitted for this query.
    #[error("invalid arguments for tool `{tool}`: {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// A tool exceeded its execution time budget.
    #[error("tool `{tool}` timed out after {timeout:?}")]
    ToolTimeout { tool: String, timeout: Duration },

    /// A tool panicked or failed in an unexpected way.  Caught by the
    /// executor so a tool failure never crashes the reasoning loop.
    #[error("tool `{tool}` crashed: {reason}")]
    ToolCrashed { tool: String, reason: String },

    // -- Reasoning engine ----------------------------------------------------
    /// The model's structured output could not be parsed into an action.
    /// Recoverable with bounded corrective retries.
    #[error("could not parse model output into an action: {reason}")]
    ParseError { reason: String },

    /// The per-query wall-clock deadline was exceeded.
    #[error("query deadline exceeded")]
    DeadlineExceeded,

    /// Two consecutive identical tool failures for the same (tool,
    /// arguments) pair forced termination.
    #[error("loop breaker triggered on repeated identical failure of tool `{tool}`")]
    LoopBreakerTriggered { tool: String },

    /// The per-query cost ceiling left no headroom for another model call.
    #[error("no cost headroom for another model call: spent {spent} of ceiling {ceiling}")]
    CostCeilingExceeded { spent: Decimal, ceiling: Decimal },

    /// The caller cancelled the query; in-flight external calls were
    /// released cooperatively.
    #[error("query cancelled by caller")]
    Cancelled,

    // -- Configuration -------------------------------------------------------
    /// Configuration loading or validation failed.
    #[error("config error: {reason}")]
    Config { reason: String },

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// File system notification error (config hot reload).
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    // -- Generic -------------------------------------------------------------
    /// Catch-all for unexpected internal errors.  Prefer a typed variant
    /// whenever possible.
    #[error("internal core error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Whether this error may be recovered locally by retry or fallback.
    ///
    /// Transient errors stay inside the component that detected them;
    /// non-transient ones surface to the caller as a typed failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ToolTimeout { .. } | Self::ParseError { .. } | Self::Internal(_)
        )
    }

    /// The flat taxonomy kind for this error, for tagging tool results and
    /// persisted failure records.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ContextOverflow { .. } => ErrorKind::ContextOverflow,
            Self::ContentRejected { .. } => ErrorKind::ContentRejected,
            Self::AllProvidersExhausted { .. } => ErrorKind::AllProvidersExhausted,
            Self::InvalidArguments { .. } => ErrorKind::InvalidArguments,
            Self::ToolTimeout { .. } => ErrorKind::ToolTimeout,
            Self::ToolCrashed { .. } => ErrorKind::ToolCrashed,
            Self::ParseError { .. } => ErrorKind::ParseError,
            Self::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            Self::LoopBreakerTriggered { .. } => ErrorKind::LoopBreakerTriggered,
            Self::CostCeilingExceeded { .. } => ErrorKind::CostCeilingExceeded,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config { .. } | Self::Json(_) | Self::Notify(_) | Self::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// Flat error classification shared by [`CoreError`] and tool results.
///
/// A failed tool invocation carries one of these kinds so the reasoning
/// engine can decide whether to keep looping without inspecting messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ContextOverflow,
    ContentRejected,
    AllProvidersExhausted,
    InvalidArguments,
    ToolTimeout,
    ToolCrashed,
    /// A tool ran but reported a typed failure of its own.
    ToolFailed,
    ParseError,
    DeadlineExceeded,
    LoopBreakerTriggered,
    CostCeilingExceeded,
    Cancelled,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ContextOverflow => "context_overflow",
            Self::ContentRejected => "content_rejected",
            Self::AllProvidersExhausted => "all_providers_exhausted",
            Self::InvalidArguments => "invalid_arguments",
            Self::ToolTimeout => "tool_timeout",
            Self::ToolCrashed => "tool_crashed",
            Self::ToolFailed => "tool_failed",
            Self::ParseError => "parse_error",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::LoopBreakerTriggered => "loop_breaker_triggered",
            Self::CostCeilingExceeded => "cost_ceiling_exceeded",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(
            CoreError::ToolTimeout {
                tool: "search".into(),
                timeout: Duration::from_secs(10),
            }
            .is_transient()
        );
        assert!(
            CoreError::ParseError {
                reason: "bad json".into(),
            }
            .is_transient()
        );

        assert!(
            !CoreError::ContentRejected {
                tier_rank: 1,
                reason: "policy".into(),
            }
            .is_transient()
        );
        assert!(!CoreError::DeadlineExceeded.is_transient());
        assert!(!CoreError::AllProvidersExhausted { attempts: 3 }.is_transient());
    }

    #[test]
    fn kind_mapping_round_trip() {
        let err = CoreError::LoopBreakerTriggered {
            tool: "crm_lookup".into(),
        };
        assert_eq!(err.kind(), ErrorKind::LoopBreakerTriggered);
        assert_eq!(err.kind().to_string(), "loop_breaker_triggered");
    }
}
