//! The tool contract.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::query::UserTier;

/// Default latency budget for a single tool invocation.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

/// A capability the reasoning engine can invoke.
///
/// Implementations must be side-effect safe to retry: the loop may call the
/// same tool with the same arguments again after a transient failure.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique registry name, e.g. `"calculator"`.
    fn name(&self) -> &str;

    /// One-line description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema (draft 7) the arguments are validated against before
    /// the body runs.
    fn input_schema(&self) -> Value;

    /// Whether observations from this tool are authoritative and must be
    /// cited over model recall when composing the final answer.
    fn trusted(&self) -> bool {
        false
    }

    /// Minimum user tier entitled to this tool.
    fn min_user_tier(&self) -> UserTier {
        UserTier::Standard
    }

    /// Latency budget for one invocation.
    fn timeout(&self) -> Duration {
        DEFAULT_TOOL_TIMEOUT
    }

    /// Run the tool. The returned value becomes the observation: strings
    /// verbatim, anything else serialized as JSON.
    async fn run(&self, arguments: Value) -> crate::error::Result<Value>;
}
