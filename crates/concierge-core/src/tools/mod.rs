//! Tool execution.
//!
//! [`ToolExecutor`] is the only path from a model-requested [`ToolCall`] to
//! a running tool body: arguments are validated against the tool's JSON
//! Schema first, the body runs in its own task under a hard timeout, and
//! every failure mode comes back as a tagged [`ToolResult`] so the
//! reasoning loop never crashes on a misbehaving tool.

pub mod builtin;
pub mod registry;
pub mod traits;

use std::collections::BTreeSet;
use std::sync::Arc;

use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

pub use registry::ToolRegistry;
pub use traits::{DEFAULT_TOOL_TIMEOUT, Tool};

use crate::chat::ToolCall;
use crate::error::{CoreError, ErrorKind};

/// Outcome of one tool invocation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ToolResult {
    /// The tool ran to completion.
    Success { observation: String },
    /// The tool could not produce an observation.
    Failure { kind: ErrorKind, message: String },
}

impl ToolResult {
    /// Whether this result carries an observation.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    fn from_error(err: CoreError) -> Self {
        Self::Failure {
            message: err.to_string(),
            kind: match err.kind() {
                // A typed tool-body error that is not one of the executor's
                // own kinds counts as a plain tool failure.
                ErrorKind::Internal => ErrorKind::ToolFailed,
                kind => kind,
            },
        }
    }
}

/// Validates, time-bounds, and dispatches tool calls against a read-only
/// registry.
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this executor dispatches against.
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Whether observations from the named tool are authoritative.
    pub fn is_trusted(&self, name: &str) -> bool {
        self.registry.is_trusted(name)
    }

    /// Execute one call. `permitted` is the tool set the routing decision
    /// allowed for this query; anything outside it is refused at dispatch.
    pub async fn execute(&self, call: &ToolCall, permitted: &BTreeSet<String>) -> ToolResult {
        match self.try_execute(call, permitted).await {
            Ok(observation) => {
                tracing::debug!(tool = %call.name, "tool call succeeded");
                ToolResult::Success { observation }
            }
            Err(err) => {
                tracing::warn!(tool = %call.name, error = %err, "tool call failed");
                ToolResult::from_error(err)
            }
        }
    }

    /// Execute a batch of calls concurrently, preserving input order.
    pub async fn execute_batch(
        &self,
        calls: &[ToolCall],
        permitted: &BTreeSet<String>,
    ) -> Vec<ToolResult> {
        futures::future::join_all(calls.iter().map(|call| self.execute(call, permitted))).await
    }

    async fn try_execute(
        &self,
        call: &ToolCall,
        permitted: &BTreeSet<String>,
    ) -> crate::error::Result<String> {
        if !permitted.contains(&call.name) {
            return Err(CoreError::InvalidArguments {
                tool: call.name.clone(),
                reason: "tool is not permitted for this query".into(),
            });
        }
        let tool = self
            .registry
            .get(&call.name)
            .ok_or_else(|| CoreError::InvalidArguments {
                tool: call.name.clone(),
                reason: "unknown tool".into(),
            })?;

        validate_arguments(tool.as_ref(), &call.arguments)?;

        let timeout = tool.timeout();
        let tool = Arc::clone(tool);
        let arguments = call.arguments.clone();
        let name = call.name.clone();

        // The body runs in its own task so a panic is contained and comes
        // back as a JoinError instead of unwinding through the loop.
        let mut handle = tokio::spawn(async move { tool.run(arguments).await });

        let joined = tokio::time::timeout(timeout, &mut handle).await;
        match joined {
            Err(_) => {
                handle.abort();
                Err(CoreError::ToolTimeout {
                    tool: name,
                    timeout,
                })
            }
            Ok(Err(join_err)) => Err(CoreError::ToolCrashed {
                reason: if join_err.is_panic() {
                    "tool panicked".into()
                } else {
                    join_err.to_string()
                },
                tool: name,
            }),
            Ok(Ok(result)) => result.map(|value| match value {
                Value::String(s) => s,
                other => other.to_string(),
            }),
        }
    }
}

/// Check `arguments` against the tool's declared schema.
///
/// The schema is compiled per call; tool schemas are small and this keeps
/// the registry free of borrowed compiled state.
fn validate_arguments(tool: &dyn Tool, arguments: &Value) -> crate::error::Result<()> {
    let schema_value = tool.input_schema();
    let schema = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema_value)
        .map_err(|e| CoreError::Internal(format!(
            "tool `{}` has an invalid schema: {e}",
            tool.name()
        )))?;

    if let Err(errors) = schema.validate(arguments) {
        let messages: Vec<String> = errors
            .map(|e| format!("{}: {}", e.instance_path, e))
            .collect();
        return Err(CoreError::InvalidArguments {
            tool: tool.name().to_owned(),
            reason: messages.join("; "),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::builtin::{CalculatorTool, ClockTool};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> &str {
            "panics"
        }
        fn description(&self) -> &str {
            "always panics"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn run(&self, _arguments: Value) -> crate::error::Result<Value> {
            panic!("boom")
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "never finishes"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        fn timeout(&self) -> Duration {
            Duration::from_millis(20)
        }
        async fn run(&self, _arguments: Value) -> crate::error::Result<Value> {
            futures::future::pending().await
        }
    }

    fn executor() -> ToolExecutor {
        let registry = ToolRegistry::new(vec![
            Arc::new(CalculatorTool),
            Arc::new(ClockTool),
            Arc::new(PanickingTool),
            Arc::new(SlowTool),
        ])
        .unwrap();
        ToolExecutor::new(Arc::new(registry))
    }

    fn all_permitted(exec: &ToolExecutor) -> BTreeSet<String> {
        exec.registry()
            .names()
            .into_iter()
            .map(str::to_owned)
            .collect()
    }

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: "tc_test".into(),
            name: name.into(),
            arguments,
        }
    }

    #[tokio::test]
    async fn calculator_evaluates() {
        let exec = executor();
        let permitted = all_permitted(&exec);
        let result = exec
            .execute(&call("calculator", json!({"expression": "2 + 3 * 4"})), &permitted)
            .await;
        match result {
            ToolResult::Success { observation } => assert_eq!(observation, "14"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn schema_violation_is_invalid_arguments() {
        let exec = executor();
        let permitted = all_permitted(&exec);
        let result = exec
            .execute(&call("calculator", json!({"expr": "2 + 2"})), &permitted)
            .await;
        match result {
            ToolResult::Failure { kind, .. } => assert_eq!(kind, ErrorKind::InvalidArguments),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_invalid_arguments() {
        let exec = executor();
        let mut permitted = all_permitted(&exec);
        permitted.insert("nope".into());
        let result = exec.execute(&call("nope", json!({})), &permitted).await;
        assert!(matches!(
            result,
            ToolResult::Failure {
                kind: ErrorKind::InvalidArguments,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unpermitted_tool_refused_at_dispatch() {
        let exec = executor();
        let permitted = BTreeSet::new();
        let result = exec.execute(&call("clock", json!({})), &permitted).await;
        assert!(matches!(
            result,
            ToolResult::Failure {
                kind: ErrorKind::InvalidArguments,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn panic_is_contained_as_crash() {
        let exec = executor();
        let permitted = all_permitted(&exec);
        let result = exec.execute(&call("panics", json!({})), &permitted).await;
        assert!(matches!(
            result,
            ToolResult::Failure {
                kind: ErrorKind::ToolCrashed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        let exec = executor();
        let permitted = all_permitted(&exec);
        let result = exec.execute(&call("slow", json!({})), &permitted).await;
        assert!(matches!(
            result,
            ToolResult::Failure {
                kind: ErrorKind::ToolTimeout,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let exec = executor();
        let permitted = all_permitted(&exec);
        let calls = vec![
            call("calculator", json!({"expression": "1 + 1"})),
            call("calculator", json!({"expression": "10 / 4"})),
        ];
        let results = exec.execute_batch(&calls, &permitted).await;
        assert_eq!(results.len(), 2);
        match &results[0] {
            ToolResult::Success { observation } => assert_eq!(observation, "2"),
            other => panic!("unexpected result: {other:?}"),
        }
        match &results[1] {
            ToolResult::Success { observation } => assert_eq!(observation, "2.5"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
