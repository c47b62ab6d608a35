//! Tool registry: built once at startup, read-only afterwards.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::chat::ToolDefinition;
use crate::error::{CoreError, Result};
use crate::query::UserTier;
use crate::tools::traits::Tool;

/// A fixed set of tools keyed by name.
///
/// The registry is immutable after construction; callers share it behind an
/// `Arc`.  Runtime narrowing (entitlements, routing) happens with permitted
/// name sets, never by mutating the registry.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Build a registry, rejecting duplicate tool names.
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Result<Self> {
        let mut map: HashMap<String, Arc<dyn Tool>> = HashMap::with_capacity(tools.len());
        for tool in tools {
            let name = tool.name().to_owned();
            if map.insert(name.clone(), tool).is_some() {
                return Err(CoreError::Config {
                    reason: format!("duplicate tool name `{name}`"),
                });
            }
        }
        tracing::info!(tool_count = map.len(), "tool registry built");
        Ok(Self { tools: map })
    }

    /// An empty registry, for callers that run without tools.
    pub fn empty() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Whether the named tool exists and is marked trusted.
    pub fn is_trusted(&self, name: &str) -> bool {
        self.tools.get(name).is_some_and(|t| t.trusted())
    }

    /// All tool names, sorted for deterministic prompts and logs.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry has no tools.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Names of every tool the given user tier is entitled to.
    pub fn entitled(&self, user_tier: UserTier) -> BTreeSet<String> {
        self.tools
            .values()
            .filter(|t| user_tier >= t.min_user_tier())
            .map(|t| t.name().to_owned())
            .collect()
    }

    /// Wire-format definitions for the permitted subset, sorted by name.
    pub fn definitions(&self, permitted: &BTreeSet<String>) -> Vec<ToolDefinition> {
        permitted
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| ToolDefinition {
                name: t.name().to_owned(),
                description: t.description().to_owned(),
                input_schema: t.input_schema(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::builtin::{CalculatorTool, ClockTool};

    fn registry() -> ToolRegistry {
        ToolRegistry::new(vec![Arc::new(CalculatorTool), Arc::new(ClockTool)]).unwrap()
    }

    #[test]
    fn duplicate_names_rejected() {
        let result = ToolRegistry::new(vec![Arc::new(ClockTool), Arc::new(ClockTool)]);
        assert!(matches!(result, Err(CoreError::Config { .. })));
    }

    #[test]
    fn names_are_sorted() {
        assert_eq!(registry().names(), vec!["calculator", "clock"]);
    }

    #[test]
    fn entitlement_filter_keeps_standard_tools() {
        let entitled = registry().entitled(UserTier::Standard);
        assert!(entitled.contains("calculator"));
        assert!(entitled.contains("clock"));
    }

    #[test]
    fn definitions_follow_permitted_set() {
        let reg = registry();
        let permitted: BTreeSet<String> = ["calculator".to_owned()].into();
        let defs = reg.definitions(&permitted);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "calculator");
    }
}
