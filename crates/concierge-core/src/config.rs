//! TOML configuration and hot reload.
//!
//! The process loads one [`CoreConfig`] at startup.  With file watching
//! enabled, edits to the file are re-parsed and re-validated off the hot
//! path; a valid new config replaces the current snapshot atomically, an
//! invalid one is logged and the old snapshot stays in force.  In-flight
//! queries keep the snapshot they started with.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};

use crate::engine::EngineConfig;
use crate::error::{CoreError, Result};
use crate::gateway::{ModelTier, TierTable};

fn default_deadline_secs() -> u64 {
    60
}

/// Full configuration for the orchestration core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Engine bounds.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Default per-query wall-clock deadline in seconds, used when the
    /// caller does not pass one explicitly.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,

    /// The model ladder, cheapest first. TOML array of tables: `[[tier]]`.
    #[serde(rename = "tier")]
    pub tiers: Vec<ModelTier>,
}

impl CoreConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| CoreError::Config {
            reason: format!("failed to parse TOML config: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::Config {
            reason: format!("failed to read config file {}: {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    /// Cross-field validation beyond what serde checks.
    pub fn validate(&self) -> Result<()> {
        self.tier_table()?;
        if self.deadline_secs == 0 {
            return Err(CoreError::Config {
                reason: "deadline_secs must be nonzero".into(),
            });
        }
        if self.engine.max_steps == 0 {
            return Err(CoreError::Config {
                reason: "engine.max_steps must be nonzero".into(),
            });
        }
        Ok(())
    }

    /// The validated tier table.
    pub fn tier_table(&self) -> Result<TierTable> {
        TierTable::new(self.tiers.clone())
    }

    /// The default per-query deadline.
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

// ---------------------------------------------------------------------------
// Hot reload
// ---------------------------------------------------------------------------

/// Shared, hot-reloadable view of the current config.
///
/// `snapshot()` is cheap (one `Arc` clone); holders of a snapshot are
/// unaffected by later reloads.
pub struct ConfigHandle {
    current: Arc<RwLock<Arc<CoreConfig>>>,
    _watcher: Option<RecommendedWatcher>,
}

impl ConfigHandle {
    /// A handle that never reloads.
    pub fn fixed(config: CoreConfig) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
            _watcher: None,
        }
    }

    /// Load `path` and keep reloading it whenever the file changes.
    pub fn watching(path: PathBuf) -> Result<Self> {
        let initial = CoreConfig::load(&path)?;
        let current = Arc::new(RwLock::new(Arc::new(initial)));

        let slot = Arc::clone(&current);
        let watched = path.clone();
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        reload(&watched, &slot);
                    }
                }
                Err(e) => tracing::error!(error = %e, "config watcher error"),
            })?;

        // Watch the parent directory: editors often replace the file
        // instead of modifying it in place.
        let watch_target = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        watcher.watch(&watch_target, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %path.display(), "config hot reload enabled");
        Ok(Self {
            current,
            _watcher: Some(watcher),
        })
    }

    /// The current config snapshot.
    pub fn snapshot(&self) -> Arc<CoreConfig> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

fn reload(path: &Path, slot: &Arc<RwLock<Arc<CoreConfig>>>) {
    match CoreConfig::load(path) {
        Ok(config) => {
            *slot.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(config);
            tracing::info!(path = %path.display(), "config reloaded");
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "config reload failed, keeping previous snapshot"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SAMPLE: &str = r#"
deadline_secs = 45

[engine]
max_steps = 6
cost_ceiling = "0.25"

[[tier]]
rank = 1
provider = "anthropic"
model = "claude-haiku-3-20241022"
input_price = "0.25"
output_price = "1.25"

[[tier]]
rank = 2
provider = "openai"
model = "gpt-4o"
input_price = "2.50"
output_price = "10"
max_latency_ms = 45000

[tier.capabilities]
function_calling = true
vision = true
"#;

    #[test]
    fn parses_a_full_config() {
        let config = CoreConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.deadline_secs, 45);
        assert_eq!(config.engine.max_steps, 6);
        assert_eq!(config.engine.cost_ceiling, dec!(0.25));
        assert_eq!(config.tiers.len(), 2);
        assert_eq!(config.tiers[1].input_price, dec!(2.50));
        assert!(config.tiers[1].capabilities.vision);

        let table = config.tier_table().unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn defaults_fill_omitted_sections() {
        let config = CoreConfig::from_toml_str(
            r#"
[[tier]]
rank = 1
provider = "anthropic"
model = "claude-haiku-3-20241022"
"#,
        )
        .unwrap();
        assert_eq!(config.deadline_secs, 60);
        assert_eq!(config.engine.max_steps, 8);
        assert_eq!(config.engine.max_parse_retries, 2);
    }

    #[test]
    fn non_contiguous_ranks_rejected() {
        let err = CoreConfig::from_toml_str(
            r#"
[[tier]]
rank = 2
provider = "anthropic"
model = "x"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }));
    }

    #[test]
    fn fixed_handle_serves_snapshots() {
        let config = CoreConfig::from_toml_str(
            r#"
[[tier]]
rank = 1
provider = "anthropic"
model = "claude-haiku-3-20241022"
"#,
        )
        .unwrap();
        let handle = ConfigHandle::fixed(config);
        assert_eq!(handle.snapshot().tiers.len(), 1);
    }

    #[test]
    fn watching_loads_the_initial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("concierge.toml");
        std::fs::write(
            &path,
            r#"
[[tier]]
rank = 1
provider = "openai"
model = "gpt-4o-mini"
"#,
        )
        .unwrap();

        let handle = ConfigHandle::watching(path).unwrap();
        assert_eq!(handle.snapshot().tiers[0].model, "gpt-4o-mini");
    }
}
