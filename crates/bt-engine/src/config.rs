use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// What the component does once the tree runs out of nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Start over from the root.
    #[default]
    Looped,
    /// Stop and keep the result.
    SingleRun,
}

/// Tunables of a [`crate::TreeComponent`], loadable from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Execution requests processed within one tick. Later ones wait for the
    /// next tick.
    #[serde(default = "default_max_search_passes")]
    pub max_search_passes_per_tick: u32,

    pub default_run_mode: RunMode,

    /// Seeds the per-agent stream used for service interval deviation.
    pub seed: u64,

    /// Record every trace event in an in-memory log.
    pub trace: bool,
}

fn default_max_search_passes() -> u32 {
    8
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_search_passes_per_tick: default_max_search_passes(),
            default_run_mode: RunMode::default(),
            seed: 0,
            trace: false,
        }
    }
}

impl RuntimeConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        Self::from_yaml(&contents)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    pub fn from_yaml(contents: &str) -> anyhow::Result<Self> {
        let config: RuntimeConfig = serde_yaml::from_str(contents)?;
        if config.max_search_passes_per_tick == 0 {
            anyhow::bail!("max_search_passes_per_tick must be at least 1");
        }
        Ok(config)
    }
}
