//! Rollout policy — operator-chosen behaviour around initiation and completion.

use relgrid_core::{MissingPathPolicy, RelgridConfig};

/// How the orchestrator treats the two policy-dependent situations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RolloutPolicy {
    /// Complete an in-progress rollout when it reports 100%. Off by
    /// default: progress and status are independent knobs.
    pub auto_complete_at_full_progress: bool,
    /// Handling of initiations whose pair has no registered path.
    pub missing_path: MissingPathPolicy,
}

impl RolloutPolicy {
    /// Read the `[rollout]` section, falling back to defaults.
    pub fn from_config(config: &RelgridConfig) -> Self {
        let defaults = Self::default();
        match &config.rollout {
            Some(cfg) => Self {
                auto_complete_at_full_progress: cfg
                    .auto_complete_at_full_progress
                    .unwrap_or(defaults.auto_complete_at_full_progress),
                missing_path: cfg.missing_path.unwrap_or(defaults.missing_path),
            },
            None => defaults,
        }
    }
}
