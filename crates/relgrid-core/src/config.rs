//! relgrid.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelgridConfig {
    pub store: StoreConfig,
    pub rollout: Option<RolloutConfig>,
    pub log: Option<LogConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the redb database file.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutConfig {
    /// Complete an in-progress rollout as soon as it reports 100%.
    pub auto_complete_at_full_progress: Option<bool>,
    /// What to do when no upgrade path is registered for a pair.
    pub missing_path: Option<MissingPathPolicy>,
}

/// Handling of rollouts whose (from, to) pair has no registered path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPathPolicy {
    /// Proceed unverified; nothing is written.
    #[default]
    Proceed,
    /// Proceed and register a direct path for the pair.
    RegisterDirect,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`.
    pub filter: Option<String>,
    /// Emit JSON lines instead of human-readable output.
    pub json: Option<bool>,
}

impl RelgridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RelgridConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a relgrid.toml storing state at `store_path`.
    pub fn scaffold(store_path: &Path) -> Self {
        RelgridConfig {
            store: StoreConfig {
                path: store_path.to_path_buf(),
            },
            rollout: Some(RolloutConfig {
                auto_complete_at_full_progress: Some(false),
                missing_path: Some(MissingPathPolicy::Proceed),
            }),
            log: Some(LogConfig {
                filter: Some("relgrid=info".to_string()),
                json: Some(false),
            }),
        }
    }

    pub fn log_filter(&self) -> &str {
        self.log
            .as_ref()
            .and_then(|l| l.filter.as_deref())
            .unwrap_or("relgrid=info")
    }

    pub fn log_json(&self) -> bool {
        self.log.as_ref().and_then(|l| l.json).unwrap_or(false)
    }
}
