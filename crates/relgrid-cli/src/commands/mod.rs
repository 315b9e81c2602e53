//! Command implementations. Each command loads the records it needs,
//! hands them to the engine, persists the result with save-if-unchanged,
//! and reports accepted transitions to the audit log.

pub mod detect;
pub mod init;
pub mod path;
pub mod product;
pub mod rollout;
pub mod version;

use chrono::Utc;
use relgrid_core::{AuditEntry, RelgridConfig, Timestamp};
use relgrid_rollout::{RolloutOrchestrator, RolloutPolicy};
use relgrid_state::StateStore;
use serde::Serialize;
use tracing::info;

/// Everything a command needs: the store, the orchestrator and who acts.
pub struct Context {
    pub store: StateStore,
    pub orchestrator: RolloutOrchestrator,
    pub actor: String,
}

impl Context {
    pub fn open(config: &RelgridConfig, actor: String) -> anyhow::Result<Self> {
        if let Some(parent) = config.store.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = StateStore::open(&config.store.path)?;
        Ok(Self {
            store,
            orchestrator: RolloutOrchestrator::new(RolloutPolicy::from_config(config)),
            actor,
        })
    }

    pub fn now(&self) -> Timestamp {
        Utc::now()
    }

    /// Audit sink: one structured event per accepted transition.
    pub fn audit(&self, entries: &[AuditEntry]) {
        for entry in entries {
            info!(
                target: "relgrid::audit",
                actor = %entry.actor,
                at = %entry.at,
                resource = %entry.resource,
                resource_id = %entry.resource_id,
                action = %entry.action,
                detail = entry.detail.as_deref().unwrap_or_default(),
                "accepted"
            );
        }
    }
}

/// A persisted record plus the audit entries of the change that produced it.
#[derive(Debug, Serialize)]
pub struct Outcome<T: Serialize> {
    pub record: T,
    pub audit: Vec<AuditEntry>,
}

impl<T: Serialize> Outcome<T> {
    /// Emit `audit` and wrap `record`.
    pub fn recorded(ctx: &Context, record: T, audit: Vec<AuditEntry>) -> Self {
        ctx.audit(&audit);
        Self { record, audit }
    }
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn parse_version(input: &str) -> anyhow::Result<semver::Version> {
    Ok(relgrid_core::parse_version(input)?)
}

#[cfg(test)]
pub(crate) fn test_context(policy: RolloutPolicy) -> Context {
    Context {
        store: StateStore::open_in_memory().unwrap(),
        orchestrator: RolloutOrchestrator::new(policy),
        actor: "tester".to_string(),
    }
}
