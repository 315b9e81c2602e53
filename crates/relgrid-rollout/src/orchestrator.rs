//! Rollout orchestrator — drives the per-endpoint rollout state machine.
//!
//! `pending → in_progress → {completed | failed}`, with `cancelled`
//! reachable from both non-terminal states. Terminal rollouts are never
//! modified again. Progress reports and status transitions are separate
//! operations; neither implies the other unless the policy asks for
//! auto-completion.

use std::cmp::Ordering;

use relgrid_core::{
    AuditEntry, MissingPathPolicy, PathCheck, Precondition, ReleaseError, ReleaseResult,
    ResourceKind, RolloutStatus, Timestamp, UpdateRollout, UpgradePath, Version, check_id,
};
use relgrid_release::detect::priority_between;
use relgrid_release::paths::PathTable;
use tracing::{debug, info, warn};

use crate::policy::RolloutPolicy;

use RolloutStatus::*;

/// The complete set of permitted rollout status edges.
pub const ALLOWED_EDGES: &[(RolloutStatus, RolloutStatus)] = &[
    (Pending, InProgress),
    (InProgress, Completed),
    (InProgress, Failed),
    (Pending, Cancelled),
    (InProgress, Cancelled),
];

pub fn is_allowed(from: RolloutStatus, to: RolloutStatus) -> bool {
    ALLOWED_EDGES.contains(&(from, to))
}

/// Parameters of a rollout initiation.
#[derive(Debug, Clone, Copy)]
pub struct InitiateRequest<'a> {
    pub endpoint_id: &'a str,
    pub product_id: &'a str,
    pub from_version: &'a semver::Version,
    pub to_version: &'a semver::Version,
    pub actor: &'a str,
    pub now: Timestamp,
}

/// A freshly initiated rollout and the records the caller must persist.
#[derive(Debug, Clone)]
pub struct Initiation {
    pub rollout: UpdateRollout,
    /// Direct path registered because none existed, when the policy says so.
    pub registered_path: Option<UpgradePath>,
    pub audit: Vec<AuditEntry>,
}

/// Stateless rollout decision logic, parameterised by policy.
#[derive(Debug, Clone, Default)]
pub struct RolloutOrchestrator {
    policy: RolloutPolicy,
}

impl RolloutOrchestrator {
    pub fn new(policy: RolloutPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RolloutPolicy {
        &self.policy
    }

    /// Initiate a rollout after checking its preconditions in order:
    /// (a) both versions exist, (b) the target is released, (c) the
    /// versions differ, (d) the upgrade path is not blocked. The first
    /// failing check decides the error.
    ///
    /// A missing upgrade path does not stop initiation; the rollout is
    /// recorded as unverified.
    pub fn initiate(
        &self,
        req: &InitiateRequest<'_>,
        versions: &[Version],
        paths: &mut PathTable,
    ) -> ReleaseResult<Initiation> {
        check_id("endpoint", req.endpoint_id)?;
        check_id("product", req.product_id)?;
        if paths.product_id() != req.product_id {
            return Err(ReleaseError::InvalidUpgradePath {
                from: req.from_version.clone(),
                to: req.to_version.clone(),
                detail: format!(
                    "path table belongs to product {}, not {}",
                    paths.product_id(),
                    req.product_id
                ),
            });
        }

        let from = find_version(versions, req.product_id, req.from_version);
        let to = find_version(versions, req.product_id, req.to_version);

        // (a)
        let (Some(_), Some(to)) = (from, to) else {
            let missing = if from.is_none() {
                req.from_version
            } else {
                req.to_version
            };
            return Err(precondition(
                Precondition::VersionsExist,
                format!("version {missing} does not exist for product {}", req.product_id),
            ));
        };

        // (b)
        if !to.is_released() {
            return Err(precondition(
                Precondition::TargetReleased,
                format!("target version {} is {}, not released", to.version_number, to.state),
            ));
        }

        // (c)
        if req.from_version.cmp_precedence(req.to_version) == Ordering::Equal {
            return Err(precondition(
                Precondition::DistinctVersions,
                format!("endpoint is already on {}", req.from_version),
            ));
        }

        // (d)
        let mut audit = Vec::new();
        let mut registered_path = None;
        let path_check = match paths.resolve(req.from_version, req.to_version) {
            Ok(resolution) => PathCheck::Verified {
                path_type: resolution.path_type,
                steps: resolution.steps,
            },
            Err(err) if err.is_soft() => {
                warn!(
                    product = req.product_id,
                    from = %req.from_version,
                    to = %req.to_version,
                    "no upgrade path registered, proceeding unverified"
                );
                if self.policy.missing_path == MissingPathPolicy::RegisterDirect {
                    let path = UpgradePath::direct(
                        req.product_id,
                        req.from_version.clone(),
                        req.to_version.clone(),
                        req.actor,
                        req.now,
                    );
                    audit.push(paths.register(path, req.actor, req.now)?);
                    registered_path = paths.get(req.from_version, req.to_version).cloned();
                }
                PathCheck::Unverified
            }
            Err(err) => return Err(err),
        };

        let rollout = UpdateRollout {
            id: uuid::Uuid::new_v4().to_string(),
            endpoint_id: req.endpoint_id.to_string(),
            product_id: req.product_id.to_string(),
            from_version: req.from_version.clone(),
            to_version: req.to_version.clone(),
            status: Pending,
            progress: 0,
            path_check,
            priority: priority_between(
                req.from_version,
                req.to_version,
                versions.iter().filter(|v| v.product_id == req.product_id),
            ),
            initiated_by: req.actor.to_string(),
            initiated_at: req.now,
            started_at: None,
            completed_at: None,
            failed_at: None,
            cancelled_at: None,
            error_message: None,
            revision: 0,
        };

        info!(
            rollout = %rollout.id,
            endpoint = %rollout.endpoint_id,
            product = %rollout.product_id,
            from = %rollout.from_version,
            to = %rollout.to_version,
            "rollout initiated"
        );

        audit.push(
            AuditEntry::new(
                req.actor,
                req.now,
                ResourceKind::Rollout,
                rollout.id.clone(),
                "initiate",
            )
            .with_detail(format!("{} -> {}", rollout.from_version, rollout.to_version)),
        );

        Ok(Initiation {
            rollout,
            registered_path,
            audit,
        })
    }

    /// Move the rollout to `to`. `error_message` is required for `failed`
    /// and ignored otherwise.
    pub fn transition(
        &self,
        rollout: &mut UpdateRollout,
        to: RolloutStatus,
        error_message: Option<&str>,
        actor: &str,
        now: Timestamp,
    ) -> ReleaseResult<AuditEntry> {
        ensure_not_terminal(rollout)?;
        let from = rollout.status;
        if !is_allowed(from, to) {
            return Err(ReleaseError::InvalidRolloutTransition { from, to });
        }

        let message = match to {
            Failed => match error_message.map(str::trim) {
                Some(m) if !m.is_empty() => Some(m.to_string()),
                _ => return Err(ReleaseError::MissingErrorMessage),
            },
            _ => None,
        };

        rollout.status = to;
        match to {
            InProgress => {
                rollout.started_at.get_or_insert(now);
            }
            Completed => rollout.completed_at = Some(now),
            Failed => {
                rollout.failed_at = Some(now);
                rollout.error_message = message;
            }
            Cancelled => rollout.cancelled_at = Some(now),
            Pending => {}
        }

        match to {
            Failed => warn!(
                rollout = %rollout.id,
                endpoint = %rollout.endpoint_id,
                error = rollout.error_message.as_deref().unwrap_or_default(),
                "rollout failed"
            ),
            _ => info!(rollout = %rollout.id, %from, %to, "rollout transitioned"),
        }

        let mut entry = AuditEntry::new(
            actor,
            now,
            ResourceKind::Rollout,
            rollout.id.clone(),
            to.as_str(),
        );
        entry.detail = rollout.error_message.clone();
        Ok(entry)
    }

    pub fn start(
        &self,
        rollout: &mut UpdateRollout,
        actor: &str,
        now: Timestamp,
    ) -> ReleaseResult<AuditEntry> {
        self.transition(rollout, InProgress, None, actor, now)
    }

    pub fn complete(
        &self,
        rollout: &mut UpdateRollout,
        actor: &str,
        now: Timestamp,
    ) -> ReleaseResult<AuditEntry> {
        self.transition(rollout, Completed, None, actor, now)
    }

    pub fn fail(
        &self,
        rollout: &mut UpdateRollout,
        error_message: &str,
        actor: &str,
        now: Timestamp,
    ) -> ReleaseResult<AuditEntry> {
        self.transition(rollout, Failed, Some(error_message), actor, now)
    }

    pub fn cancel(
        &self,
        rollout: &mut UpdateRollout,
        actor: &str,
        now: Timestamp,
    ) -> ReleaseResult<AuditEntry> {
        self.transition(rollout, Cancelled, None, actor, now)
    }

    /// Record a progress report.
    ///
    /// Returns the audit entry of the completion when the policy
    /// auto-completes at 100%, `None` otherwise.
    pub fn report_progress(
        &self,
        rollout: &mut UpdateRollout,
        progress: u32,
        actor: &str,
        now: Timestamp,
    ) -> ReleaseResult<Option<AuditEntry>> {
        ensure_not_terminal(rollout)?;
        let Ok(value) = u8::try_from(progress) else {
            return Err(ReleaseError::InvalidProgress(progress));
        };
        if value > 100 {
            return Err(ReleaseError::InvalidProgress(progress));
        }

        rollout.progress = value;
        debug!(rollout = %rollout.id, progress = value, "rollout progress");

        if value == 100
            && rollout.status == InProgress
            && self.policy.auto_complete_at_full_progress
        {
            return self.complete(rollout, actor, now).map(Some);
        }
        Ok(None)
    }
}

fn find_version<'v>(
    versions: &'v [Version],
    product_id: &str,
    number: &semver::Version,
) -> Option<&'v Version> {
    versions
        .iter()
        .find(|v| v.product_id == product_id && v.version_number == *number)
}

fn ensure_not_terminal(rollout: &UpdateRollout) -> ReleaseResult<()> {
    if rollout.status.is_terminal() {
        return Err(ReleaseError::RolloutAlreadyTerminal {
            id: rollout.id.clone(),
            status: rollout.status,
        });
    }
    Ok(())
}

fn precondition(precondition: Precondition, detail: String) -> ReleaseError {
    debug!(%precondition, %detail, "rollout precondition failed");
    ReleaseError::RolloutPreconditionFailed {
        precondition,
        detail,
    }
}
