//! Version lifecycle — the publication state machine.
//!
//! Transitions are one-directional along
//! `draft → pending_review → approved → released → deprecated → eol`.
//! Every request is checked against [`ALLOWED_EDGES`] before anything is
//! written; guards for approval and release run next, and the record is
//! only mutated once all checks pass.

use relgrid_core::{
    AuditEntry, CompatibilityMatrix, ReleaseError, ReleaseResult, ReleaseType, ResourceKind,
    ServerBounds, Timestamp, Version, VersionState,
};
use tracing::{debug, info};

use VersionState::*;

/// The complete set of permitted lifecycle edges.
pub const ALLOWED_EDGES: &[(VersionState, VersionState)] = &[
    (Draft, PendingReview),
    (PendingReview, Approved),
    (Approved, Released),
    (Released, Deprecated),
    (Deprecated, Eol),
];

/// Whether `from → to` is a permitted edge.
pub fn is_allowed(from: VersionState, to: VersionState) -> bool {
    ALLOWED_EDGES.contains(&(from, to))
}

/// States reachable from `state` in one step.
pub fn next_states(state: VersionState) -> Vec<VersionState> {
    ALLOWED_EDGES
        .iter()
        .filter(|(from, _)| *from == state)
        .map(|(_, to)| *to)
        .collect()
}

/// How a release is dated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReleaseMode {
    /// Release now; the release date must not be in the future.
    #[default]
    Immediate,
    /// Scheduled release; a future release date is accepted.
    Scheduled,
}

/// Inputs for a lifecycle transition besides the version itself.
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext<'a> {
    /// Who requests the transition. Doubles as the approver identity.
    pub actor: &'a str,
    pub now: Timestamp,
    /// The version's compatibility matrix; only consulted on release.
    pub compatibility: Option<&'a CompatibilityMatrix>,
    pub mode: ReleaseMode,
}

impl<'a> TransitionContext<'a> {
    pub fn new(actor: &'a str, now: Timestamp) -> Self {
        Self {
            actor,
            now,
            compatibility: None,
            mode: ReleaseMode::Immediate,
        }
    }

    pub fn with_compatibility(mut self, matrix: &'a CompatibilityMatrix) -> Self {
        self.compatibility = Some(matrix);
        self
    }

    pub fn scheduled(mut self) -> Self {
        self.mode = ReleaseMode::Scheduled;
        self
    }
}

/// Move `version` to `to`.
///
/// On success the version is updated in place and the audit entry for the
/// accepted transition is returned. On failure `version` is unchanged.
pub fn transition(
    version: &mut Version,
    to: VersionState,
    ctx: &TransitionContext<'_>,
) -> ReleaseResult<AuditEntry> {
    let from = version.state;
    if !is_allowed(from, to) {
        debug!(
            product = %version.product_id,
            version = %version.version_number,
            %from,
            %to,
            "rejected lifecycle transition"
        );
        return Err(ReleaseError::InvalidStateTransition { from, to });
    }

    match to {
        Approved => {
            if ctx.actor.trim().is_empty() {
                return Err(ReleaseError::MissingApprover);
            }
        }
        Released => check_releasable(version, ctx)?,
        _ => {}
    }

    version.state = to;
    match to {
        Approved => {
            version.approved_by = Some(ctx.actor.to_string());
            version.approved_at = Some(ctx.now);
        }
        Released => version.released_at = Some(ctx.now),
        Deprecated => version.deprecated_at = Some(ctx.now),
        Eol => {
            version.eol_date.get_or_insert(ctx.now);
        }
        _ => {}
    }

    info!(
        product = %version.product_id,
        version = %version.version_number,
        %from,
        %to,
        actor = ctx.actor,
        "version transitioned"
    );

    Ok(AuditEntry::new(
        ctx.actor,
        ctx.now,
        ResourceKind::Version,
        version.table_key(),
        action_name(to),
    )
    .with_detail(format!("{from} -> {to}")))
}

fn action_name(to: VersionState) -> &'static str {
    match to {
        Draft => "create",
        PendingReview => "submit_for_review",
        Approved => "approve",
        Released => "release",
        Deprecated => "deprecate",
        Eol => "retire",
    }
}

/// Release guard: the date must have arrived (unless scheduled) and the
/// compatibility matrix for this exact version must be passed or skipped.
fn check_releasable(version: &Version, ctx: &TransitionContext<'_>) -> ReleaseResult<()> {
    if ctx.mode == ReleaseMode::Immediate && version.release_date > ctx.now {
        return Err(ReleaseError::ReleaseDateInFuture {
            release_date: version.release_date,
        });
    }

    let status = ctx
        .compatibility
        .filter(|m| {
            m.product_id == version.product_id && m.version_number == version.version_number
        })
        .map(|m| m.status);

    match status {
        Some(s) if s.permits_release() => Ok(()),
        _ => Err(ReleaseError::CompatibilityNotValidated {
            version: version.version_number.clone(),
            status,
        }),
    }
}

pub fn submit_for_review(
    version: &mut Version,
    actor: &str,
    now: Timestamp,
) -> ReleaseResult<AuditEntry> {
    transition(version, PendingReview, &TransitionContext::new(actor, now))
}

pub fn approve(version: &mut Version, approver: &str, now: Timestamp) -> ReleaseResult<AuditEntry> {
    transition(version, Approved, &TransitionContext::new(approver, now))
}

pub fn release(
    version: &mut Version,
    compatibility: Option<&CompatibilityMatrix>,
    mode: ReleaseMode,
    actor: &str,
    now: Timestamp,
) -> ReleaseResult<AuditEntry> {
    let ctx = TransitionContext {
        actor,
        now,
        compatibility,
        mode,
    };
    transition(version, Released, &ctx)
}

pub fn deprecate(version: &mut Version, actor: &str, now: Timestamp) -> ReleaseResult<AuditEntry> {
    transition(version, Deprecated, &TransitionContext::new(actor, now))
}

pub fn retire(version: &mut Version, actor: &str, now: Timestamp) -> ReleaseResult<AuditEntry> {
    transition(version, Eol, &TransitionContext::new(actor, now))
}

/// A set of changes to the mutable fields of a draft version.
#[derive(Debug, Clone, Default)]
pub struct VersionEdit {
    pub release_type: Option<ReleaseType>,
    pub release_date: Option<Timestamp>,
    pub eol_date: Option<Timestamp>,
    pub server_bounds: Option<ServerBounds>,
    pub notes: Option<String>,
}

impl VersionEdit {
    /// Names of the fields this edit touches.
    pub fn fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.release_type.is_some() {
            fields.push("release_type");
        }
        if self.release_date.is_some() {
            fields.push("release_date");
        }
        if self.eol_date.is_some() {
            fields.push("eol_date");
        }
        if self.server_bounds.is_some() {
            fields.push("server_bounds");
        }
        if self.notes.is_some() {
            fields.push("notes");
        }
        fields
    }
}

/// Apply `edit` to a draft version.
pub fn edit(
    version: &mut Version,
    edit: VersionEdit,
    actor: &str,
    now: Timestamp,
) -> ReleaseResult<AuditEntry> {
    let fields = edit.fields();
    if version.state != Draft {
        return Err(ReleaseError::ImmutableInCurrentState {
            state: version.state,
            field: fields.first().copied().unwrap_or("version"),
        });
    }

    if let Some(release_type) = edit.release_type {
        version.release_type = release_type;
    }
    if let Some(date) = edit.release_date {
        version.release_date = date;
    }
    if let Some(date) = edit.eol_date {
        version.eol_date = Some(date);
    }
    if let Some(bounds) = edit.server_bounds {
        version.server_bounds = bounds;
    }
    if let Some(notes) = edit.notes {
        version.notes = Some(notes);
    }

    debug!(
        product = %version.product_id,
        version = %version.version_number,
        fields = ?fields,
        "draft version edited"
    );

    Ok(
        AuditEntry::new(actor, now, ResourceKind::Version, version.table_key(), "edit")
            .with_detail(fields.join(",")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use relgrid_core::ValidationStatus;

    fn draft() -> Version {
        let now = Utc::now();
        Version::new(
            "p1",
            semver::Version::new(1, 0, 0),
            ReleaseType::Feature,
            now - Duration::days(1),
            now,
        )
    }

    fn matrix(status: ValidationStatus) -> CompatibilityMatrix {
        let mut m = CompatibilityMatrix::pending("p1", semver::Version::new(1, 0, 0));
        m.status = status;
        m
    }

    fn approved() -> Version {
        let mut v = draft();
        let now = Utc::now();
        submit_for_review(&mut v, "dev", now).unwrap();
        approve(&mut v, "lead", now).unwrap();
        v
    }

    #[test]
    fn walks_the_full_lifecycle() {
        let mut v = approved();
        let now = Utc::now();
        let passed = matrix(ValidationStatus::Passed);

        let audit = release(&mut v, Some(&passed), ReleaseMode::Immediate, "rm", now).unwrap();
        assert_eq!(audit.action, "release");
        assert_eq!(audit.resource_id, "p1/1.0.0");
        assert_eq!(v.state, Released);
        assert_eq!(v.released_at, Some(now));

        deprecate(&mut v, "rm", now).unwrap();
        retire(&mut v, "rm", now).unwrap();
        assert_eq!(v.state, Eol);
        assert_eq!(v.eol_date, Some(now));
    }

    #[test]
    fn approval_records_approver() {
        let v = approved();
        assert_eq!(v.state, Approved);
        assert_eq!(v.approved_by.as_deref(), Some("lead"));
        assert!(v.approved_at.is_some());
    }

    #[test]
    fn approval_requires_identity() {
        let mut v = draft();
        submit_for_review(&mut v, "dev", Utc::now()).unwrap();
        let before = v.clone();

        let err = approve(&mut v, "  ", Utc::now()).unwrap_err();
        assert_eq!(err, ReleaseError::MissingApprover);
        assert_eq!(v, before);
    }

    #[test]
    fn no_rollback_to_draft() {
        let mut v = draft();
        submit_for_review(&mut v, "dev", Utc::now()).unwrap();
        let err = transition(&mut v, Draft, &TransitionContext::new("dev", Utc::now())).unwrap_err();
        assert_eq!(
            err,
            ReleaseError::InvalidStateTransition {
                from: PendingReview,
                to: Draft
            }
        );
        assert_eq!(v.state, PendingReview);
    }

    #[test]
    fn deprecation_only_from_released() {
        let mut v = approved();
        let err = deprecate(&mut v, "rm", Utc::now()).unwrap_err();
        assert!(matches!(err, ReleaseError::InvalidStateTransition { .. }));
        assert_eq!(v.state, Approved);
    }

    #[test]
    fn release_blocked_by_pending_or_failed_matrix() {
        for status in [ValidationStatus::Pending, ValidationStatus::Failed] {
            let mut v = approved();
            let m = matrix(status);
            let err = release(&mut v, Some(&m), ReleaseMode::Immediate, "rm", Utc::now())
                .unwrap_err();
            assert_eq!(
                err,
                ReleaseError::CompatibilityNotValidated {
                    version: semver::Version::new(1, 0, 0),
                    status: Some(status),
                }
            );
            assert_eq!(v.state, Approved);
            assert!(v.released_at.is_none());
        }
    }

    #[test]
    fn release_requires_a_matrix_for_this_version() {
        let mut v = approved();
        let err = release(&mut v, None, ReleaseMode::Immediate, "rm", Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            ReleaseError::CompatibilityNotValidated { status: None, .. }
        ));

        let mut other = CompatibilityMatrix::pending("p1", semver::Version::new(9, 9, 9));
        other.status = ValidationStatus::Passed;
        let err = release(&mut v, Some(&other), ReleaseMode::Immediate, "rm", Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            ReleaseError::CompatibilityNotValidated { status: None, .. }
        ));
    }

    #[test]
    fn skipped_matrix_permits_release() {
        let mut v = approved();
        let m = matrix(ValidationStatus::Skipped);
        release(&mut v, Some(&m), ReleaseMode::Immediate, "rm", Utc::now()).unwrap();
        assert_eq!(v.state, Released);
    }

    #[test]
    fn future_release_date_needs_scheduling() {
        let now = Utc::now();
        let mut v = approved();
        v.release_date = now + Duration::days(7);
        let m = matrix(ValidationStatus::Passed);

        let err = release(&mut v, Some(&m), ReleaseMode::Immediate, "rm", now).unwrap_err();
        assert!(matches!(err, ReleaseError::ReleaseDateInFuture { .. }));

        release(&mut v, Some(&m), ReleaseMode::Scheduled, "rm", now).unwrap();
        assert_eq!(v.state, Released);
    }

    #[test]
    fn edits_only_in_draft() {
        let now = Utc::now();
        let mut v = draft();
        let audit = edit(
            &mut v,
            VersionEdit {
                notes: Some("first cut".into()),
                server_bounds: Some(ServerBounds {
                    min: Some("1.0.0".into()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            "dev",
            now,
        )
        .unwrap();
        assert_eq!(audit.detail.as_deref(), Some("server_bounds,notes"));
        assert_eq!(v.notes.as_deref(), Some("first cut"));

        submit_for_review(&mut v, "dev", now).unwrap();
        let before = v.clone();
        let err = edit(
            &mut v,
            VersionEdit {
                release_date: Some(now),
                ..Default::default()
            },
            "dev",
            now,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ReleaseError::ImmutableInCurrentState {
                state: PendingReview,
                field: "release_date"
            }
        );
        assert_eq!(v, before);
    }

    #[test]
    fn next_states_follow_the_chain() {
        assert_eq!(next_states(Draft), vec![PendingReview]);
        assert_eq!(next_states(Released), vec![Deprecated]);
        assert!(next_states(Eol).is_empty());
    }
}
