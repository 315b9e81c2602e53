use anyhow::anyhow;
use relgrid_core::{
    AuditEntry, CompatibilityMatrix, ReleaseType, ResourceKind, ServerBounds, Timestamp, Version,
    VersionState,
};
use relgrid_release::compat;
use relgrid_release::lifecycle::{self, TransitionContext, VersionEdit};
use tracing::debug;

use super::{Context, Outcome, parse_version, product};

/// Register a new draft version with its pending compatibility matrix.
pub fn add(
    ctx: &Context,
    product_id: &str,
    number: &str,
    release_type: ReleaseType,
    release_date: Option<Timestamp>,
    server_bounds: ServerBounds,
    notes: Option<String>,
) -> anyhow::Result<Outcome<Version>> {
    product::require_active(ctx, product_id)?;
    let now = ctx.now();
    let mut version = Version::new(
        product_id,
        parse_version(number)?,
        release_type,
        release_date.unwrap_or(now),
        now,
    );
    version.server_bounds = server_bounds;
    version.notes = notes;

    let (version, _matrix) = ctx.store.register_version(&version)?;
    let audit = AuditEntry::new(
        &ctx.actor,
        now,
        ResourceKind::Version,
        version.table_key(),
        "create",
    )
    .with_detail(version.state.as_str());
    Ok(Outcome::recorded(ctx, version, vec![audit]))
}

/// Edit a draft version. Changing its server bounds sends the stored
/// compatibility verdict back to `pending` in the same write.
pub fn edit(
    ctx: &Context,
    product_id: &str,
    number: &str,
    changes: VersionEdit,
) -> anyhow::Result<Outcome<Version>> {
    let mut version = load(ctx, product_id, number)?;
    let bounds_changed = changes.server_bounds.is_some();
    let now = ctx.now();
    let mut audit = vec![lifecycle::edit(&mut version, changes, &ctx.actor, now)?];

    let mut matrix = None;
    if bounds_changed {
        let mut stored = match ctx.store.get_matrix(product_id, &version.version_number)? {
            Some(matrix) => matrix,
            None => CompatibilityMatrix::pending(product_id, version.version_number.clone()),
        };
        audit.push(compat::invalidate(&mut stored, &ctx.actor, now));
        matrix = Some(stored);
    }

    let (version, _) = ctx.store.save_version(&version, matrix.as_ref())?;
    Ok(Outcome::recorded(ctx, version, audit))
}

/// Move a version along its lifecycle. Releasing reads the stored
/// compatibility matrix; `scheduled` permits a future release date.
pub fn transition(
    ctx: &Context,
    product_id: &str,
    number: &str,
    to: VersionState,
    scheduled: bool,
) -> anyhow::Result<Outcome<Version>> {
    let mut version = load(ctx, product_id, number)?;
    let matrix = match to {
        VersionState::Released => ctx.store.get_matrix(product_id, &version.version_number)?,
        _ => None,
    };

    let mut tctx = TransitionContext::new(&ctx.actor, ctx.now());
    if let Some(matrix) = matrix.as_ref() {
        tctx = tctx.with_compatibility(matrix);
    }
    if scheduled {
        debug!(version = %version.version_number, "scheduled release");
        tctx = tctx.scheduled();
    }

    let audit = lifecycle::transition(&mut version, to, &tctx)?;
    let version = ctx.store.save(&version)?;
    Ok(Outcome::recorded(ctx, version, vec![audit]))
}

/// Validate a version's server bounds and store the verdict.
pub fn validate(
    ctx: &Context,
    product_id: &str,
    number: &str,
    incompatible_versions: Vec<String>,
) -> anyhow::Result<Outcome<CompatibilityMatrix>> {
    let version = load(ctx, product_id, number)?;
    let mut matrix = match ctx.store.get_matrix(product_id, &version.version_number)? {
        Some(matrix) => matrix,
        None => CompatibilityMatrix::pending(product_id, version.version_number.clone()),
    };
    let audit = compat::validate(
        &version,
        incompatible_versions,
        &mut matrix,
        &ctx.actor,
        ctx.now(),
    );
    let matrix = ctx.store.save(&matrix)?;
    Ok(Outcome::recorded(ctx, matrix, vec![audit]))
}

/// A version together with its compatibility matrix and the states it
/// may move to next.
#[derive(Debug, serde::Serialize)]
pub struct VersionView {
    pub version: Version,
    pub compatibility: Option<CompatibilityMatrix>,
    pub next_states: Vec<VersionState>,
}

pub fn show(ctx: &Context, product_id: &str, number: &str) -> anyhow::Result<VersionView> {
    let version = load(ctx, product_id, number)?;
    let compatibility = ctx.store.get_matrix(product_id, &version.version_number)?;
    let next_states = lifecycle::next_states(version.state);
    Ok(VersionView {
        version,
        compatibility,
        next_states,
    })
}

pub fn list(ctx: &Context, product_id: &str) -> anyhow::Result<Vec<Version>> {
    Ok(ctx.store.list_versions(product_id)?)
}

fn load(ctx: &Context, product_id: &str, number: &str) -> anyhow::Result<Version> {
    let number = parse_version(number)?;
    ctx.store
        .get_version(product_id, &number)?
        .ok_or_else(|| anyhow!("version {product_id} {number} not found"))
}
