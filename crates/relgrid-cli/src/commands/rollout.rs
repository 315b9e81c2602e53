use anyhow::anyhow;
use relgrid_core::{RolloutStatus, UpdateRollout, check_id};
use relgrid_rollout::InitiateRequest;

use super::{Context, Outcome, parse_version, path, product};

/// Initiate a rollout and store it, claiming the endpoint's slot for the
/// product. A path registered by policy is stored in the same write.
pub fn initiate(
    ctx: &Context,
    endpoint_id: &str,
    product_id: &str,
    from: &str,
    to: &str,
) -> anyhow::Result<Outcome<UpdateRollout>> {
    check_id("endpoint", endpoint_id)?;
    check_id("product", product_id)?;
    product::require_active(ctx, product_id)?;
    let (from, to) = (parse_version(from)?, parse_version(to)?);
    let versions = ctx.store.list_versions(product_id)?;
    let mut paths = path::load_table(ctx, product_id)?;

    let request = InitiateRequest {
        endpoint_id,
        product_id,
        from_version: &from,
        to_version: &to,
        actor: &ctx.actor,
        now: ctx.now(),
    };
    let initiation = ctx.orchestrator.initiate(&request, &versions, &mut paths)?;
    let rollout = ctx
        .store
        .save_rollout(&initiation.rollout, initiation.registered_path.as_ref())?;
    Ok(Outcome::recorded(ctx, rollout, initiation.audit))
}

/// Move a rollout to `to`; `message` is the failure reason for `failed`.
pub fn set_status(
    ctx: &Context,
    rollout_id: &str,
    to: RolloutStatus,
    message: Option<&str>,
) -> anyhow::Result<Outcome<UpdateRollout>> {
    let mut rollout = load(ctx, rollout_id)?;
    let audit = ctx
        .orchestrator
        .transition(&mut rollout, to, message, &ctx.actor, ctx.now())?;
    let rollout = ctx.store.save_rollout(&rollout, None)?;
    Ok(Outcome::recorded(ctx, rollout, vec![audit]))
}

pub fn progress(
    ctx: &Context,
    rollout_id: &str,
    value: u32,
) -> anyhow::Result<Outcome<UpdateRollout>> {
    let mut rollout = load(ctx, rollout_id)?;
    let completed = ctx
        .orchestrator
        .report_progress(&mut rollout, value, &ctx.actor, ctx.now())?;
    let rollout = ctx.store.save_rollout(&rollout, None)?;
    Ok(Outcome::recorded(ctx, rollout, completed.into_iter().collect()))
}

pub fn show(ctx: &Context, rollout_id: &str) -> anyhow::Result<UpdateRollout> {
    load(ctx, rollout_id)
}

/// Rollouts, optionally narrowed to one endpoint, oldest first.
pub fn list(ctx: &Context, endpoint_id: Option<&str>) -> anyhow::Result<Vec<UpdateRollout>> {
    let mut rollouts: Vec<UpdateRollout> = ctx
        .store
        .list_rollouts()?
        .into_iter()
        .filter(|r| endpoint_id.is_none_or(|e| r.endpoint_id == e))
        .collect();
    rollouts.sort_by_key(|r| r.initiated_at);
    Ok(rollouts)
}

fn load(ctx: &Context, rollout_id: &str) -> anyhow::Result<UpdateRollout> {
    ctx.store
        .get_rollout(rollout_id)?
        .ok_or_else(|| anyhow!("rollout {rollout_id} not found"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{test_context, version};
    use relgrid_core::{
        MissingPathPolicy, PathCheck, PathType, ProductKind, ReleaseType, ServerBounds,
        VersionState,
    };
    use relgrid_rollout::RolloutPolicy;

    fn context(policy: RolloutPolicy) -> Context {
        let ctx = test_context(policy);
        product::add(&ctx, "p1", "Pump", ProductKind::Client).unwrap();
        for number in ["1.0.0", "1.1.0"] {
            version::add(
                &ctx,
                "p1",
                number,
                ReleaseType::Security,
                None,
                ServerBounds::default(),
                None,
            )
            .unwrap();
            version::validate(&ctx, "p1", number, vec![]).unwrap();
            for to in [
                VersionState::PendingReview,
                VersionState::Approved,
                VersionState::Released,
            ] {
                version::transition(&ctx, "p1", number, to, false).unwrap();
            }
        }
        ctx
    }

    #[test]
    fn auto_complete_frees_the_endpoint_slot() {
        let ctx = context(RolloutPolicy {
            auto_complete_at_full_progress: true,
            ..RolloutPolicy::default()
        });
        let id = initiate(&ctx, "ep-1", "p1", "1.0.0", "1.1.0").unwrap().record.id;
        set_status(&ctx, &id, RolloutStatus::InProgress, None).unwrap();

        let done = progress(&ctx, &id, 100).unwrap();
        assert_eq!(done.record.status, RolloutStatus::Completed);
        assert_eq!(done.audit.len(), 1);
        assert!(ctx.store.active_rollout("ep-1", "p1").unwrap().is_none());

        let next = initiate(&ctx, "ep-1", "p1", "1.0.0", "1.1.0").unwrap();
        assert_eq!(next.record.status, RolloutStatus::Pending);
        assert_eq!(list(&ctx, Some("ep-1")).unwrap().len(), 2);
        assert!(list(&ctx, Some("ep-2")).unwrap().is_empty());
    }

    #[test]
    fn register_direct_policy_stores_the_path() {
        let ctx = context(RolloutPolicy {
            missing_path: MissingPathPolicy::RegisterDirect,
            ..RolloutPolicy::default()
        });
        let started = initiate(&ctx, "ep-1", "p1", "1.0.0", "1.1.0").unwrap();
        // Registered after the check, so this rollout itself is unverified.
        assert_eq!(started.record.path_check, PathCheck::Unverified);
        assert_eq!(started.audit[0].action, "register");
        let stored = ctx
            .store
            .get_path("p1", &semver::Version::new(1, 0, 0), &semver::Version::new(1, 1, 0))
            .unwrap()
            .unwrap();
        assert_eq!(stored.path_type, PathType::Direct);
    }

    #[test]
    fn failing_without_message_changes_nothing() {
        let ctx = context(RolloutPolicy::default());
        let id = initiate(&ctx, "ep-1", "p1", "1.0.0", "1.1.0").unwrap().record.id;
        assert!(set_status(&ctx, &id, RolloutStatus::Failed, Some("  ")).is_err());
        let stored = show(&ctx, &id).unwrap();
        assert_eq!(stored.status, RolloutStatus::Pending);
        assert!(stored.failed_at.is_none());
    }
}
