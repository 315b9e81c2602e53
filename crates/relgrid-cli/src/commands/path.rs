use relgrid_core::{PathType, ReleaseError, UpgradePath};
use relgrid_release::PathTable;
use serde::Serialize;

use super::{Context, Outcome, parse_version};

/// Load every registered path of `product_id` into a resolution table.
pub fn load_table(ctx: &Context, product_id: &str) -> anyhow::Result<PathTable> {
    let records = ctx.store.list_paths(product_id)?;
    Ok(PathTable::from_records(product_id, records))
}

/// Register (or re-register, which also unblocks) `from → to`. Non-empty
/// `via` makes it a multi-step path.
pub fn register(
    ctx: &Context,
    product_id: &str,
    from: &str,
    to: &str,
    via: &[String],
) -> anyhow::Result<Outcome<UpgradePath>> {
    let (from, to) = (parse_version(from)?, parse_version(to)?);
    let steps = via
        .iter()
        .map(|s| parse_version(s))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let now = ctx.now();
    let mut path = UpgradePath::direct(product_id, from.clone(), to.clone(), &ctx.actor, now);
    if !steps.is_empty() {
        path.path_type = PathType::MultiStep;
        path.steps = steps;
    }

    let mut table = load_table(ctx, product_id)?;
    let audit = table.register(path, &ctx.actor, now)?;
    persist(ctx, &table, &from, &to, audit)
}

pub fn block(
    ctx: &Context,
    product_id: &str,
    from: &str,
    to: &str,
    reason: &str,
) -> anyhow::Result<Outcome<UpgradePath>> {
    let (from, to) = (parse_version(from)?, parse_version(to)?);
    let mut table = load_table(ctx, product_id)?;
    let audit = table.block(&from, &to, reason, &ctx.actor, ctx.now())?;
    persist(ctx, &table, &from, &to, audit)
}

fn persist(
    ctx: &Context,
    table: &PathTable,
    from: &semver::Version,
    to: &semver::Version,
    audit: relgrid_core::AuditEntry,
) -> anyhow::Result<Outcome<UpgradePath>> {
    let Some(path) = table.get(from, to) else {
        anyhow::bail!("upgrade path {from} -> {to} missing after update");
    };
    let saved = ctx.store.save(path)?;
    Ok(Outcome::recorded(ctx, saved, vec![audit]))
}

/// Answer to "may this endpoint go from `from` to `to`?".
#[derive(Debug, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Permitted {
        path_type: PathType,
        steps: Vec<semver::Version>,
    },
    Blocked {
        reason: String,
    },
    NotRegistered,
}

pub fn resolve(ctx: &Context, product_id: &str, from: &str, to: &str) -> anyhow::Result<Verdict> {
    let (from, to) = (parse_version(from)?, parse_version(to)?);
    let table = load_table(ctx, product_id)?;
    match table.resolve(&from, &to) {
        Ok(resolution) => Ok(Verdict::Permitted {
            path_type: resolution.path_type,
            steps: resolution.steps,
        }),
        Err(ReleaseError::UpgradeBlocked { reason, .. }) => Ok(Verdict::Blocked { reason }),
        Err(ReleaseError::PathNotFound { .. }) => Ok(Verdict::NotRegistered),
        Err(other) => Err(other.into()),
    }
}

pub fn list(ctx: &Context, product_id: &str) -> anyhow::Result<Vec<UpgradePath>> {
    Ok(ctx.store.list_paths(product_id)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{product, test_context};
    use relgrid_core::ProductKind;
    use relgrid_rollout::RolloutPolicy;

    #[test]
    fn block_then_register_round_trips_through_store() {
        let ctx = test_context(RolloutPolicy::default());
        product::add(&ctx, "p1", "Pump", ProductKind::Client).unwrap();

        assert!(matches!(
            resolve(&ctx, "p1", "1.0.0", "3.0.0").unwrap(),
            Verdict::NotRegistered
        ));

        register(&ctx, "p1", "1.0.0", "3.0.0", &["2.0.0".to_string()]).unwrap();
        match resolve(&ctx, "p1", "1.0.0", "3.0.0").unwrap() {
            Verdict::Permitted { path_type, steps } => {
                assert_eq!(path_type, PathType::MultiStep);
                assert_eq!(steps, vec![semver::Version::new(2, 0, 0)]);
            }
            other => panic!("unexpected verdict {other:?}"),
        }

        let blocked = block(&ctx, "p1", "1.0.0", "3.0.0", "schema v4").unwrap();
        assert_eq!(blocked.audit[0].action, "block");
        assert_eq!(blocked.record.path_type, PathType::MultiStep);
        assert!(matches!(
            resolve(&ctx, "p1", "1.0.0", "3.0.0").unwrap(),
            Verdict::Blocked { reason } if reason == "schema v4"
        ));

        let unblocked = register(&ctx, "p1", "1.0.0", "3.0.0", &[]).unwrap();
        assert_eq!(unblocked.audit[0].action, "unblock");
        assert_eq!(list(&ctx, "p1").unwrap().len(), 1);
    }

    #[test]
    fn empty_reason_leaves_store_untouched() {
        let ctx = test_context(RolloutPolicy::default());
        let err = block(&ctx, "p1", "1.0.0", "2.0.0", "   ").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ReleaseError>(),
            Some(ReleaseError::EmptyBlockReason)
        ));
        assert!(list(&ctx, "p1").unwrap().is_empty());
    }
}
