//! Upgrade path resolution for one product.
//!
//! Each (from, to) pair is registered independently. Resolution looks up
//! the exact pair and nothing else: there is no graph walk and no implicit
//! path creation. A blocked record rejects the upgrade with its reason; a
//! missing record yields the soft [`ReleaseError::PathNotFound`].

use std::cmp::Ordering;
use std::collections::BTreeMap;

use relgrid_core::{
    AuditEntry, PathType, ProductId, ReleaseError, ReleaseResult, ResourceKind, Timestamp,
    UpgradePath,
};
use tracing::{debug, info, warn};

/// An accepted upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub path_type: PathType,
    /// Intermediate versions, empty for direct paths.
    pub steps: Vec<semver::Version>,
}

type PairKey = (semver::Version, semver::Version);

/// The registered upgrade paths of a single product.
#[derive(Debug, Clone, Default)]
pub struct PathTable {
    product_id: ProductId,
    paths: BTreeMap<PairKey, UpgradePath>,
}

impl PathTable {
    pub fn new(product_id: &str) -> Self {
        Self {
            product_id: product_id.to_string(),
            paths: BTreeMap::new(),
        }
    }

    /// Build a table from stored records. Records of other products are
    /// skipped.
    pub fn from_records(product_id: &str, records: impl IntoIterator<Item = UpgradePath>) -> Self {
        let mut table = Self::new(product_id);
        for path in records {
            if path.product_id != table.product_id {
                debug!(
                    expected = %table.product_id,
                    found = %path.product_id,
                    "skipping upgrade path of another product"
                );
                continue;
            }
            table.paths.insert(pair(&path.from_version, &path.to_version), path);
        }
        table
    }

    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    pub fn get(&self, from: &semver::Version, to: &semver::Version) -> Option<&UpgradePath> {
        self.paths.get(&pair(from, to))
    }

    pub fn iter(&self) -> impl Iterator<Item = &UpgradePath> {
        self.paths.values()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Decide whether `from → to` is permitted.
    pub fn resolve(&self, from: &semver::Version, to: &semver::Version) -> ReleaseResult<Resolution> {
        let Some(path) = self.get(from, to) else {
            debug!(product = %self.product_id, %from, %to, "no upgrade path registered");
            return Err(ReleaseError::PathNotFound {
                product: self.product_id.clone(),
                from: from.clone(),
                to: to.clone(),
            });
        };

        if path.effective_type() == PathType::Blocked {
            return Err(ReleaseError::UpgradeBlocked {
                product: self.product_id.clone(),
                from: from.clone(),
                to: to.clone(),
                reason: path.block_reason.clone().unwrap_or_default(),
            });
        }

        Ok(Resolution {
            path_type: path.path_type,
            steps: path.steps.clone(),
        })
    }

    /// Create or replace the record for `path`'s pair.
    ///
    /// Replacing a blocked record with an unblocked one is how a path is
    /// unblocked. The stored revision of a replaced record is carried over.
    pub fn register(
        &mut self,
        mut path: UpgradePath,
        actor: &str,
        now: Timestamp,
    ) -> ReleaseResult<AuditEntry> {
        self.check(&path)?;

        if !path.is_blocked {
            path.block_reason = None;
        }
        path.updated_at = now;
        path.updated_by = actor.to_string();

        let key = pair(&path.from_version, &path.to_version);
        let previous = self.paths.get(&key);
        let was_blocked = previous.is_some_and(|p| p.is_blocked);
        if let Some(previous) = previous {
            path.revision = previous.revision;
        }

        let action = match (was_blocked, path.is_blocked) {
            (true, false) => "unblock",
            (_, true) => "block",
            (false, false) => "register",
        };

        info!(
            product = %self.product_id,
            from = %path.from_version,
            to = %path.to_version,
            path_type = %path.path_type,
            blocked = path.is_blocked,
            action,
            "upgrade path registered"
        );

        let audit = AuditEntry::new(
            actor,
            now,
            ResourceKind::UpgradePath,
            path.table_key(),
            action,
        )
        .with_detail(path.effective_type().as_str());
        self.paths.insert(key, path);
        Ok(audit)
    }

    /// Block `from → to` with `reason`.
    ///
    /// An existing record keeps its path type and steps; otherwise a new
    /// record of type `blocked` is created. An empty reason is rejected and
    /// the table is left as it was.
    pub fn block(
        &mut self,
        from: &semver::Version,
        to: &semver::Version,
        reason: &str,
        actor: &str,
        now: Timestamp,
    ) -> ReleaseResult<AuditEntry> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ReleaseError::EmptyBlockReason);
        }

        let mut path = match self.get(from, to) {
            Some(existing) => existing.clone(),
            None => {
                let mut path =
                    UpgradePath::direct(&self.product_id, from.clone(), to.clone(), actor, now);
                path.path_type = PathType::Blocked;
                path
            }
        };
        path.is_blocked = true;
        path.block_reason = Some(reason.to_string());

        warn!(product = %self.product_id, %from, %to, reason, "blocking upgrade path");
        self.register(path, actor, now)
    }

    fn check(&self, path: &UpgradePath) -> ReleaseResult<()> {
        let invalid = |detail: String| ReleaseError::InvalidUpgradePath {
            from: path.from_version.clone(),
            to: path.to_version.clone(),
            detail,
        };

        if path.product_id != self.product_id {
            return Err(invalid(format!(
                "belongs to product {}, not {}",
                path.product_id, self.product_id
            )));
        }
        if path.from_version.cmp_precedence(&path.to_version) == Ordering::Equal {
            return Err(invalid("source and target have the same precedence".into()));
        }
        if path.is_blocked
            && path
                .block_reason
                .as_deref()
                .is_none_or(|r| r.trim().is_empty())
        {
            return Err(ReleaseError::EmptyBlockReason);
        }

        match path.path_type {
            PathType::Direct if !path.steps.is_empty() => {
                Err(invalid("direct paths have no intermediate steps".into()))
            }
            PathType::MultiStep => check_steps(path).map_err(invalid),
            PathType::Blocked if !path.is_blocked => {
                Err(invalid("a blocked-type path must carry the block flag".into()))
            }
            _ => Ok(()),
        }
    }
}

/// Steps of a multi-step path must lie strictly between the endpoints and
/// move monotonically from source towards target.
fn check_steps(path: &UpgradePath) -> Result<(), String> {
    if path.steps.is_empty() {
        return Err("multi-step paths need at least one intermediate step".into());
    }
    let toward = path.from_version.cmp_precedence(&path.to_version);
    let mut previous = &path.from_version;
    for step in path.steps.iter().chain(std::iter::once(&path.to_version)) {
        let forward = previous.cmp_precedence(step) == toward;
        if !forward {
            return Err(format!(
                "step {step} does not lie between {previous} and {}",
                path.to_version
            ));
        }
        previous = step;
    }
    Ok(())
}

fn pair(from: &semver::Version, to: &semver::Version) -> PairKey {
    (from.clone(), to.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn v(s: &str) -> semver::Version {
        semver::Version::parse(s).unwrap()
    }

    fn direct(from: &str, to: &str) -> UpgradePath {
        UpgradePath::direct("p1", v(from), v(to), "ops", Utc::now())
    }

    fn multi(from: &str, to: &str, steps: &[&str]) -> UpgradePath {
        let mut p = direct(from, to);
        p.path_type = PathType::MultiStep;
        p.steps = steps.iter().map(|s| v(s)).collect();
        p
    }

    #[test]
    fn resolves_registered_direct_path() {
        let mut table = PathTable::new("p1");
        table.register(direct("1.0.0", "2.0.0"), "ops", Utc::now()).unwrap();

        let res = table.resolve(&v("1.0.0"), &v("2.0.0")).unwrap();
        assert_eq!(res.path_type, PathType::Direct);
        assert!(res.steps.is_empty());
    }

    #[test]
    fn resolves_multi_step_with_steps() {
        let mut table = PathTable::new("p1");
        table
            .register(multi("1.0.0", "3.0.0", &["2.0.0"]), "ops", Utc::now())
            .unwrap();
        let res = table.resolve(&v("1.0.0"), &v("3.0.0")).unwrap();
        assert_eq!(res.path_type, PathType::MultiStep);
        assert_eq!(res.steps, vec![v("2.0.0")]);
    }

    #[test]
    fn missing_pair_is_path_not_found() {
        let mut table = PathTable::new("p1");
        table.register(direct("1.0.0", "2.0.0"), "ops", Utc::now()).unwrap();
        table.register(direct("2.0.0", "3.0.0"), "ops", Utc::now()).unwrap();

        // No transitive inference across registered pairs.
        let err = table.resolve(&v("1.0.0"), &v("3.0.0")).unwrap_err();
        assert!(err.is_soft());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn blocked_path_surfaces_reason() {
        let mut table = PathTable::new("p1");
        table.register(direct("1.0.0", "2.0.0"), "ops", Utc::now()).unwrap();
        let audit = table
            .block(&v("1.0.0"), &v("2.0.0"), "data migration required", "ops", Utc::now())
            .unwrap();
        assert_eq!(audit.action, "block");

        match table.resolve(&v("1.0.0"), &v("2.0.0")) {
            Err(ReleaseError::UpgradeBlocked { reason, .. }) => {
                assert_eq!(reason, "data migration required")
            }
            other => panic!("expected UpgradeBlocked, got {other:?}"),
        }
        let stored = table.get(&v("1.0.0"), &v("2.0.0")).unwrap();
        assert_eq!(stored.path_type, PathType::Direct);
        assert_eq!(stored.effective_type(), PathType::Blocked);
    }

    #[test]
    fn blocking_unknown_pair_creates_blocked_record() {
        let mut table = PathTable::new("p1");
        table
            .block(&v("1.0.0"), &v("1.1.0"), "bad build", "ops", Utc::now())
            .unwrap();
        let stored = table.get(&v("1.0.0"), &v("1.1.0")).unwrap();
        assert_eq!(stored.path_type, PathType::Blocked);
        assert!(stored.is_blocked);
    }

    #[test]
    fn empty_reason_leaves_path_unblocked() {
        let mut table = PathTable::new("p1");
        table.register(direct("1.0.0", "2.0.0"), "ops", Utc::now()).unwrap();

        let err = table
            .block(&v("1.0.0"), &v("2.0.0"), "   ", "ops", Utc::now())
            .unwrap_err();
        assert_eq!(err, ReleaseError::EmptyBlockReason);
        assert!(!table.get(&v("1.0.0"), &v("2.0.0")).unwrap().is_blocked);
    }

    #[test]
    fn replacing_with_unblocked_record_unblocks() {
        let mut table = PathTable::new("p1");
        table
            .block(&v("1.0.0"), &v("2.0.0"), "hold", "ops", Utc::now())
            .unwrap();
        let audit = table.register(direct("1.0.0", "2.0.0"), "ops", Utc::now()).unwrap();
        assert_eq!(audit.action, "unblock");
        assert!(table.resolve(&v("1.0.0"), &v("2.0.0")).is_ok());
        assert!(table.get(&v("1.0.0"), &v("2.0.0")).unwrap().block_reason.is_none());
    }

    #[test]
    fn rejects_malformed_paths() {
        let mut table = PathTable::new("p1");
        let now = Utc::now();

        let err = table.register(direct("1.0.0", "1.0.0"), "ops", now).unwrap_err();
        assert!(matches!(err, ReleaseError::InvalidUpgradePath { .. }));

        let err = table.register(multi("1.0.0", "3.0.0", &[]), "ops", now).unwrap_err();
        assert!(matches!(err, ReleaseError::InvalidUpgradePath { .. }));

        let err = table
            .register(multi("1.0.0", "3.0.0", &["2.5.0", "2.0.0"]), "ops", now)
            .unwrap_err();
        assert!(matches!(err, ReleaseError::InvalidUpgradePath { .. }));

        let mut stray = direct("1.0.0", "2.0.0");
        stray.steps.push(v("1.5.0"));
        assert!(table.register(stray, "ops", now).is_err());

        let mut flagged = direct("1.0.0", "2.0.0");
        flagged.is_blocked = true;
        assert_eq!(
            table.register(flagged, "ops", now).unwrap_err(),
            ReleaseError::EmptyBlockReason
        );

        let mut foreign = direct("1.0.0", "2.0.0");
        foreign.product_id = "p2".into();
        assert!(table.register(foreign, "ops", now).is_err());

        assert!(table.is_empty());
    }

    #[test]
    fn steps_are_ordered_by_precedence() {
        let mut table = PathTable::new("p1");
        let now = Utc::now();

        // Build metadata does not move a step past the source.
        let err = table
            .register(multi("1.0.0", "2.0.0", &["1.0.0+b.1"]), "ops", now)
            .unwrap_err();
        assert!(matches!(err, ReleaseError::InvalidUpgradePath { .. }));

        let err = table
            .register(multi("1.0.0", "1.0.0+b.2", &["1.0.0+b.1"]), "ops", now)
            .unwrap_err();
        assert!(matches!(err, ReleaseError::InvalidUpgradePath { .. }));

        match table.register(direct("1.0.0", "1.0.0+b.2"), "ops", now).unwrap_err() {
            ReleaseError::InvalidUpgradePath { detail, .. } => {
                assert_eq!(detail, "source and target have the same precedence")
            }
            other => panic!("expected InvalidUpgradePath, got {other:?}"),
        }

        table
            .register(multi("1.0.0", "2.0.0", &["2.0.0-rc.1"]), "ops", now)
            .unwrap();
        table
            .register(multi("3.0.0", "1.0.0", &["2.0.0"]), "ops", now)
            .unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn register_carries_stored_revision() {
        let mut stored = direct("1.0.0", "2.0.0");
        stored.revision = 4;
        let mut table = PathTable::from_records("p1", [stored]);
        table
            .register(multi("1.0.0", "2.0.0", &["1.5.0"]), "ops", Utc::now())
            .unwrap();
        assert_eq!(table.get(&v("1.0.0"), &v("2.0.0")).unwrap().revision, 4);
    }

    #[test]
    fn from_records_skips_other_products() {
        let mut other = direct("1.0.0", "2.0.0");
        other.product_id = "p2".into();
        let table = PathTable::from_records("p1", [other, direct("1.0.0", "1.1.0")]);
        assert_eq!(table.len(), 1);
    }
}
