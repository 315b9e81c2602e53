//! Property-based tests for the release engine.

use std::cmp::Ordering;

use chrono::Utc;
use proptest::prelude::*;
use relgrid_core::{
    CompatibilityMatrix, ReleaseError, ReleaseType, UpgradePath, ValidationStatus, Version,
    VersionState,
};
use relgrid_release::detect::{Detection, detect};
use relgrid_release::lifecycle::{self, TransitionContext};
use relgrid_release::paths::PathTable;

fn arb_state() -> impl Strategy<Value = VersionState> {
    prop::sample::select(VersionState::ALL.to_vec())
}

fn arb_status() -> impl Strategy<Value = ValidationStatus> {
    prop::sample::select(ValidationStatus::ALL.to_vec())
}

fn arb_version() -> impl Strategy<Value = semver::Version> {
    let pre = prop::option::of(prop::sample::select(vec!["alpha.1", "beta.2", "rc.1"]));
    let build = prop::option::of(prop::sample::select(vec!["build.5", "b.1", "sha.0f3a"]));
    (0u64..5, 0u64..5, 0u64..5, pre, build).prop_map(|(major, minor, patch, pre, build)| {
        let mut v = semver::Version::new(major, minor, patch);
        if let Some(pre) = pre {
            v.pre = semver::Prerelease::new(pre).unwrap();
        }
        if let Some(build) = build {
            v.build = semver::BuildMetadata::new(build).unwrap();
        }
        v
    })
}

fn version_in(state: VersionState, number: semver::Version) -> Version {
    let now = Utc::now();
    let mut v = Version::new("p1", number, ReleaseType::Feature, now, now);
    v.state = state;
    v
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_only_allowed_edges_succeed(
        from in arb_state(),
        to in arb_state(),
        status in arb_status(),
    ) {
        let mut version = version_in(from, semver::Version::new(1, 0, 0));
        let before = version.clone();
        let mut matrix = CompatibilityMatrix::pending("p1", version.version_number.clone());
        matrix.status = status;
        let ctx = TransitionContext::new("actor", Utc::now()).with_compatibility(&matrix);

        let result = lifecycle::transition(&mut version, to, &ctx);
        let allowed = lifecycle::is_allowed(from, to);

        if !allowed {
            prop_assert_eq!(result, Err(ReleaseError::InvalidStateTransition { from, to }));
            prop_assert_eq!(&version, &before);
        } else if to == VersionState::Released && !status.permits_release() {
            prop_assert!(
                matches!(result, Err(ReleaseError::CompatibilityNotValidated { .. })),
                "release must be blocked by a {} matrix",
                status
            );
            prop_assert_eq!(&version, &before);
        } else {
            prop_assert!(result.is_ok());
            prop_assert_eq!(version.state, to);
        }
    }

    #[test]
    fn prop_detector_never_offers_older_or_equal(
        current in arb_version(),
        numbers in prop::collection::vec((arb_version(), arb_state()), 0..12),
    ) {
        let versions: Vec<Version> = numbers
            .into_iter()
            .map(|(number, state)| version_in(state, number))
            .collect();

        let newer = |a: &semver::Version, b: &semver::Version| {
            a.cmp_precedence(b) == Ordering::Greater
        };

        match detect("ep-1", "p1", &current, &versions, None, Utc::now()) {
            Detection::UpToDate => {
                prop_assert!(!versions
                    .iter()
                    .any(|v| v.state == VersionState::Released && newer(&v.version_number, &current)));
            }
            other => {
                let record = other.record().unwrap();
                prop_assert!(newer(&record.available_version, &current));
                let none_newer_released = versions.iter().all(|v| {
                    v.state != VersionState::Released
                        || !newer(&v.version_number, &record.available_version)
                });
                prop_assert!(none_newer_released);
            }
        }
    }

    #[test]
    fn prop_resolution_is_idempotent(
        pairs in prop::collection::vec((arb_version(), arb_version(), any::<bool>()), 0..10),
        from in arb_version(),
        to in arb_version(),
    ) {
        let now = Utc::now();
        let mut table = PathTable::new("p1");
        for (a, b, blocked) in pairs {
            if a.cmp_precedence(&b) == Ordering::Equal {
                continue;
            }
            if blocked {
                table.block(&a, &b, "held", "ops", now).unwrap();
            } else {
                table.register(UpgradePath::direct("p1", a, b, "ops", now), "ops", now).unwrap();
            }
        }

        let first = table.resolve(&from, &to);
        let second = table.resolve(&from, &to);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_empty_block_reason_never_blocks(
        from in arb_version(),
        to in arb_version(),
        blanks in "[ \t]{0,4}",
    ) {
        prop_assume!(from.cmp_precedence(&to) != Ordering::Equal);
        let now = Utc::now();
        let mut table = PathTable::new("p1");
        table
            .register(UpgradePath::direct("p1", from.clone(), to.clone(), "ops", now), "ops", now)
            .unwrap();

        let err = table.block(&from, &to, &blanks, "ops", now).unwrap_err();
        prop_assert_eq!(err, ReleaseError::EmptyBlockReason);
        prop_assert!(!table.get(&from, &to).unwrap().is_blocked);
    }
}
