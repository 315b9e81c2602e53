//! Update detection — what an endpoint could upgrade to.

use std::cmp::Ordering;

use relgrid_core::{Timestamp, UpdateDetection, UpdatePriority, Version};
use tracing::{debug, info};

/// Result of checking one endpoint's installation of a product.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    /// No released version is newer than the installed one.
    UpToDate,
    /// First detection for this (current, available) pair.
    New(UpdateDetection),
    /// Same pair as before; only `last_checked_at` moved.
    Refreshed(UpdateDetection),
    /// A newer release replaced the previously detected one.
    Superseded {
        previous: semver::Version,
        detection: UpdateDetection,
    },
}

impl Detection {
    pub fn record(&self) -> Option<&UpdateDetection> {
        match self {
            Detection::UpToDate => None,
            Detection::New(d) | Detection::Refreshed(d) => Some(d),
            Detection::Superseded { detection, .. } => Some(detection),
        }
    }

    pub fn into_record(self) -> Option<UpdateDetection> {
        match self {
            Detection::UpToDate => None,
            Detection::New(d) | Detection::Refreshed(d) => Some(d),
            Detection::Superseded { detection, .. } => Some(detection),
        }
    }
}

/// The highest released version strictly above `current`.
///
/// Ordering is semver precedence: build metadata never makes a version
/// newer. Among releases of equal precedence the first one wins.
pub fn highest_release_above<'a>(
    current: &semver::Version,
    versions: impl IntoIterator<Item = &'a Version>,
) -> Option<&'a Version> {
    versions
        .into_iter()
        .filter(|v| v.is_released() && newer(&v.version_number, current))
        .fold(None, |best: Option<&'a Version>, v| match best {
            Some(b) if !newer(&v.version_number, &b.version_number) => Some(b),
            _ => Some(v),
        })
}

/// Most urgent release type among released versions in `(current, target]`.
pub fn priority_between<'a>(
    current: &semver::Version,
    target: &semver::Version,
    versions: impl IntoIterator<Item = &'a Version>,
) -> Option<UpdatePriority> {
    versions
        .into_iter()
        .filter(|v| {
            v.is_released()
                && newer(&v.version_number, current)
                && !newer(&v.version_number, target)
        })
        .map(|v| v.release_type.priority())
        .max()
}

fn newer(candidate: &semver::Version, than: &semver::Version) -> bool {
    candidate.cmp_precedence(than) == Ordering::Greater
}

/// Check `endpoint_id`'s installed `current` version of `product_id`
/// against `versions`, folding in the previous detection if there is one.
pub fn detect(
    endpoint_id: &str,
    product_id: &str,
    current: &semver::Version,
    versions: &[Version],
    existing: Option<&UpdateDetection>,
    now: Timestamp,
) -> Detection {
    let candidates = versions.iter().filter(|v| v.product_id == product_id);
    let Some(available) = highest_release_above(current, candidates.clone()) else {
        debug!(endpoint = endpoint_id, product = product_id, %current, "endpoint up to date");
        return Detection::UpToDate;
    };
    let available = available.version_number.clone();
    let priority = priority_between(current, &available, candidates)
        .unwrap_or(UpdatePriority::Low);

    let fresh = |revision: u64| UpdateDetection {
        endpoint_id: endpoint_id.to_string(),
        product_id: product_id.to_string(),
        current_version: current.clone(),
        available_version: available.clone(),
        priority,
        detected_at: now,
        last_checked_at: now,
        revision,
    };

    let Some(existing) = existing else {
        info!(endpoint = endpoint_id, product = product_id, %current, %available, %priority, "update detected");
        return Detection::New(fresh(0));
    };

    if existing.current_version != *current {
        info!(endpoint = endpoint_id, product = product_id, %current, %available, "installed version changed");
        return Detection::New(fresh(existing.revision));
    }

    if existing.available_version == available {
        let mut refreshed = existing.clone();
        refreshed.last_checked_at = now;
        refreshed.priority = priority;
        return Detection::Refreshed(refreshed);
    }

    info!(
        endpoint = endpoint_id,
        product = product_id,
        previous = %existing.available_version,
        %available,
        "detected update superseded"
    );
    Detection::Superseded {
        previous: existing.available_version.clone(),
        detection: fresh(existing.revision),
    }
}
