//! Compatibility validation — turns declared server-version bounds into a
//! recorded verdict.
//!
//! Validation never aborts the caller: parse failures and contradictory
//! bounds become error strings on a `failed` verdict. Re-running replaces
//! the previous verdict wholesale.

use std::cmp::Ordering;

use relgrid_core::{
    AuditEntry, CompatibilityMatrix, ReleaseError, ResourceKind, ServerBounds, Timestamp,
    ValidationStatus, Version, parse_version,
};
use tracing::{info, warn};

/// What gets validated for one version.
#[derive(Debug, Clone, Copy)]
pub struct CompatibilityInput<'a> {
    pub version_number: &'a semver::Version,
    pub bounds: &'a ServerBounds,
    pub incompatible_versions: &'a [String],
}

/// Status plus the errors that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub status: ValidationStatus,
    pub errors: Vec<String>,
}

/// Compute a verdict without touching any record.
pub fn evaluate(input: &CompatibilityInput<'_>) -> Verdict {
    let mut errors = Vec::new();

    let min = parse_bound("minimum", input.bounds.min.as_deref(), &mut errors);
    let max = parse_bound("maximum", input.bounds.max.as_deref(), &mut errors);
    let recommended = parse_bound("recommended", input.bounds.recommended.as_deref(), &mut errors);

    if let (Some(min), Some(max)) = (&min, &max) {
        if min.cmp_precedence(max) == Ordering::Greater {
            errors.push(
                ReleaseError::InvalidBoundRange {
                    min: min.clone(),
                    max: max.clone(),
                }
                .to_string(),
            );
        }
    }

    if let Some(rec) = &recommended {
        if min
            .as_ref()
            .is_some_and(|min| rec.cmp_precedence(min) == Ordering::Less)
        {
            errors.push(format!("recommended server version {rec} is below the minimum"));
        }
        if max
            .as_ref()
            .is_some_and(|max| rec.cmp_precedence(max) == Ordering::Greater)
        {
            errors.push(format!("recommended server version {rec} is above the maximum"));
        }
    }

    for entry in input.incompatible_versions {
        match parse_version(entry) {
            Ok(v) if v.cmp_precedence(input.version_number) == Ordering::Equal => {
                errors.push(format!("version {v} lists itself as incompatible"))
            }
            Ok(_) => {}
            Err(e) => errors.push(format!("incompatible entry: {e}")),
        }
    }

    let status = if !errors.is_empty() {
        ValidationStatus::Failed
    } else if input.bounds.is_empty() {
        ValidationStatus::Skipped
    } else {
        ValidationStatus::Passed
    };

    Verdict { status, errors }
}

fn parse_bound(
    label: &str,
    raw: Option<&str>,
    errors: &mut Vec<String>,
) -> Option<semver::Version> {
    let raw = raw?;
    match parse_version(raw) {
        Ok(v) => Some(v),
        Err(e) => {
            errors.push(format!("{label} server version: {e}"));
            None
        }
    }
}

/// Drop a recorded verdict after the bounds it judged have changed. The
/// matrix goes back to `pending` and must be validated again before the
/// version can be released.
pub fn invalidate(matrix: &mut CompatibilityMatrix, actor: &str, now: Timestamp) -> AuditEntry {
    let previous = matrix.status;
    matrix.status = ValidationStatus::Pending;
    matrix.errors.clear();
    matrix.validated_at = None;
    matrix.validated_by = None;

    info!(
        product = %matrix.product_id,
        version = %matrix.version_number,
        %previous,
        "compatibility verdict invalidated"
    );

    AuditEntry::new(
        actor,
        now,
        ResourceKind::CompatibilityMatrix,
        matrix.table_key(),
        "invalidate",
    )
    .with_detail(format!("{previous} -> pending"))
}

/// Validate `version`'s bounds against `incompatible_versions` and write
/// the verdict into `matrix`, replacing whatever it held.
pub fn validate(
    version: &Version,
    incompatible_versions: Vec<String>,
    matrix: &mut CompatibilityMatrix,
    actor: &str,
    now: Timestamp,
) -> AuditEntry {
    let verdict = evaluate(&CompatibilityInput {
        version_number: &version.version_number,
        bounds: &version.server_bounds,
        incompatible_versions: &incompatible_versions,
    });

    matrix.product_id = version.product_id.clone();
    matrix.version_number = version.version_number.clone();
    matrix.status = verdict.status;
    matrix.incompatible_versions = incompatible_versions;
    matrix.errors = verdict.errors;
    matrix.validated_at = Some(now);
    matrix.validated_by = Some(actor.to_string());

    if matrix.status == ValidationStatus::Failed {
        warn!(
            product = %matrix.product_id,
            version = %matrix.version_number,
            errors = matrix.errors.len(),
            "compatibility validation failed"
        );
    } else {
        info!(
            product = %matrix.product_id,
            version = %matrix.version_number,
            status = %matrix.status,
            "compatibility validated"
        );
    }

    AuditEntry::new(
        actor,
        now,
        ResourceKind::CompatibilityMatrix,
        matrix.table_key(),
        "validate",
    )
    .with_detail(matrix.status.as_str())
}
