//! Error kinds returned by the release and rollout engine.
//!
//! Every rejection is synchronous and leaves the evaluated records exactly
//! as they were. Variants carry enough context (state names, version
//! numbers, block reasons) for a caller to render a message without
//! re-deriving anything.

use std::fmt;

use thiserror::Error;

use crate::types::{ProductId, RolloutId, RolloutStatus, Timestamp, ValidationStatus, VersionState};

/// Result type alias for engine operations.
pub type ReleaseResult<T> = Result<T, ReleaseError>;

/// Rollout initiation preconditions, checked in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precondition {
    /// (a) both versions exist for the product.
    VersionsExist,
    /// (b) the target version is released.
    TargetReleased,
    /// (c) source and target differ.
    DistinctVersions,
    /// (d) the upgrade path is not blocked.
    PathNotBlocked,
}

impl Precondition {
    /// Single-letter code (`a`..`d`).
    pub fn code(self) -> char {
        match self {
            Precondition::VersionsExist => 'a',
            Precondition::TargetReleased => 'b',
            Precondition::DistinctVersions => 'c',
            Precondition::PathNotBlocked => 'd',
        }
    }
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Precondition::VersionsExist => "versions exist",
            Precondition::TargetReleased => "target released",
            Precondition::DistinctVersions => "distinct versions",
            Precondition::PathNotBlocked => "path not blocked",
        };
        write!(f, "{}: {label}", self.code())
    }
}

/// Errors produced by the lifecycle, compatibility, path, detection and
/// rollout components.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReleaseError {
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: VersionState, to: VersionState },

    #[error("`{field}` cannot be edited while the version is {state}")]
    ImmutableInCurrentState {
        state: VersionState,
        field: &'static str,
    },

    #[error("approval requires an approver identity")]
    MissingApprover,

    #[error("release date {release_date} is in the future; schedule the release instead")]
    ReleaseDateInFuture { release_date: Timestamp },

    #[error(
        "version {version} cannot be released: compatibility is {}",
        .status.map_or("not recorded", |s| s.as_str())
    )]
    CompatibilityNotValidated {
        version: semver::Version,
        status: Option<ValidationStatus>,
    },

    #[error("minimum server version {min} is greater than maximum {max}")]
    InvalidBoundRange {
        min: semver::Version,
        max: semver::Version,
    },

    #[error("no upgrade path registered for {product} {from} -> {to}")]
    PathNotFound {
        product: ProductId,
        from: semver::Version,
        to: semver::Version,
    },

    #[error("upgrade {from} -> {to} of {product} is blocked: {reason}")]
    UpgradeBlocked {
        product: ProductId,
        from: semver::Version,
        to: semver::Version,
        reason: String,
    },

    #[error("blocking an upgrade path requires a non-empty reason")]
    EmptyBlockReason,

    #[error("invalid upgrade path {from} -> {to}: {detail}")]
    InvalidUpgradePath {
        from: semver::Version,
        to: semver::Version,
        detail: String,
    },

    #[error("rollout precondition ({precondition}) failed: {detail}")]
    RolloutPreconditionFailed {
        precondition: Precondition,
        detail: String,
    },

    #[error("rollout {id} is already {status}")]
    RolloutAlreadyTerminal { id: RolloutId, status: RolloutStatus },

    #[error("invalid rollout transition: {from} -> {to}")]
    InvalidRolloutTransition {
        from: RolloutStatus,
        to: RolloutStatus,
    },

    #[error("progress {0} is outside 0..=100")]
    InvalidProgress(u32),

    #[error("marking a rollout failed requires an error message")]
    MissingErrorMessage,

    #[error("invalid version number `{input}`: {detail}")]
    InvalidVersion { input: String, detail: String },

    #[error("product {0} is inactive")]
    ProductInactive(ProductId),

    #[error("invalid {kind} id `{value}`: must be non-empty and contain no `{}`", KEY_SEPARATOR)]
    InvalidIdentifier { kind: &'static str, value: String },
}

impl ReleaseError {
    /// Soft errors are informational and do not block the caller.
    pub fn is_soft(&self) -> bool {
        matches!(self, ReleaseError::PathNotFound { .. })
    }

    /// The rollout precondition this error violates, if any.
    pub fn precondition(&self) -> Option<Precondition> {
        match self {
            ReleaseError::RolloutPreconditionFailed { precondition, .. } => Some(*precondition),
            ReleaseError::UpgradeBlocked { .. } => Some(Precondition::PathNotBlocked),
            _ => None,
        }
    }
}

/// Joins the parts of composite record keys (`{product}/{version}`,
/// `{endpoint}/{product}`).
pub const KEY_SEPARATOR: char = '/';

/// Check a product or endpoint id before it becomes part of a composite
/// key. `kind` names the id in the error.
pub fn check_id(kind: &'static str, value: &str) -> ReleaseResult<()> {
    if value.trim().is_empty() || value.contains(KEY_SEPARATOR) {
        return Err(ReleaseError::InvalidIdentifier {
            kind,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Parse a semantic version number, mapping failures into
/// [`ReleaseError::InvalidVersion`].
pub fn parse_version(input: &str) -> ReleaseResult<semver::Version> {
    semver::Version::parse(input.trim()).map_err(|e| ReleaseError::InvalidVersion {
        input: input.to_string(),
        detail: e.to_string(),
    })
}

/// A string did not name any variant of a closed enum.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} `{value}`")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}
