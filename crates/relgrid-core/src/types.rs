//! Domain records shared across relgrid crates.
//!
//! Every record is a plain serializable struct. The engine crates evaluate
//! and mutate them; `relgrid-state` persists them as JSON. Records that the
//! store guards with save-if-unchanged carry a `revision` counter which the
//! engine never touches.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{KEY_SEPARATOR, UnknownVariant};

/// Unique, immutable product identifier.
pub type ProductId = String;

/// Identifier of a deployed product instance at a customer site.
pub type EndpointId = String;

/// Generated rollout identifier (UUID v4, hyphenated).
pub type RolloutId = String;

/// Wall-clock instant, always UTC.
pub type Timestamp = DateTime<Utc>;

/// Declares a closed, snake_case-named enum with `ALL`, `as_str`,
/// `Display` and `FromStr`.
macro_rules! named_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

// ── Product ───────────────────────────────────────────────────────

named_enum! {
    /// Whether a product is deployed as a server or a client.
    ProductKind {
        Server => "server",
        Client => "client",
    }
}

/// A tracked software product.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub kind: ProductKind,
    /// Cleared on soft delete. Products are never removed while versions
    /// reference them.
    pub active: bool,
    pub created_at: Timestamp,
    #[serde(default)]
    pub revision: u64,
}

impl Product {
    pub fn new(id: &str, name: &str, kind: ProductKind, now: Timestamp) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            active: true,
            created_at: now,
            revision: 0,
        }
    }
}

// ── Version ───────────────────────────────────────────────────────

named_enum! {
    /// Publication status of a version.
    ///
    /// Declaration order is the lifecycle order.
    VersionState {
        Draft => "draft",
        PendingReview => "pending_review",
        Approved => "approved",
        Released => "released",
        Deprecated => "deprecated",
        Eol => "eol",
    }
}

named_enum! {
    /// Nature of a release; drives update priority.
    ReleaseType {
        Security => "security",
        Feature => "feature",
        Maintenance => "maintenance",
        Major => "major",
    }
}

impl ReleaseType {
    /// Urgency of installing a release of this type.
    pub fn priority(self) -> UpdatePriority {
        match self {
            ReleaseType::Security => UpdatePriority::Critical,
            ReleaseType::Major => UpdatePriority::High,
            ReleaseType::Feature => UpdatePriority::Normal,
            ReleaseType::Maintenance => UpdatePriority::Low,
        }
    }
}

/// Declared server-version bounds, kept as entered. Parsing happens in the
/// compatibility validator so that malformed input can be reported.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerBounds {
    pub min: Option<String>,
    pub max: Option<String>,
    pub recommended: Option<String>,
}

impl ServerBounds {
    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none() && self.recommended.is_none()
    }
}

/// One version of a product.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Version {
    pub product_id: ProductId,
    pub version_number: semver::Version,
    pub state: VersionState,
    pub release_type: ReleaseType,
    pub release_date: Timestamp,
    pub eol_date: Option<Timestamp>,
    pub server_bounds: ServerBounds,
    pub notes: Option<String>,
    /// Set only on the transition into `approved`.
    pub approved_by: Option<String>,
    pub approved_at: Option<Timestamp>,
    pub released_at: Option<Timestamp>,
    pub deprecated_at: Option<Timestamp>,
    pub created_at: Timestamp,
    #[serde(default)]
    pub revision: u64,
}

impl Version {
    /// A fresh `draft` version.
    pub fn new(
        product_id: &str,
        version_number: semver::Version,
        release_type: ReleaseType,
        release_date: Timestamp,
        now: Timestamp,
    ) -> Self {
        Self {
            product_id: product_id.to_string(),
            version_number,
            state: VersionState::Draft,
            release_type,
            release_date,
            eol_date: None,
            server_bounds: ServerBounds::default(),
            notes: None,
            approved_by: None,
            approved_at: None,
            released_at: None,
            deprecated_at: None,
            created_at: now,
            revision: 0,
        }
    }

    /// Composite key `{product}/{version}`.
    pub fn table_key(&self) -> String {
        version_key(&self.product_id, &self.version_number)
    }

    pub fn is_released(&self) -> bool {
        self.state == VersionState::Released
    }
}

/// Build the `{product}/{version}` key shared by versions and matrices.
pub fn version_key(product_id: &str, version: &semver::Version) -> String {
    format!("{product_id}{KEY_SEPARATOR}{version}")
}

// ── Compatibility ─────────────────────────────────────────────────

named_enum! {
    /// Outcome of the last compatibility validation.
    ValidationStatus {
        Pending => "pending",
        Passed => "passed",
        Failed => "failed",
        Skipped => "skipped",
    }
}

impl ValidationStatus {
    /// Whether a version with this status may be released.
    pub fn permits_release(self) -> bool {
        matches!(self, ValidationStatus::Passed | ValidationStatus::Skipped)
    }
}

/// Recorded compatibility bounds and validation outcome for one version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompatibilityMatrix {
    pub product_id: ProductId,
    pub version_number: semver::Version,
    pub status: ValidationStatus,
    /// Version numbers declared incompatible, as entered.
    pub incompatible_versions: Vec<String>,
    pub errors: Vec<String>,
    pub validated_at: Option<Timestamp>,
    pub validated_by: Option<String>,
    #[serde(default)]
    pub revision: u64,
}

impl CompatibilityMatrix {
    /// An unvalidated matrix, created alongside its version.
    pub fn pending(product_id: &str, version_number: semver::Version) -> Self {
        Self {
            product_id: product_id.to_string(),
            version_number,
            status: ValidationStatus::Pending,
            incompatible_versions: Vec::new(),
            errors: Vec::new(),
            validated_at: None,
            validated_by: None,
            revision: 0,
        }
    }

    pub fn table_key(&self) -> String {
        version_key(&self.product_id, &self.version_number)
    }
}

// ── Upgrade paths ─────────────────────────────────────────────────

named_enum! {
    /// How an upgrade between two versions proceeds.
    PathType {
        Direct => "direct",
        MultiStep => "multi_step",
        Blocked => "blocked",
    }
}

/// Registered permission record for one (from, to) pair of a product.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpgradePath {
    pub product_id: ProductId,
    pub from_version: semver::Version,
    pub to_version: semver::Version,
    pub path_type: PathType,
    /// Ordered intermediate versions; empty unless `multi_step`.
    pub steps: Vec<semver::Version>,
    /// Overrides `path_type` without replacing it.
    pub is_blocked: bool,
    pub block_reason: Option<String>,
    pub updated_at: Timestamp,
    pub updated_by: String,
    #[serde(default)]
    pub revision: u64,
}

impl UpgradePath {
    /// An unblocked direct path.
    pub fn direct(
        product_id: &str,
        from_version: semver::Version,
        to_version: semver::Version,
        actor: &str,
        now: Timestamp,
    ) -> Self {
        Self {
            product_id: product_id.to_string(),
            from_version,
            to_version,
            path_type: PathType::Direct,
            steps: Vec::new(),
            is_blocked: false,
            block_reason: None,
            updated_at: now,
            updated_by: actor.to_string(),
            revision: 0,
        }
    }

    /// Composite key `{product}/{from}->{to}`.
    pub fn table_key(&self) -> String {
        path_key(&self.product_id, &self.from_version, &self.to_version)
    }

    /// The path type callers should act on: `blocked` whenever the block
    /// flag is set, regardless of the registered type.
    pub fn effective_type(&self) -> PathType {
        if self.is_blocked {
            PathType::Blocked
        } else {
            self.path_type
        }
    }
}

pub fn path_key(product_id: &str, from: &semver::Version, to: &semver::Version) -> String {
    format!("{product_id}{KEY_SEPARATOR}{from}->{to}")
}

// ── Update detection ──────────────────────────────────────────────

named_enum! {
    /// Urgency of an available update. Ordered from least to most urgent.
    #[derive(PartialOrd, Ord)]
    UpdatePriority {
        Low => "low",
        Normal => "normal",
        High => "high",
        Critical => "critical",
    }
}

/// Latest known update for one endpoint's installation of a product.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateDetection {
    pub endpoint_id: EndpointId,
    pub product_id: ProductId,
    pub current_version: semver::Version,
    pub available_version: semver::Version,
    pub priority: UpdatePriority,
    /// Fixed at the first detection of this (current, available) pair.
    pub detected_at: Timestamp,
    pub last_checked_at: Timestamp,
    #[serde(default)]
    pub revision: u64,
}

impl UpdateDetection {
    pub fn table_key(&self) -> String {
        endpoint_key(&self.endpoint_id, &self.product_id)
    }
}

/// Build the `{endpoint}/{product}` key used by detections and the
/// active-rollout index.
pub fn endpoint_key(endpoint_id: &str, product_id: &str) -> String {
    format!("{endpoint_id}{KEY_SEPARATOR}{product_id}")
}

// ── Rollouts ──────────────────────────────────────────────────────

named_enum! {
    /// Status of a single endpoint rollout.
    RolloutStatus {
        Pending => "pending",
        InProgress => "in_progress",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

impl RolloutStatus {
    /// Terminal rollouts are immutable.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RolloutStatus::Completed | RolloutStatus::Failed | RolloutStatus::Cancelled
        )
    }
}

/// What the upgrade path table said when the rollout was initiated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PathCheck {
    /// An explicit, unblocked path was registered.
    Verified {
        path_type: PathType,
        steps: Vec<semver::Version>,
    },
    /// No path was registered for the pair; the rollout proceeds anyway.
    Unverified,
}

/// The tracked process of moving one endpoint between two versions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateRollout {
    pub id: RolloutId,
    pub endpoint_id: EndpointId,
    pub product_id: ProductId,
    pub from_version: semver::Version,
    pub to_version: semver::Version,
    pub status: RolloutStatus,
    /// Percent complete, 0..=100.
    pub progress: u8,
    pub path_check: PathCheck,
    pub priority: Option<UpdatePriority>,
    pub initiated_by: String,
    pub initiated_at: Timestamp,
    pub started_at: Option<Timestamp>,
    /// At most one of the three terminal stamps is ever set.
    pub completed_at: Option<Timestamp>,
    pub failed_at: Option<Timestamp>,
    pub cancelled_at: Option<Timestamp>,
    /// Present exactly when `status` is `failed`.
    pub error_message: Option<String>,
    #[serde(default)]
    pub revision: u64,
}

impl UpdateRollout {
    /// Key of the (endpoint, product) slot this rollout occupies while
    /// non-terminal.
    pub fn active_key(&self) -> String {
        endpoint_key(&self.endpoint_id, &self.product_id)
    }
}

// ── Audit ─────────────────────────────────────────────────────────

named_enum! {
    /// Kind of record an audit entry refers to.
    ResourceKind {
        Version => "version",
        CompatibilityMatrix => "compatibility_matrix",
        UpgradePath => "upgrade_path",
        Rollout => "rollout",
    }
}

/// Outcome of an accepted transition, handed back to the caller for its
/// audit sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub actor: String,
    pub at: Timestamp,
    pub resource: ResourceKind,
    pub resource_id: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditEntry {
    pub fn new(
        actor: &str,
        at: Timestamp,
        resource: ResourceKind,
        resource_id: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            actor: actor.to_string(),
            at,
            resource,
            resource_id: resource_id.into(),
            action: action.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_names_roundtrip_through_from_str() {
        for state in VersionState::ALL {
            assert_eq!(state.as_str().parse::<VersionState>().unwrap(), *state);
        }
        assert_eq!("in_progress".parse::<RolloutStatus>().unwrap(), RolloutStatus::InProgress);
        assert!("shipped".parse::<VersionState>().is_err());
    }

    #[test]
    fn serde_names_match_display() {
        let json = serde_json::to_string(&VersionState::PendingReview).unwrap();
        assert_eq!(json, "\"pending_review\"");
        let json = serde_json::to_string(&PathType::MultiStep).unwrap();
        assert_eq!(json, "\"multi_step\"");
    }

    #[test]
    fn blocked_flag_overrides_path_type() {
        let now = Utc::now();
        let mut path = UpgradePath::direct(
            "p1",
            semver::Version::new(1, 0, 0),
            semver::Version::new(2, 0, 0),
            "ops",
            now,
        );
        assert_eq!(path.effective_type(), PathType::Direct);
        path.is_blocked = true;
        assert_eq!(path.effective_type(), PathType::Blocked);
        assert_eq!(path.path_type, PathType::Direct);
        assert_eq!(path.table_key(), "p1/1.0.0->2.0.0");
    }

    #[test]
    fn priority_ordering() {
        assert!(UpdatePriority::Critical > UpdatePriority::High);
        assert!(UpdatePriority::Normal > UpdatePriority::Low);
        assert_eq!(ReleaseType::Security.priority(), UpdatePriority::Critical);
    }

    #[test]
    fn terminal_statuses() {
        let terminal: Vec<_> = RolloutStatus::ALL
            .iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(terminal.len(), 3);
        assert!(!RolloutStatus::InProgress.is_terminal());
    }
}
