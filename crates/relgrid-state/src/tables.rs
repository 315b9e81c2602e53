//! redb table definitions for the relgrid state store.
//!
//! Record tables use `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Value column type shared by every record table.
pub type RecordTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Products keyed by `{product_id}`.
pub const PRODUCTS: RecordTable = TableDefinition::new("products");

/// Versions keyed by `{product_id}/{version}`.
pub const VERSIONS: RecordTable = TableDefinition::new("versions");

/// Compatibility matrices keyed by `{product_id}/{version}`.
pub const COMPATIBILITY: RecordTable = TableDefinition::new("compatibility");

/// Upgrade paths keyed by `{product_id}/{from}->{to}`.
pub const UPGRADE_PATHS: RecordTable = TableDefinition::new("upgrade_paths");

/// Update detections keyed by `{endpoint_id}/{product_id}`.
pub const DETECTIONS: RecordTable = TableDefinition::new("detections");

/// Rollouts keyed by `{rollout_id}`.
pub const ROLLOUTS: RecordTable = TableDefinition::new("rollouts");

/// Non-terminal rollout id keyed by `{endpoint_id}/{product_id}`.
pub const ACTIVE_ROLLOUTS: TableDefinition<&str, &str> = TableDefinition::new("active_rollouts");
