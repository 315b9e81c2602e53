//! relgrid-core — records, error kinds and configuration shared by the
//! relgrid release and rollout engine.

pub mod config;
pub mod error;
pub mod types;

pub use config::{MissingPathPolicy, RelgridConfig};
pub use error::{
    KEY_SEPARATOR, Precondition, ReleaseError, ReleaseResult, UnknownVariant, check_id,
    parse_version,
};
pub use types::*;
