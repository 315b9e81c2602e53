//! Store-level failures, kept apart from engine rejections so a caller can
//! tell "the transition was refused" from "the write did not happen".

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    // redb backend failures, carried as rendered strings.
    #[error("cannot open state store: {0}")]
    Open(String),
    #[error("state store transaction: {0}")]
    Transaction(String),
    #[error("state store table: {0}")]
    Table(String),
    #[error("state store read: {0}")]
    Read(String),
    #[error("state store write: {0}")]
    Write(String),

    #[error("cannot encode record: {0}")]
    Serialize(String),
    #[error("stored record is corrupt: {0}")]
    Deserialize(String),

    /// A product or endpoint id that would make composite keys ambiguous.
    #[error("{kind} {key}: {source}")]
    InvalidKey {
        kind: &'static str,
        key: String,
        source: relgrid_core::ReleaseError,
    },

    /// An update named a revision but the record is gone.
    #[error("{0} does not exist")]
    NotFound(String),

    /// An insert (revision 0) hit an existing key.
    #[error("{0} already exists")]
    Duplicate(String),

    /// Save-if-unchanged lost the race; reload and retry.
    #[error("{key} changed underneath us (expected revision {expected}, found {found})")]
    Conflict {
        key: String,
        expected: u64,
        found: u64,
    },

    /// The (endpoint, product) slot is held by another non-terminal rollout.
    #[error("{key} already has an active rollout ({rollout_id})")]
    ActiveRolloutExists { key: String, rollout_id: String },
}
