//! relgrid-state — embedded state store for relgrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for products, versions, compatibility matrices, upgrade paths,
//! update detections and rollouts.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{product}/{version}`, `{product}/{from}->{to}`,
//! `{endpoint}/{product}`) enable prefix scans for related records.
//!
//! Every save is save-if-unchanged: the caller hands back the record with
//! the `revision` it loaded, and the write is rejected with
//! [`StateError::Conflict`] if the stored revision has moved on. A record
//! with revision 0 is an insert and fails with [`StateError::Duplicate`]
//! when its key is taken, which is how per-key uniqueness is enforced.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::{Record, StateStore};
