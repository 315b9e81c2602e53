//! relgrid release engine — the decision rules around versions.
//!
//! All components are synchronous functions over explicitly supplied
//! records. They never perform I/O and never keep state between calls;
//! a rejected operation leaves its inputs untouched.
//!
//! # Components
//!
//! - **`lifecycle`** — version publication state machine (draft → eol)
//! - **`compat`** — server-version bound validation into a compatibility matrix
//! - **`paths`** — registered upgrade paths per product, resolution and blocking
//! - **`detect`** — available-update detection for an endpoint

pub mod compat;
pub mod detect;
pub mod lifecycle;
pub mod paths;

pub use compat::{CompatibilityInput, invalidate, validate};
pub use detect::{Detection, detect, highest_release_above};
pub use lifecycle::{ReleaseMode, TransitionContext, VersionEdit};
pub use paths::{PathTable, Resolution};
