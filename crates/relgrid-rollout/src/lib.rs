//! relgrid rollouts — moving one endpoint from one version to another.
//!
//! This crate provides the per-endpoint rollout state machine. Initiation
//! checks its preconditions against the product's versions and registered
//! upgrade paths; afterwards progress reporting and status transitions are
//! independent operations until the rollout reaches a terminal state.
//!
//! # Components
//!
//! - **`policy`** — Rollout policy knobs (auto-completion, missing paths)
//! - **`orchestrator`** — Rollout state machine (initiate, start, progress, complete, fail, cancel)

pub mod orchestrator;
pub mod policy;

pub use orchestrator::{InitiateRequest, Initiation, RolloutOrchestrator};
pub use policy::RolloutPolicy;
