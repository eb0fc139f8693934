//! Domain models for RocketWarden.
//!
//! # Core Concepts
//!
//! ## Coordination
//!
//! - [`Session`]: A bounded period during which one agent works on a project.
//!   Sessions end explicitly or are swept once they go quiet for too long.
//! - [`Claim`]: A session's registered interest in a path pattern. Hard claims
//!   grant exclusive editing rights; soft claims are advisory. Claims are never
//!   deleted, only released, so the full audit history survives.
//!
//! ## Workflow
//!
//! - [`Intent`]: A proposed unit of work moving from `pending` through approval
//!   and build to a terminal state.
//!
//! ## Evidence
//!
//! - [`EvidenceManifest`]: The files produced by one build, hash-chained to the
//!   previous manifest of the same project.
//! - [`ActivityEvent`]: Structured event published to the activity bulletin.

mod activity;
mod claim;
mod intent;
mod manifest;
mod session;

pub use activity::*;
pub use claim::*;
pub use intent::*;
pub use manifest::*;
pub use session::*;
