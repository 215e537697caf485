//! Pull classification and conflict staging.
//!
//! The conflict subsystem is responsible for:
//! 1. **Planning** -- comparing a remote snapshot against the sandbox and
//!    applying deletions and new files immediately.
//! 2. **Staging** -- applying caller-chosen resolutions for the conflicts a
//!    pull withheld.
//!
//! Content is never merged automatically. A file that differs on both sides
//! stays untouched until a resolution names a winner.

pub mod planner;
pub mod stager;

pub use planner::SyncPlanner;
pub use stager::ConflictStager;
