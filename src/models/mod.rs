//! Domain models for auto-mode.
//!
//! # Core Concepts
//!
//! - [`Feature`]: a unit of backlog work with a status, a priority and a list of
//!   dependencies on other features of the same project.
//! - [`LoopKey`]: a `(project, worktree branch)` pair. Each key is scheduled by its
//!   own auto-loop, independent of every other key.
//! - [`ProjectStatus`] / [`GlobalStatus`]: read-only views over the running loops,
//!   used by the HTTP surface and dashboards.

mod auto_mode;
mod feature;

pub use auto_mode::*;
pub use feature::*;
