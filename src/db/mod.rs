//! Database module: entity models and SQL repositories.
//!
//! Split into two submodules:
//! - `model`: typed slices of rows returned by repository queries.
//! - `repo`: SQL-only functions that map rows into those slices.
//!
//! External modules should import from `gh_syncbot::db`; the repository
//! API and commonly used models are re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{IssueRow, IssueUpsert, OpenIssueRef, SyncFreshness, TrackedRepo};
