//! Workspace data sync for GitHub repository analytics.
//!
//! The crate keeps a local SQLite cache of issue records for the
//! repositories tracked by each workspace, refreshes them from the GitHub
//! REST and GraphQL APIs when they go stale, and supervises long-running
//! "track a repository" backend jobs by polling the store until the
//! expected record appears.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod github;
pub mod model;
pub mod sync;
pub mod tracker;
