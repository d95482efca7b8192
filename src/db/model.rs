//! Database entity and view models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business
//! logic should live in higher layers.

use crate::model::IssueState;
use chrono::{DateTime, Utc};

/// Result of a staleness check across a repository set.
///
/// `needs_sync` is advisory: callers still serve whatever the store holds
/// and refresh in the background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFreshness {
    pub needs_sync: bool,
    pub oldest: Option<DateTime<Utc>>,
}

/// Repository registered with a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedRepo {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub full_name: String,
}

/// Minimal issue slice used when fanning out linked-PR fetches.
#[derive(Debug, Clone, Copy)]
pub struct OpenIssueRef {
    pub id: i64,
    pub github_id: i64,
    pub number: i64,
}

/// Author fields written alongside an issue during reconciliation.
#[derive(Debug, Clone)]
pub struct AuthorUpsert {
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Reconciled issue metadata as written by the persistence layer.
#[derive(Debug, Clone)]
pub struct IssueUpsert {
    pub github_id: i64,
    pub number: i64,
    pub title: String,
    pub state: IssueState,
    pub author: Option<AuthorUpsert>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
    pub comments_count: i64,
}

/// Raw joined row returned by the read path, before view transformation.
#[derive(Debug, Clone)]
pub struct IssueRow {
    pub id: i64,
    pub github_id: i64,
    pub number: i64,
    pub title: String,
    pub state: String,
    pub repo_full_name: String,
    pub author_username: Option<String>,
    pub author_avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub labels: Option<String>,
    pub assignees: Option<String>,
    pub comments_count: i64,
    pub linked_prs: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}
