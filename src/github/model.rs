//! Typed GitHub API responses (REST issue listing and GraphQL timeline).

use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct RestUser {
    pub login: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestLabel {
    pub name: String,
}

/// Issue as returned by `GET /repos/{owner}/{repo}/issues`. The endpoint
/// also yields pull requests; those rows carry a `pull_request` key and are
/// skipped during reconciliation.
#[derive(Debug, Clone, Deserialize)]
pub struct RestIssue {
    pub id: i64,
    pub number: i64,
    pub title: String,
    pub state: String,
    #[serde(default)]
    pub comments: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: Vec<RestLabel>,
    #[serde(default)]
    pub assignees: Vec<RestUser>,
    pub user: Option<RestUser>,
    pub pull_request: Option<serde_json::Value>,
}

/// Standard GraphQL response envelope.
#[derive(Debug, Deserialize)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlError {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct TimelineData {
    pub repository: Option<TimelineRepository>,
}

#[derive(Debug, Deserialize)]
pub struct TimelineRepository {
    pub issue: Option<TimelineIssue>,
}

#[derive(Debug, Deserialize)]
pub struct TimelineIssue {
    #[serde(rename = "timelineItems", default)]
    pub timeline_items: TimelineItems,
}

#[derive(Debug, Default, Deserialize)]
pub struct TimelineItems {
    #[serde(default)]
    pub nodes: Vec<TimelineNode>,
}

/// One timeline event. Cross-reference events carry `source`, connect
/// events carry `subject`; both point at the referencing item.
#[derive(Debug, Default, Deserialize)]
pub struct TimelineNode {
    pub source: Option<TimelineRef>,
    pub subject: Option<TimelineRef>,
}

#[derive(Debug, Deserialize)]
pub struct TimelineRef {
    #[serde(rename = "__typename")]
    pub typename: Option<String>,
    pub number: Option<i64>,
    pub url: Option<String>,
    pub state: Option<String>,
    pub merged: Option<bool>,
}
