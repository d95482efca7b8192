//! Workspace data sync: staleness check, remote reconciliation, and the
//! read/transform path.
//!
//! Staleness is advisory. A stale store triggers a best-effort refresh, but
//! the read at the end always serves whatever the store holds; individual
//! fetch or write failures are logged and skipped, never surfaced to the
//! caller. Two overlapping sync cycles may race; the later write wins.

use crate::cache::ProfileCache;
use crate::config::Config;
use crate::db::{self, IssueRow, IssueUpsert, Pool, TrackedRepo};
use crate::db::model::AuthorUpsert;
use crate::github::model::RestIssue;
use crate::github::GithubService;
use crate::model::{IssueAuthor, IssueState, IssueView, LinkedPullRequest};
use anyhow::Result;
use futures::future::join_all;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub staleness_minutes: i64,
    pub page_size: i64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            staleness_minutes: 60,
            page_size: 100,
        }
    }
}

impl SyncOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            staleness_minutes: cfg.app.staleness_minutes,
            page_size: cfg.app.page_size,
        }
    }
}

/// Load the issues of a repository set, refreshing from GitHub first when
/// the cached records are stale.
///
/// All writes of a refresh settle before the read runs, so a caller never
/// observes its own batch half-written. Database read errors propagate;
/// remote failures do not.
#[instrument(skip_all)]
pub async fn fetch_issues(
    pool: &Pool,
    github: &dyn GithubService,
    cache: &ProfileCache,
    repo_ids: &[i64],
    opts: &SyncOptions,
) -> Result<Vec<IssueView>> {
    let freshness = db::sync_freshness(pool, repo_ids, opts.staleness_minutes).await?;
    if freshness.needs_sync {
        sync_repositories(pool, github, repo_ids).await;
    }

    let rows = db::list_issues_for_repos(pool, repo_ids, opts.page_size).await?;
    let mut views = Vec::with_capacity(rows.len());
    for mut row in rows {
        if let Some(username) = row.author_username.clone() {
            match row.author_avatar_url.as_deref() {
                Some(url) => cache.remember(&username, url),
                None => row.author_avatar_url = cache.avatar(&username),
            }
        }
        views.push(to_issue_view(&row));
    }
    Ok(views)
}

/// Refresh every repository in the set concurrently. Per-repository
/// failures are logged and do not abort siblings.
async fn sync_repositories(pool: &Pool, github: &dyn GithubService, repo_ids: &[i64]) {
    let repos = match db::repos_by_ids(pool, repo_ids).await {
        Ok(repos) => repos,
        Err(err) => {
            warn!(?err, "failed to resolve repository set; serving cached data");
            return;
        }
    };

    let tasks = repos.iter().map(|repo| sync_one_repo(pool, github, repo));
    for (repo, result) in repos.iter().zip(join_all(tasks).await) {
        if let Err(err) = result {
            warn!(?err, repo = %repo.full_name, "repository sync failed; serving cached data");
        }
    }
}

async fn sync_one_repo(pool: &Pool, github: &dyn GithubService, repo: &TrackedRepo) -> Result<()> {
    let issues = github.list_issues(&repo.owner, &repo.name).await?;

    let mut reconciled = 0usize;
    for issue in issues {
        // The REST issues listing also yields pull requests; skip those rows.
        if issue.pull_request.is_some() {
            continue;
        }
        let up = reconcile_issue(&issue);
        match db::upsert_issue(pool, repo.id, &up).await {
            Ok(_) => reconciled += 1,
            Err(err) => warn!(?err, number = up.number, "failed to persist issue"),
        }
    }

    // Linked-PR pass over open issues, one concurrent fetch per issue.
    let open = db::open_issue_refs(pool, repo.id).await?;
    let fetches = open
        .iter()
        .map(|issue| github.linked_pull_requests(&repo.owner, &repo.name, issue.number));
    let results = join_all(fetches).await;

    let mut linked = 0usize;
    for (issue, prs) in open.iter().zip(results) {
        // None means the query failed (already logged) or found nothing:
        // either way the stored list is left untouched.
        let Some(prs) = prs else { continue };
        match db::set_issue_linked_prs(pool, issue.github_id, &prs).await {
            Ok(()) => linked += 1,
            Err(err) => warn!(?err, number = issue.number, "failed to persist linked pull requests"),
        }
    }

    info!(
        repo = %repo.full_name,
        issues = reconciled,
        linked_pr_updates = linked,
        "repository synced"
    );
    Ok(())
}

/// Map a REST issue onto the persistence shape.
pub fn reconcile_issue(issue: &RestIssue) -> IssueUpsert {
    IssueUpsert {
        github_id: issue.id,
        number: issue.number,
        title: issue.title.clone(),
        state: IssueState::parse_state(&issue.state).unwrap_or(IssueState::Open),
        author: issue.user.as_ref().map(|user| AuthorUpsert {
            username: user.login.clone(),
            display_name: None,
            avatar_url: user.avatar_url.clone(),
        }),
        created_at: issue.created_at,
        updated_at: issue.updated_at,
        closed_at: issue.closed_at,
        labels: issue.labels.iter().map(|l| l.name.clone()).collect(),
        assignees: issue.assignees.iter().map(|a| a.login.clone()).collect(),
        comments_count: issue.comments,
    }
}

/// Pure row-to-view transform: missing collections normalize to empty,
/// missing avatars fall back to a computed placeholder, and the URL is
/// rebuilt from repository full name and issue number.
pub fn to_issue_view(row: &IssueRow) -> IssueView {
    IssueView {
        id: row.id,
        github_id: row.github_id,
        number: row.number,
        title: row.title.clone(),
        state: IssueState::parse_state(&row.state).unwrap_or(IssueState::Open),
        repository: row.repo_full_name.clone(),
        author: row.author_username.as_ref().map(|username| IssueAuthor {
            username: username.clone(),
            avatar_url: row
                .author_avatar_url
                .clone()
                .unwrap_or_else(|| fallback_avatar(username)),
        }),
        created_at: row.created_at,
        updated_at: row.updated_at,
        closed_at: row.closed_at,
        labels: parse_json_list(row.labels.as_deref()),
        assignees: parse_json_list(row.assignees.as_deref()),
        comments_count: row.comments_count,
        linked_prs: parse_linked_prs(row.linked_prs.as_deref()),
        url: format!(
            "https://github.com/{}/issues/{}",
            row.repo_full_name, row.number
        ),
    }
}

fn fallback_avatar(username: &str) -> String {
    format!("https://github.com/{}.png", username)
}

fn parse_json_list(raw: Option<&str>) -> Vec<String> {
    raw.and_then(|json| serde_json::from_str(json).ok())
        .unwrap_or_default()
}

fn parse_linked_prs(raw: Option<&str>) -> Vec<LinkedPullRequest> {
    raw.and_then(|json| serde_json::from_str(json).ok())
        .unwrap_or_default()
}
