use anyhow::{bail, Result};
use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use gh_syncbot::cache::ProfileCache;
use gh_syncbot::db;
use gh_syncbot::github::model::{RestIssue, RestLabel, RestUser};
use gh_syncbot::github::GithubService;
use gh_syncbot::model::{LinkedPullRequest, PullRequestState};
use gh_syncbot::sync::{self, SyncOptions};

// A single connection keeps every query on the same in-memory database.
async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

#[derive(Default)]
struct ScriptedGithub {
    issues: HashMap<String, Vec<RestIssue>>,
    failing: HashSet<String>,
    linked: HashMap<(String, i64), Vec<LinkedPullRequest>>,
    list_calls: Mutex<Vec<String>>,
}

impl ScriptedGithub {
    fn with_issues(repo: &str, issues: Vec<RestIssue>) -> Self {
        let mut scripted = Self::default();
        scripted.issues.insert(repo.to_string(), issues);
        scripted
    }

    fn add_linked(&mut self, repo: &str, issue_number: i64, prs: Vec<LinkedPullRequest>) {
        self.linked.insert((repo.to_string(), issue_number), prs);
    }

    fn list_calls(&self) -> Vec<String> {
        self.list_calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl GithubService for ScriptedGithub {
    async fn list_issues(&self, owner: &str, repo: &str) -> Result<Vec<RestIssue>> {
        let key = format!("{}/{}", owner, repo);
        self.list_calls.lock().unwrap().push(key.clone());
        if self.failing.contains(&key) {
            bail!("scripted failure for {}", key);
        }
        Ok(self.issues.get(&key).cloned().unwrap_or_default())
    }

    async fn linked_pull_requests(
        &self,
        owner: &str,
        repo: &str,
        issue_number: i64,
    ) -> Option<Vec<LinkedPullRequest>> {
        self.linked
            .get(&(format!("{}/{}", owner, repo), issue_number))
            .cloned()
    }
}

fn rest_issue(id: i64, number: i64, state: &str, minutes_ago: i64) -> RestIssue {
    RestIssue {
        id,
        number,
        title: format!("Issue #{}", number),
        state: state.into(),
        comments: 2,
        created_at: Utc::now() - Duration::minutes(minutes_ago),
        updated_at: Utc::now() - Duration::minutes(minutes_ago),
        closed_at: None,
        labels: vec![RestLabel { name: "bug".into() }],
        assignees: vec![],
        user: Some(RestUser {
            login: "octocat".into(),
            avatar_url: Some("https://avatars.example/octocat".into()),
        }),
        pull_request: None,
    }
}

fn linked_pr(number: i64, state: PullRequestState) -> LinkedPullRequest {
    LinkedPullRequest {
        number,
        url: format!("https://github.com/acme/widgets/pull/{}", number),
        state,
    }
}

#[tokio::test]
async fn stale_store_fetches_writes_and_reads() {
    let pool = setup_pool().await;
    let repo_id = db::get_or_create_repository(&pool, "acme", "widgets")
        .await
        .unwrap();

    let mut github = ScriptedGithub::with_issues(
        "acme/widgets",
        vec![
            rest_issue(1001, 1, "open", 10),
            rest_issue(1002, 2, "closed", 30),
        ],
    );
    github.add_linked(
        "acme/widgets",
        1,
        vec![linked_pr(7, PullRequestState::Merged)],
    );
    let cache = ProfileCache::new(8, 60);

    let views = sync::fetch_issues(
        &pool,
        &github,
        &cache,
        &[repo_id],
        &SyncOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(views.len(), 2);
    // Most recently updated first.
    assert_eq!(views[0].number, 1);
    assert_eq!(views[0].labels, vec!["bug".to_string()]);
    assert_eq!(views[0].linked_prs, vec![linked_pr(7, PullRequestState::Merged)]);
    assert_eq!(views[1].number, 2);
    assert!(views[1].linked_prs.is_empty());
    assert_eq!(github.list_calls(), vec!["acme/widgets".to_string()]);
}

#[tokio::test]
async fn fresh_store_skips_remote_fetch() {
    let pool = setup_pool().await;
    let repo_id = db::get_or_create_repository(&pool, "acme", "widgets")
        .await
        .unwrap();
    let github =
        ScriptedGithub::with_issues("acme/widgets", vec![rest_issue(1001, 1, "open", 10)]);
    let cache = ProfileCache::new(8, 60);
    let opts = SyncOptions::default();

    sync::fetch_issues(&pool, &github, &cache, &[repo_id], &opts)
        .await
        .unwrap();
    let views = sync::fetch_issues(&pool, &github, &cache, &[repo_id], &opts)
        .await
        .unwrap();

    assert_eq!(views.len(), 1);
    // Second call served straight from the store.
    assert_eq!(github.list_calls().len(), 1);
}

#[tokio::test]
async fn resync_with_unchanged_upstream_only_moves_sync_stamp() {
    let pool = setup_pool().await;
    let repo_id = db::get_or_create_repository(&pool, "acme", "widgets")
        .await
        .unwrap();
    let mut github =
        ScriptedGithub::with_issues("acme/widgets", vec![rest_issue(1001, 1, "open", 10)]);
    github.add_linked(
        "acme/widgets",
        1,
        vec![linked_pr(7, PullRequestState::Open)],
    );
    let cache = ProfileCache::new(8, 60);
    let opts = SyncOptions::default();

    sync::fetch_issues(&pool, &github, &cache, &[repo_id], &opts)
        .await
        .unwrap();
    let before: (String, String, Option<String>, Option<String>, Option<String>) = sqlx::query_as(
        "SELECT title, state, labels, assignees, linked_prs FROM issues WHERE github_id = 1001",
    )
    .fetch_one(&pool)
    .await
    .unwrap();

    // Age the records past the threshold, then sync again.
    let stale_stamp = Utc::now() - Duration::minutes(120);
    sqlx::query("UPDATE issues SET last_synced_at = ?")
        .bind(stale_stamp)
        .execute(&pool)
        .await
        .unwrap();
    sync::fetch_issues(&pool, &github, &cache, &[repo_id], &opts)
        .await
        .unwrap();

    let after: (String, String, Option<String>, Option<String>, Option<String>) = sqlx::query_as(
        "SELECT title, state, labels, assignees, linked_prs FROM issues WHERE github_id = 1001",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(before, after);

    let stamp: chrono::DateTime<Utc> =
        sqlx::query_scalar("SELECT last_synced_at FROM issues WHERE github_id = 1001")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(stamp > stale_stamp);
    assert_eq!(github.list_calls().len(), 2);
}

#[tokio::test]
async fn failing_repository_does_not_abort_siblings() {
    let pool = setup_pool().await;
    let healthy = db::get_or_create_repository(&pool, "acme", "widgets")
        .await
        .unwrap();
    let broken = db::get_or_create_repository(&pool, "acme", "gadgets")
        .await
        .unwrap();

    let mut github =
        ScriptedGithub::with_issues("acme/widgets", vec![rest_issue(1001, 1, "open", 10)]);
    github.failing.insert("acme/gadgets".to_string());
    let cache = ProfileCache::new(8, 60);

    let views = sync::fetch_issues(
        &pool,
        &github,
        &cache,
        &[healthy, broken],
        &SyncOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(views.len(), 1);
    assert_eq!(views[0].repository, "acme/widgets");
    let mut calls = github.list_calls();
    calls.sort();
    assert_eq!(calls, vec!["acme/gadgets".to_string(), "acme/widgets".to_string()]);
}

#[tokio::test]
async fn pull_request_rows_are_skipped() {
    let pool = setup_pool().await;
    let repo_id = db::get_or_create_repository(&pool, "acme", "widgets")
        .await
        .unwrap();
    let mut pr_row = rest_issue(2001, 8, "open", 5);
    pr_row.pull_request = Some(serde_json::json!({
        "url": "https://api.github.com/repos/acme/widgets/pulls/8"
    }));
    let github = ScriptedGithub::with_issues(
        "acme/widgets",
        vec![rest_issue(1001, 1, "open", 10), pr_row],
    );
    let cache = ProfileCache::new(8, 60);

    let views = sync::fetch_issues(
        &pool,
        &github,
        &cache,
        &[repo_id],
        &SyncOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(views.len(), 1);
    assert_eq!(views[0].number, 1);
}

#[tokio::test]
async fn concurrent_fetches_both_resolve() {
    let pool = setup_pool().await;
    let repo_id = db::get_or_create_repository(&pool, "acme", "widgets")
        .await
        .unwrap();
    let github = ScriptedGithub::with_issues(
        "acme/widgets",
        vec![
            rest_issue(1001, 1, "open", 10),
            rest_issue(1002, 2, "open", 20),
        ],
    );
    let cache = ProfileCache::new(8, 60);
    let opts = SyncOptions::default();

    let repos = [repo_id];
    let (a, b) = tokio::join!(
        sync::fetch_issues(&pool, &github, &cache, &repos, &opts),
        sync::fetch_issues(&pool, &github, &cache, &repos, &opts),
    );
    assert!(a.is_ok());
    assert!(b.is_ok());

    // Both cycles wrote; upserts are keyed, so the store holds one row per
    // issue and the final read reflects the last completed write.
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM issues")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 2);
    let views = sync::fetch_issues(&pool, &github, &cache, &[repo_id], &opts)
        .await
        .unwrap();
    assert_eq!(views.len(), 2);
}
