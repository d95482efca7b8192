use chrono::{Duration, Utc};
use gh_syncbot::db;
use gh_syncbot::db::IssueUpsert;
use gh_syncbot::model::{IssueState, LinkedPullRequest, PullRequestState};
use gh_syncbot::sync;

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

fn issue(github_id: i64, number: i64, minutes_ago: i64) -> IssueUpsert {
    IssueUpsert {
        github_id,
        number,
        title: format!("Issue #{}", number),
        state: IssueState::Open,
        author: None,
        created_at: Utc::now() - Duration::minutes(minutes_ago),
        updated_at: Utc::now() - Duration::minutes(minutes_ago),
        closed_at: None,
        labels: vec![],
        assignees: vec![],
        comments_count: 0,
    }
}

#[tokio::test]
async fn empty_repo_set_needs_no_sync() {
    let pool = setup_pool().await;
    let freshness = db::sync_freshness(&pool, &[], 60).await.unwrap();
    assert!(!freshness.needs_sync);
    assert!(freshness.oldest.is_none());
}

#[tokio::test]
async fn repo_without_records_needs_sync() {
    let pool = setup_pool().await;
    let repo_id = db::get_or_create_repository(&pool, "acme", "widgets")
        .await
        .unwrap();
    let freshness = db::sync_freshness(&pool, &[repo_id], 60).await.unwrap();
    assert!(freshness.needs_sync);
}

#[tokio::test]
async fn any_repo_missing_records_forces_sync() {
    let pool = setup_pool().await;
    let covered = db::get_or_create_repository(&pool, "acme", "widgets")
        .await
        .unwrap();
    let uncovered = db::get_or_create_repository(&pool, "acme", "gadgets")
        .await
        .unwrap();
    db::upsert_issue(&pool, covered, &issue(1, 1, 5)).await.unwrap();

    let freshness = db::sync_freshness(&pool, &[covered, uncovered], 60)
        .await
        .unwrap();
    assert!(freshness.needs_sync);
}

#[tokio::test]
async fn fresh_records_need_no_sync() {
    let pool = setup_pool().await;
    let repo_id = db::get_or_create_repository(&pool, "acme", "widgets")
        .await
        .unwrap();
    db::upsert_issue(&pool, repo_id, &issue(1, 1, 5)).await.unwrap();

    let freshness = db::sync_freshness(&pool, &[repo_id], 60).await.unwrap();
    assert!(!freshness.needs_sync);
    assert!(freshness.oldest.is_some());
}

#[tokio::test]
async fn records_past_threshold_need_sync() {
    let pool = setup_pool().await;
    let repo_id = db::get_or_create_repository(&pool, "acme", "widgets")
        .await
        .unwrap();
    db::upsert_issue(&pool, repo_id, &issue(1, 1, 5)).await.unwrap();

    let stale_stamp = Utc::now() - Duration::minutes(90);
    sqlx::query("UPDATE issues SET last_synced_at = ?")
        .bind(stale_stamp)
        .execute(&pool)
        .await
        .unwrap();

    let freshness = db::sync_freshness(&pool, &[repo_id], 60).await.unwrap();
    assert!(freshness.needs_sync);

    // The same stamp is fresh under a more generous threshold.
    let freshness = db::sync_freshness(&pool, &[repo_id], 120).await.unwrap();
    assert!(!freshness.needs_sync);
}

#[tokio::test]
async fn never_synced_records_need_sync() {
    let pool = setup_pool().await;
    let repo_id = db::get_or_create_repository(&pool, "acme", "widgets")
        .await
        .unwrap();
    db::upsert_issue(&pool, repo_id, &issue(1, 1, 5)).await.unwrap();
    sqlx::query("UPDATE issues SET last_synced_at = NULL")
        .execute(&pool)
        .await
        .unwrap();

    let freshness = db::sync_freshness(&pool, &[repo_id], 60).await.unwrap();
    assert!(freshness.needs_sync);
}

#[tokio::test]
async fn linked_prs_round_trip_in_order() {
    let pool = setup_pool().await;
    let repo_id = db::get_or_create_repository(&pool, "acme", "widgets")
        .await
        .unwrap();
    db::upsert_issue(&pool, repo_id, &issue(1001, 1, 5)).await.unwrap();

    let prs = vec![
        LinkedPullRequest {
            number: 9,
            url: "https://github.com/acme/widgets/pull/9".into(),
            state: PullRequestState::Open,
        },
        LinkedPullRequest {
            number: 2,
            url: "https://github.com/acme/widgets/pull/2".into(),
            state: PullRequestState::Merged,
        },
        LinkedPullRequest {
            number: 5,
            url: "https://github.com/acme/widgets/pull/5".into(),
            state: PullRequestState::Closed,
        },
    ];
    db::set_issue_linked_prs(&pool, 1001, &prs).await.unwrap();

    let stored = db::issue_linked_prs(&pool, 1001).await.unwrap();
    assert_eq!(stored, Some(prs));
}

#[tokio::test]
async fn setting_linked_prs_on_unknown_issue_is_an_error() {
    let pool = setup_pool().await;
    assert!(db::set_issue_linked_prs(&pool, 404, &[]).await.is_err());
}

#[tokio::test]
async fn read_path_orders_by_update_and_caps() {
    let pool = setup_pool().await;
    let repo_id = db::get_or_create_repository(&pool, "acme", "widgets")
        .await
        .unwrap();
    db::upsert_issue(&pool, repo_id, &issue(1, 1, 30)).await.unwrap();
    db::upsert_issue(&pool, repo_id, &issue(2, 2, 10)).await.unwrap();
    db::upsert_issue(&pool, repo_id, &issue(3, 3, 20)).await.unwrap();

    let rows = db::list_issues_for_repos(&pool, &[repo_id], 2).await.unwrap();
    let numbers: Vec<i64> = rows.iter().map(|r| r.number).collect();
    assert_eq!(numbers, vec![2, 3]);
}

#[tokio::test]
async fn read_path_joins_author_metadata() {
    let pool = setup_pool().await;
    let repo_id = db::get_or_create_repository(&pool, "acme", "widgets")
        .await
        .unwrap();
    let mut up = issue(1, 1, 5);
    up.author = Some(gh_syncbot::db::model::AuthorUpsert {
        username: "octocat".into(),
        display_name: Some("The Octocat".into()),
        avatar_url: Some("https://avatars.example/octocat".into()),
    });
    db::upsert_issue(&pool, repo_id, &up).await.unwrap();

    let rows = db::list_issues_for_repos(&pool, &[repo_id], 100).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].author_username.as_deref(), Some("octocat"));
    assert_eq!(rows[0].repo_full_name, "acme/widgets");

    let view = sync::to_issue_view(&rows[0]);
    assert_eq!(
        view.author.unwrap().avatar_url,
        "https://avatars.example/octocat"
    );
    assert_eq!(view.url, "https://github.com/acme/widgets/issues/1");
}
