use super::model::{IssueRow, IssueUpsert, OpenIssueRef, SyncFreshness, TrackedRepo};
use crate::model::LinkedPullRequest;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use sqlx::SqlitePool;
use tracing::instrument;
use uuid::Uuid;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the
/// parent directory exists. In-memory URLs and other schemes pass through.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match path_part.strip_prefix("~/") {
        Some(rest) => match std::env::var("HOME") {
            Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
            Err(_) => path_part.to_string(),
        },
        None => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn create_workspace(pool: &Pool, name: &str) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO workspaces (id, name) VALUES (?, ?)")
        .bind(&id)
        .bind(name)
        .execute(pool)
        .await?;
    Ok(id)
}

/// Delete a workspace together with its repository memberships. Repository
/// and issue rows survive, since other workspaces may still reference them.
#[instrument(skip_all)]
pub async fn remove_workspace(pool: &Pool, workspace_id: &str) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM workspace_repos WHERE workspace_id = ?")
        .bind(workspace_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM workspaces WHERE id = ?")
        .bind(workspace_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn list_workspaces(pool: &Pool) -> Result<Vec<(String, String)>> {
    let rows = sqlx::query("SELECT id, name FROM workspaces ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| (row.get("id"), row.get("name")))
        .collect())
}

#[instrument(skip_all)]
pub async fn get_or_create_repository(pool: &Pool, owner: &str, name: &str) -> Result<i64> {
    let full_name = format!("{}/{}", owner, name);
    if let Some(id) =
        sqlx::query_scalar::<_, i64>("SELECT id FROM repositories WHERE full_name = ?")
            .bind(&full_name)
            .fetch_optional(pool)
            .await?
    {
        return Ok(id);
    }

    let rec = sqlx::query(
        "INSERT INTO repositories (owner, name, full_name) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(owner)
    .bind(name)
    .bind(&full_name)
    .fetch_one(pool)
    .await?;
    Ok(rec.get::<i64, _>("id"))
}

#[instrument(skip_all)]
pub async fn add_repo_to_workspace(pool: &Pool, workspace_id: &str, repository_id: i64) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO workspace_repos (workspace_id, repository_id) VALUES (?, ?)",
    )
    .bind(workspace_id)
    .bind(repository_id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn workspace_repos(pool: &Pool, workspace_id: &str) -> Result<Vec<TrackedRepo>> {
    let rows = sqlx::query(
        "SELECT r.id, r.owner, r.name, r.full_name \
         FROM workspace_repos wr \
         JOIN repositories r ON r.id = wr.repository_id \
         WHERE wr.workspace_id = ? \
         ORDER BY r.full_name",
    )
    .bind(workspace_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| TrackedRepo {
            id: row.get("id"),
            owner: row.get("owner"),
            name: row.get("name"),
            full_name: row.get("full_name"),
        })
        .collect())
}

#[instrument(skip_all)]
pub async fn repos_by_ids(pool: &Pool, repo_ids: &[i64]) -> Result<Vec<TrackedRepo>> {
    if repo_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; repo_ids.len()].join(", ");
    let sql = format!(
        "SELECT id, owner, name, full_name FROM repositories WHERE id IN ({placeholders}) ORDER BY full_name"
    );
    let mut query = sqlx::query(&sql);
    for id in repo_ids {
        query = query.bind(*id);
    }
    let rows = query.fetch_all(pool).await?;
    Ok(rows
        .into_iter()
        .map(|row| TrackedRepo {
            id: row.get("id"),
            owner: row.get("owner"),
            name: row.get("name"),
            full_name: row.get("full_name"),
        })
        .collect())
}

/// Lookup used by the polling supervisor to spot a newly tracked repository.
#[instrument(skip_all)]
pub async fn find_repository(pool: &Pool, owner: &str, name: &str) -> Result<Option<TrackedRepo>> {
    let row = sqlx::query("SELECT id, owner, name, full_name FROM repositories WHERE full_name = ?")
        .bind(format!("{}/{}", owner, name))
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|row| TrackedRepo {
        id: row.get("id"),
        owner: row.get("owner"),
        name: row.get("name"),
        full_name: row.get("full_name"),
    }))
}

#[instrument(skip_all)]
pub async fn get_or_create_contributor(
    pool: &Pool,
    username: &str,
    display_name: Option<&str>,
    avatar_url: Option<&str>,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO contributors (username, display_name, avatar_url) VALUES (?, ?, ?) \
         ON CONFLICT(username) DO UPDATE SET \
           display_name = COALESCE(excluded.display_name, contributors.display_name), \
           avatar_url = COALESCE(excluded.avatar_url, contributors.avatar_url) \
         RETURNING id",
    )
    .bind(username)
    .bind(display_name)
    .bind(avatar_url)
    .fetch_one(pool)
    .await?;
    Ok(rec.get::<i64, _>("id"))
}

/// Insert-or-update an issue by its upstream id, stamping `last_synced_at`.
#[instrument(skip_all)]
pub async fn upsert_issue(pool: &Pool, repository_id: i64, up: &IssueUpsert) -> Result<i64> {
    let author_id = match &up.author {
        Some(author) => Some(
            get_or_create_contributor(
                pool,
                &author.username,
                author.display_name.as_deref(),
                author.avatar_url.as_deref(),
            )
            .await?,
        ),
        None => None,
    };

    let labels = serde_json::to_string(&up.labels)?;
    let assignees = serde_json::to_string(&up.assignees)?;

    let rec = sqlx::query(
        "INSERT INTO issues (github_id, number, title, state, repository_id, author_id, \
                             created_at, updated_at, closed_at, labels, assignees, \
                             comments_count, last_synced_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(github_id) DO UPDATE SET \
           number = excluded.number, title = excluded.title, state = excluded.state, \
           author_id = excluded.author_id, updated_at = excluded.updated_at, \
           closed_at = excluded.closed_at, labels = excluded.labels, \
           assignees = excluded.assignees, comments_count = excluded.comments_count, \
           last_synced_at = excluded.last_synced_at \
         RETURNING id",
    )
    .bind(up.github_id)
    .bind(up.number)
    .bind(&up.title)
    .bind(up.state.as_str())
    .bind(repository_id)
    .bind(author_id)
    .bind(up.created_at)
    .bind(up.updated_at)
    .bind(up.closed_at)
    .bind(labels)
    .bind(assignees)
    .bind(up.comments_count)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .context("failed to upsert issue")?;
    Ok(rec.get::<i64, _>("id"))
}

/// Replace an issue's linked-PR list and refresh its sync stamp. Each call
/// is an independent write; no transaction spans sibling issues.
#[instrument(skip_all)]
pub async fn set_issue_linked_prs(
    pool: &Pool,
    github_id: i64,
    prs: &[LinkedPullRequest],
) -> Result<()> {
    let json = serde_json::to_string(prs)?;
    let result = sqlx::query("UPDATE issues SET linked_prs = ?, last_synced_at = ? WHERE github_id = ?")
        .bind(json)
        .bind(Utc::now())
        .bind(github_id)
        .execute(pool)
        .await
        .context("failed to persist linked pull requests")?;
    if result.rows_affected() == 0 {
        return Err(anyhow!("issue {} not found", github_id));
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn issue_linked_prs(
    pool: &Pool,
    github_id: i64,
) -> Result<Option<Vec<LinkedPullRequest>>> {
    let stored: Option<Option<String>> =
        sqlx::query_scalar("SELECT linked_prs FROM issues WHERE github_id = ?")
            .bind(github_id)
            .fetch_optional(pool)
            .await?;
    let Some(stored) = stored else {
        return Err(anyhow!("issue {} not found", github_id));
    };
    match stored {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

#[instrument(skip_all)]
pub async fn open_issue_refs(pool: &Pool, repository_id: i64) -> Result<Vec<OpenIssueRef>> {
    let rows = sqlx::query(
        "SELECT id, github_id, number FROM issues WHERE repository_id = ? AND state = 'open'",
    )
    .bind(repository_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| OpenIssueRef {
            id: row.get("id"),
            github_id: row.get("github_id"),
            number: row.get("number"),
        })
        .collect())
}

/// Staleness check across a repository set. A repository with no issue rows
/// at all, or any never-synced row, or an oldest sync past the threshold,
/// all force a refresh. Pure read, no side effects.
#[instrument(skip_all)]
pub async fn sync_freshness(
    pool: &Pool,
    repo_ids: &[i64],
    threshold_minutes: i64,
) -> Result<SyncFreshness> {
    if repo_ids.is_empty() {
        return Ok(SyncFreshness {
            needs_sync: false,
            oldest: None,
        });
    }

    let placeholders = vec!["?"; repo_ids.len()].join(", ");

    let sql = format!(
        "SELECT COUNT(DISTINCT repository_id) FROM issues WHERE repository_id IN ({placeholders})"
    );
    let mut query = sqlx::query_scalar::<_, i64>(&sql);
    for id in repo_ids {
        query = query.bind(*id);
    }
    let covered = query.fetch_one(pool).await?;
    if (covered as usize) < repo_ids.len() {
        return Ok(SyncFreshness {
            needs_sync: true,
            oldest: None,
        });
    }

    let sql = format!(
        "SELECT COUNT(*) FROM issues WHERE repository_id IN ({placeholders}) AND last_synced_at IS NULL"
    );
    let mut query = sqlx::query_scalar::<_, i64>(&sql);
    for id in repo_ids {
        query = query.bind(*id);
    }
    if query.fetch_one(pool).await? > 0 {
        return Ok(SyncFreshness {
            needs_sync: true,
            oldest: None,
        });
    }

    let sql =
        format!("SELECT MIN(last_synced_at) FROM issues WHERE repository_id IN ({placeholders})");
    let mut query = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(&sql);
    for id in repo_ids {
        query = query.bind(*id);
    }
    let oldest = query.fetch_one(pool).await?;

    let needs_sync = match oldest {
        Some(oldest) => Utc::now() - oldest > Duration::minutes(threshold_minutes),
        None => true,
    };
    Ok(SyncFreshness { needs_sync, oldest })
}

/// Read path: issues of a repository set joined with repository and author
/// metadata, most recently updated first, capped at `limit`.
#[instrument(skip_all)]
pub async fn list_issues_for_repos(
    pool: &Pool,
    repo_ids: &[i64],
    limit: i64,
) -> Result<Vec<IssueRow>> {
    if repo_ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; repo_ids.len()].join(", ");
    let sql = format!(
        "SELECT i.id, i.github_id, i.number, i.title, i.state, \
                r.full_name AS repo_full_name, \
                c.username AS author_username, c.avatar_url AS author_avatar_url, \
                i.created_at, i.updated_at, i.closed_at, i.labels, i.assignees, \
                i.comments_count, i.linked_prs, i.last_synced_at \
         FROM issues i \
         JOIN repositories r ON r.id = i.repository_id \
         LEFT JOIN contributors c ON c.id = i.author_id \
         WHERE i.repository_id IN ({placeholders}) \
         ORDER BY i.updated_at DESC \
         LIMIT ?"
    );
    let mut query = sqlx::query(&sql);
    for id in repo_ids {
        query = query.bind(*id);
    }
    let rows = query.bind(limit).fetch_all(pool).await?;

    Ok(rows
        .into_iter()
        .map(|row| IssueRow {
            id: row.get("id"),
            github_id: row.get("github_id"),
            number: row.get("number"),
            title: row.get("title"),
            state: row.get("state"),
            repo_full_name: row.get("repo_full_name"),
            author_username: row.try_get("author_username").ok(),
            author_avatar_url: row.try_get::<Option<String>, _>("author_avatar_url").ok().flatten(),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            closed_at: row.try_get("closed_at").ok(),
            labels: row.try_get::<Option<String>, _>("labels").ok().flatten(),
            assignees: row.try_get::<Option<String>, _>("assignees").ok().flatten(),
            comments_count: row.get("comments_count"),
            linked_prs: row.try_get::<Option<String>, _>("linked_prs").ok().flatten(),
            last_synced_at: row.try_get("last_synced_at").ok(),
        })
        .collect())
}

#[instrument(skip_all)]
pub async fn insert_notification(
    pool: &Pool,
    workspace_id: Option<&str>,
    repository_id: Option<i64>,
    message: &str,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO notifications (workspace_id, repository_id, message) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(workspace_id)
    .bind(repository_id)
    .bind(message)
    .fetch_one(pool)
    .await?;
    Ok(rec.get::<i64, _>("id"))
}

/// Write an ephemeral key-value slot (e.g. `pending_track_repo`).
#[instrument(skip_all)]
pub async fn put_app_state(pool: &Pool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO app_state (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// Read an ephemeral slot and remove it: values are consumed exactly once.
#[instrument(skip_all)]
pub async fn take_app_state(pool: &Pool, key: &str) -> Result<Option<String>> {
    let mut tx = pool.begin().await?;
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM app_state WHERE key = ?")
        .bind(key)
        .fetch_optional(&mut *tx)
        .await?;
    if value.is_some() {
        sqlx::query("DELETE FROM app_state WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(value)
}
