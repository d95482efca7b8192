use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use gh_syncbot::config;
use gh_syncbot::db;
use gh_syncbot::tracker::RepoTracker;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Trigger repository tracking and wait for the record to appear"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Repository owner (user or organization)
    #[arg(long)]
    owner: String,

    /// Repository name
    #[arg(long)]
    repo: String,

    /// Workspace name to register the repository with (created if missing)
    #[arg(long)]
    workspace: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/syncbot.db", cfg.app.resolved_data_dir()));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let workspace_id = match &args.workspace {
        Some(name) => Some(resolve_workspace(&pool, name).await?),
        None => None,
    };

    let mut tracker = RepoTracker::from_config(pool.clone(), &cfg)?;
    if let Some(workspace_id) = &workspace_id {
        tracker = tracker.with_workspace(workspace_id.clone());
    }

    let outcome = tracker.track_repository(&args.owner, &args.repo).await;
    let Some(repository_id) = outcome.repository_id.filter(|_| outcome.success) else {
        bail!(
            "tracking {}/{} failed: {}",
            args.owner,
            args.repo,
            outcome.error.unwrap_or_else(|| "unknown error".to_string())
        );
    };

    info!(repository_id, "repository tracked");
    if let (Some(workspace_id), Some(name)) = (&workspace_id, &args.workspace) {
        db::add_repo_to_workspace(&pool, workspace_id, repository_id).await?;
        info!(workspace = %name, "repository added to workspace");
    }
    Ok(())
}

async fn resolve_workspace(pool: &db::Pool, name: &str) -> Result<String> {
    let existing = db::list_workspaces(pool)
        .await?
        .into_iter()
        .find(|(_, ws_name)| ws_name == name)
        .map(|(id, _)| id);
    match existing {
        Some(id) => Ok(id),
        None => db::create_workspace(pool, name).await,
    }
}
