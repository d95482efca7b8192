use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use gh_syncbot::cache::ProfileCache;
use gh_syncbot::config;
use gh_syncbot::db;
use gh_syncbot::github::GithubClient;
use gh_syncbot::sync::{self, SyncOptions};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Refresh every workspace's issue cache once and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Refresh even when cached records are still fresh
    #[arg(long)]
    force: bool,
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

    let github = GithubClient::from_config(&cfg)?;
    let cache = ProfileCache::new(512, cfg.app.staleness_minutes);
    let mut opts = SyncOptions::from_config(&cfg);
    if args.force {
        // A zero-minute threshold makes every synced record count as stale.
        opts.staleness_minutes = 0;
    }

    let workspaces = db::list_workspaces(&pool).await?;
    if workspaces.is_empty() {
        info!("no workspaces configured, exiting");
        return Ok(());
    }

    let mut refreshed = 0usize;
    let mut failed = 0usize;
    for (workspace_id, workspace_name) in workspaces {
        let repos = db::workspace_repos(&pool, &workspace_id).await?;
        let repo_ids: Vec<i64> = repos.iter().map(|r| r.id).collect();
        match sync::fetch_issues(&pool, &github, &cache, &repo_ids, &opts).await {
            Ok(issues) => {
                refreshed += 1;
                info!(
                    workspace = %workspace_name,
                    repos = repos.len(),
                    issues = issues.len(),
                    "workspace refreshed"
                );
            }
            Err(err) => {
                failed += 1;
                error!(?err, workspace = %workspace_name, "workspace refresh failed");
            }
        }
    }

    info!(refreshed, failed, "sync pass complete");
    Ok(())
}
