use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

use gh_syncbot::cache::ProfileCache;
use gh_syncbot::config;
use gh_syncbot::db;
use gh_syncbot::github::GithubClient;
use gh_syncbot::sync::{self, SyncOptions};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
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
    let opts = SyncOptions::from_config(&cfg);
    let interval = Duration::from_secs(cfg.app.sync_interval_secs);

    info!("starting workspace sync loop");
    loop {
        if let Err(err) = sweep_workspaces(&pool, &github, &cache, &opts).await {
            error!(?err, "workspace sweep failed");
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }

    Ok(())
}

async fn sweep_workspaces(
    pool: &db::Pool,
    github: &GithubClient,
    cache: &ProfileCache,
    opts: &SyncOptions,
) -> Result<()> {
    for (workspace_id, workspace_name) in db::list_workspaces(pool).await? {
        let repos = db::workspace_repos(pool, &workspace_id).await?;
        let repo_ids: Vec<i64> = repos.iter().map(|r| r.id).collect();
        match sync::fetch_issues(pool, github, cache, &repo_ids, opts).await {
            Ok(issues) => info!(
                workspace = %workspace_name,
                repos = repos.len(),
                issues = issues.len(),
                "workspace refreshed"
            ),
            Err(err) => error!(?err, workspace = %workspace_name, "workspace refresh failed"),
        }
    }
    Ok(())
}
