//! Polling supervisor for long-running "track a repository" backend jobs.
//!
//! `track_repository` issues one trigger request, then polls the store at a
//! fixed interval until the expected repository row appears or the attempt
//! budget runs out. At most one tracking attempt is in flight per
//! controller; the owning scope tears polling down with [`RepoTracker::stop`].
//! The backend job itself is never cancelled: on timeout it may still
//! complete later, and the pending marker is left in place for the next
//! sweep to reconcile.

use crate::config::Config;
use crate::db::{self, Pool};
use crate::error::TrackError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

pub const PENDING_TRACK_KEY: &str = "pending_track_repo";

#[derive(Debug, Clone, PartialEq)]
pub enum TrackingStatus {
    Idle,
    Tracking,
    Tracked { repository_id: i64 },
    Timeout,
    Error(TrackError),
}

/// Structured result returned to the caller of `track_repository`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrackOutcome {
    pub success: bool,
    pub repository_id: Option<i64>,
    pub error: Option<String>,
}

impl TrackOutcome {
    fn tracked(repository_id: i64) -> Self {
        Self {
            success: true,
            repository_id: Some(repository_id),
            error: None,
        }
    }

    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            repository_id: None,
            error: Some(error.into()),
        }
    }
}

/// Response body of the trigger endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    pub success: bool,
    #[serde(default)]
    pub repository_id: Option<i64>,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Trigger request interface; the real impl POSTs to the tracking endpoint.
#[async_trait]
pub trait TrackService: Send + Sync {
    async fn trigger(&self, owner: &str, repo: &str) -> Result<TriggerResponse, TrackError>;
}

pub struct HttpTrackService {
    http: Client,
    endpoint: Url,
}

impl HttpTrackService {
    pub fn new(endpoint: Url) -> Self {
        let http = Client::builder()
            .user_agent("gh-syncbot/0.1")
            .build()
            .expect("reqwest client");
        Self { http, endpoint }
    }
}

#[async_trait]
impl TrackService for HttpTrackService {
    async fn trigger(&self, owner: &str, repo: &str) -> Result<TriggerResponse, TrackError> {
        let res = self
            .http
            .post(self.endpoint.clone())
            .json(&json!({ "owner": owner, "repo": repo }))
            .send()
            .await?;

        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        let parsed: Option<TriggerResponse> = serde_json::from_str(&body).ok();

        if !status.is_success() {
            let message = parsed
                .and_then(|r| r.message)
                .unwrap_or_else(|| body.clone());
            return Err(TrackError::categorize(Some(status), &message));
        }

        parsed.ok_or_else(|| TrackError::Unknown("invalid trigger response".to_string()))
    }
}

type CompletionCallback = Arc<dyn Fn(i64) + Send + Sync>;

/// Supervises one repository-tracking job at a time.
pub struct RepoTracker {
    pool: Pool,
    service: Arc<dyn TrackService>,
    poll_interval: Duration,
    max_attempts: u32,
    status: Mutex<TrackingStatus>,
    generation: AtomicU64,
    on_tracked: Option<CompletionCallback>,
    workspace_id: Option<String>,
}

impl RepoTracker {
    pub fn new(
        pool: Pool,
        service: Arc<dyn TrackService>,
        poll_interval: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            pool,
            service,
            poll_interval,
            max_attempts,
            status: Mutex::new(TrackingStatus::Idle),
            generation: AtomicU64::new(0),
            on_tracked: None,
            workspace_id: None,
        }
    }

    pub fn from_config(pool: Pool, cfg: &Config) -> Result<Self> {
        let endpoint =
            Url::parse(&cfg.tracker.endpoint).context("invalid tracker.endpoint URL")?;
        Ok(Self::new(
            pool,
            Arc::new(HttpTrackService::new(endpoint)),
            Duration::from_secs(cfg.tracker.poll_interval_secs),
            cfg.tracker.max_attempts,
        ))
    }

    /// Invoke `f` with the new repository id once tracking completes.
    pub fn with_completion(mut self, f: CompletionCallback) -> Self {
        self.on_tracked = Some(f);
        self
    }

    /// Attribute the completion notification to a workspace.
    pub fn with_workspace(mut self, workspace_id: impl Into<String>) -> Self {
        self.workspace_id = Some(workspace_id.into());
        self
    }

    pub fn status(&self) -> TrackingStatus {
        self.lock_status().clone()
    }

    /// Cancel local polling. The backend job keeps running; only the
    /// supervisor's interest in it ends.
    pub fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.lock_status() = TrackingStatus::Idle;
    }

    /// Trigger a tracking job and poll until the repository appears, the
    /// attempt budget is exhausted, or the attempt is superseded.
    pub async fn track_repository(&self, owner: &str, repo: &str) -> TrackOutcome {
        let my_gen = {
            let mut status = self.lock_status();
            if *status == TrackingStatus::Tracking {
                return TrackOutcome::failure("Tracking already in progress");
            }
            *status = TrackingStatus::Tracking;
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        let response = match self.service.trigger(owner, repo).await {
            Ok(response) => response,
            Err(err) => {
                warn!(%err, owner, repo, "tracking trigger failed");
                self.finish(my_gen, TrackingStatus::Error(err.clone()));
                return TrackOutcome::failure(err.to_string());
            }
        };
        if !response.success {
            let err =
                TrackError::categorize(None, response.message.as_deref().unwrap_or_default());
            warn!(%err, owner, repo, "tracking trigger rejected");
            self.finish(my_gen, TrackingStatus::Error(err.clone()));
            return TrackOutcome::failure(err.to_string());
        }
        info!(
            owner,
            repo,
            event_id = response.event_id.as_deref().unwrap_or(""),
            "tracking accepted, polling for repository"
        );
        if let Err(err) =
            db::put_app_state(&self.pool, PENDING_TRACK_KEY, &format!("{}/{}", owner, repo)).await
        {
            warn!(?err, "failed to record pending tracking marker");
        }

        for attempt in 1..=self.max_attempts {
            if self.generation.load(Ordering::SeqCst) != my_gen {
                return TrackOutcome::failure("tracking superseded");
            }
            match db::find_repository(&self.pool, owner, repo).await {
                Ok(Some(found)) => {
                    if let Err(err) = db::take_app_state(&self.pool, PENDING_TRACK_KEY).await {
                        warn!(?err, "failed to consume pending tracking marker");
                    }
                    if let Err(err) = db::insert_notification(
                        &self.pool,
                        self.workspace_id.as_deref(),
                        Some(found.id),
                        &format!("{} is now being tracked", found.full_name),
                    )
                    .await
                    {
                        warn!(?err, "failed to write tracking notification");
                    }
                    if let Some(callback) = &self.on_tracked {
                        callback(found.id);
                    }
                    info!(attempt, repo = %found.full_name, "repository tracked");
                    self.finish(
                        my_gen,
                        TrackingStatus::Tracked {
                            repository_id: found.id,
                        },
                    );
                    return TrackOutcome::tracked(found.id);
                }
                Ok(None) => {}
                Err(err) => warn!(?err, attempt, "tracking poll query failed"),
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        warn!(owner, repo, attempts = self.max_attempts, "tracking timed out");
        self.finish(my_gen, TrackingStatus::Timeout);
        TrackOutcome::failure(TrackError::Timeout.to_string())
    }

    fn lock_status(&self) -> std::sync::MutexGuard<'_, TrackingStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Write a terminal status unless a newer attempt has superseded this one.
    fn finish(&self, my_gen: u64, status: TrackingStatus) {
        if self.generation.load(Ordering::SeqCst) == my_gen {
            *self.lock_status() = status;
        }
    }
}
