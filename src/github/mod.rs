use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fmt;
use tracing::warn;

use crate::config::Config;
use crate::github::model::{
    GraphQlResponse, RestIssue, TimelineData, TimelineNode,
};
use crate::model::{LinkedPullRequest, PullRequestState};

pub mod model;

const GITHUB_API_BASE: &str = "https://api.github.com/";
const GITHUB_GRAPHQL_URL: &str = "https://api.github.com/graphql";

/// Timeline query resolving pull requests referenced by or connected to an
/// issue. Only PullRequest refs are kept; plain issue cross-references are
/// dropped during extraction.
const TIMELINE_QUERY: &str = r#"
query($owner: String!, $name: String!, $number: Int!) {
  repository(owner: $owner, name: $name) {
    issue(number: $number) {
      timelineItems(first: 100, itemTypes: [CROSS_REFERENCED_EVENT, CONNECTED_EVENT]) {
        nodes {
          ... on CrossReferencedEvent {
            source {
              __typename
              ... on PullRequest { number url state merged }
            }
          }
          ... on ConnectedEvent {
            subject {
              __typename
              ... on PullRequest { number url state merged }
            }
          }
        }
      }
    }
  }
}
"#;

#[derive(Clone)]
pub struct GithubClient {
    http: Client,
    rest_base: Url,
    graphql_url: Url,
    token: String,
}

impl fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubClient")
            .field("rest_base", &self.rest_base)
            .field("graphql_url", &self.graphql_url)
            .finish_non_exhaustive()
    }
}

/// Remote fetcher interface. Test doubles record calls and serve scripted
/// responses; the real client talks to api.github.com.
#[async_trait]
pub trait GithubService: Send + Sync {
    /// Reconcile issue metadata for one repository. The listing includes
    /// pull-request rows as the REST API returns them; callers filter.
    async fn list_issues(&self, owner: &str, repo: &str) -> Result<Vec<RestIssue>>;

    /// Resolve the pull requests linked to one issue. `None` means "no
    /// update": the query failed (logged) or yielded no items.
    async fn linked_pull_requests(
        &self,
        owner: &str,
        repo: &str,
        issue_number: i64,
    ) -> Option<Vec<LinkedPullRequest>>;
}

impl GithubClient {
    pub fn new(token: String) -> Self {
        let rest_base = Url::parse(GITHUB_API_BASE).expect("valid default GitHub URL");
        let graphql_url = Url::parse(GITHUB_GRAPHQL_URL).expect("valid default GraphQL URL");
        Self::with_base_urls(token, rest_base, graphql_url)
    }

    pub fn with_base_urls(token: String, rest_base: Url, graphql_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("gh-syncbot/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            rest_base,
            graphql_url,
            token,
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let rest_base =
            Url::parse(&cfg.github.api_base).context("invalid github.api_base URL")?;
        let graphql_url =
            Url::parse(&cfg.github.graphql_url).context("invalid github.graphql_url URL")?;
        Ok(Self::with_base_urls(
            cfg.github.token.clone(),
            rest_base,
            graphql_url,
        ))
    }

    pub fn build_graphql_request(&self, body: &Value) -> Result<reqwest::Request> {
        self.http
            .post(self.graphql_url.clone())
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Content-Type", "application/json")
            .json(body)
            .build()
            .context("failed to build GraphQL request")
    }

    async fn execute_timeline_query(
        &self,
        owner: &str,
        repo: &str,
        issue_number: i64,
    ) -> Result<Vec<TimelineNode>> {
        let body = json!({
            "query": TIMELINE_QUERY,
            "variables": { "owner": owner, "name": repo, "number": issue_number },
        });
        let request = self.build_graphql_request(&body)?;
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach GitHub GraphQL API")?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("github graphql error {}: {}", status, body));
        }

        let envelope: GraphQlResponse<TimelineData> = res
            .json()
            .await
            .context("invalid GraphQL response JSON")?;
        if let Some(err) = envelope.errors.first() {
            return Err(anyhow!("github graphql error: {}", err.message));
        }

        let nodes = envelope
            .data
            .and_then(|d| d.repository)
            .and_then(|r| r.issue)
            .map(|i| i.timeline_items.nodes)
            .unwrap_or_default();
        Ok(nodes)
    }
}

#[async_trait]
impl GithubService for GithubClient {
    async fn list_issues(&self, owner: &str, repo: &str) -> Result<Vec<RestIssue>> {
        let url = self
            .rest_base
            .join(&format!("repos/{}/{}/issues", owner, repo))
            .context("invalid GitHub API base URL")?;
        let res = self
            .http
            .get(url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .query(&[
                ("state", "all"),
                ("per_page", "100"),
                ("sort", "updated"),
                ("direction", "desc"),
            ])
            .send()
            .await
            .context("failed to reach GitHub REST API")?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("github issues error {}: {}", status, body));
        }
        res.json::<Vec<RestIssue>>()
            .await
            .context("invalid GitHub issues JSON")
    }

    async fn linked_pull_requests(
        &self,
        owner: &str,
        repo: &str,
        issue_number: i64,
    ) -> Option<Vec<LinkedPullRequest>> {
        match self.execute_timeline_query(owner, repo, issue_number).await {
            Ok(nodes) => {
                let prs = extract_linked_prs(&nodes);
                if prs.is_empty() {
                    None
                } else {
                    Some(prs)
                }
            }
            Err(err) => {
                warn!(?err, owner, repo, issue_number, "linked pull request query failed");
                None
            }
        }
    }
}

/// Extract pull-request references from timeline nodes, de-duplicating by
/// PR number and preferring the first occurrence. A merged PR maps to
/// `merged` regardless of its open/closed state.
pub fn extract_linked_prs(nodes: &[TimelineNode]) -> Vec<LinkedPullRequest> {
    let mut seen = HashSet::new();
    let mut prs = Vec::new();
    for node in nodes {
        let Some(item) = node.source.as_ref().or(node.subject.as_ref()) else {
            continue;
        };
        if item.typename.as_deref() != Some("PullRequest") {
            continue;
        }
        let (Some(number), Some(url)) = (item.number, item.url.as_ref()) else {
            continue;
        };
        if !seen.insert(number) {
            continue;
        }
        let state = if item.merged == Some(true) {
            PullRequestState::Merged
        } else {
            item.state
                .as_deref()
                .map(str::to_ascii_lowercase)
                .as_deref()
                .and_then(PullRequestState::parse_state)
                .unwrap_or(PullRequestState::Open)
        };
        prs.push(LinkedPullRequest {
            number,
            url: url.clone(),
            state,
        });
    }
    prs
}
