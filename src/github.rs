//! Read-only GitHub queries exposed to the model as tools.
//!
//! Every operation returns a [`ToolEnvelope`]; failures never escape as errors.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AgentError;

pub const DEFAULT_REPO_DAYS: u32 = 30;
pub const DEFAULT_COMMIT_DAYS: u32 = 7;
pub const DEFAULT_LIMIT: u32 = 10;
pub const DEFAULT_SORT: &str = "updated";
pub const SEARCH_WINDOW_DAYS: i64 = 30;

/// GitHub's per-page maximum.
const PAGE_SIZE: u8 = 100;

// -- Tool parameter types --

#[derive(Debug, Default, Clone, Deserialize, JsonSchema)]
pub struct UserReposParams {
    #[schemars(description = "GitHub username (optional, defaults to the authenticated user)")]
    #[serde(default)]
    pub username: Option<String>,

    #[schemars(description = "Number of days to look back for updates (default: 30)")]
    #[serde(default)]
    pub days: Option<u32>,

    #[schemars(description = "Maximum number of repositories to return (default: 10)")]
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RecentCommitsParams {
    #[schemars(description = "Repository name in format 'owner/repo'")]
    pub repo_name: String,

    #[schemars(description = "Number of days to look back for commits (default: 7)")]
    #[serde(default)]
    pub days: Option<u32>,

    #[schemars(description = "Maximum number of commits to return (default: 10)")]
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchReposParams {
    #[schemars(description = "Search query for repositories")]
    pub query: String,

    #[schemars(description = "Sort results by: 'updated', 'stars', 'forks' (default: 'updated')")]
    #[serde(default)]
    pub sort: Option<String>,

    #[schemars(description = "Maximum number of repositories to return (default: 10)")]
    #[serde(default)]
    pub limit: Option<u32>,
}

// -- Result records --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub name: String,
    pub full_name: String,
    pub description: Option<String>,
    pub url: String,
    pub updated_at: String,
    pub pushed_at: Option<String>,
    pub language: Option<String>,
    pub stars: u64,
    pub forks: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub sha: String,
    pub message: String,
    pub author: String,
    pub date: String,
    pub url: String,
}

/// Uniform tool result handed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolEnvelope<T> {
    Success {
        data: Vec<T>,
        count: usize,
        message: String,
    },
    Error {
        error_message: String,
    },
}

impl<T> ToolEnvelope<T> {
    pub fn success(data: Vec<T>, message: impl Into<String>) -> Self {
        ToolEnvelope::Success {
            count: data.len(),
            data,
            message: message.into(),
        }
    }

    pub fn error(error_message: impl Into<String>) -> Self {
        ToolEnvelope::Error {
            error_message: error_message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolEnvelope::Success { .. })
    }
}

impl<T: Serialize> ToolEnvelope<T> {
    pub fn into_value(self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({
                "status": "error",
                "error_message": format!("Failed to encode tool result: {e}"),
            })
        })
    }
}

/// The three fixed GitHub operations available to the agent.
#[async_trait]
pub trait GitHubQueries: Send + Sync {
    async fn get_user_repositories(
        &self,
        params: UserReposParams,
    ) -> ToolEnvelope<RepositoryRecord>;

    async fn get_recent_commits(&self, params: RecentCommitsParams) -> ToolEnvelope<CommitRecord>;

    async fn search_repositories(
        &self,
        params: SearchReposParams,
    ) -> ToolEnvelope<RepositoryRecord>;
}

// -- Client factory --

/// Builds a fresh octocrab client per call from explicit configuration.
#[derive(Clone, Default)]
pub struct GitHubClientFactory {
    token: Option<String>,
    base_uri: Option<String>,
}

impl std::fmt::Debug for GitHubClientFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClientFactory")
            .field("token", &self.token.as_ref().map(|_| "[redacted]"))
            .field("base_uri", &self.base_uri)
            .finish()
    }
}

impl GitHubClientFactory {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
            base_uri: None,
        }
    }

    /// Point the client at a different API root (GitHub Enterprise, tests).
    pub fn with_base_uri(mut self, base_uri: impl Into<String>) -> Self {
        self.base_uri = Some(base_uri.into());
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn build(&self) -> Result<octocrab::Octocrab, AgentError> {
        let mut builder = octocrab::OctocrabBuilder::new();
        if let Some(ref uri) = self.base_uri {
            builder = builder.base_uri(uri.as_str())?;
        }
        if let Some(ref token) = self.token {
            builder = builder.personal_token(token.clone());
        }
        Ok(builder.build()?)
    }
}

// -- Raw GitHub payloads --

#[derive(Debug, Deserialize)]
struct RawRepository {
    name: String,
    full_name: String,
    #[serde(default)]
    description: Option<String>,
    html_url: String,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    pushed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    forks_count: u64,
}

impl From<RawRepository> for RepositoryRecord {
    fn from(r: RawRepository) -> Self {
        Self {
            name: r.name,
            full_name: r.full_name,
            description: r.description,
            url: r.html_url,
            updated_at: r.updated_at.to_rfc3339(),
            pushed_at: r.pushed_at.map(|t| t.to_rfc3339()),
            language: r.language,
            stars: r.stargazers_count,
            forks: r.forks_count,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawCommit {
    sha: String,
    html_url: String,
    commit: RawCommitDetail,
}

#[derive(Debug, Deserialize)]
struct RawCommitDetail {
    message: String,
    #[serde(default)]
    author: Option<RawGitAuthor>,
}

#[derive(Debug, Deserialize)]
struct RawGitAuthor {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    date: Option<DateTime<Utc>>,
}

impl From<RawCommit> for CommitRecord {
    fn from(c: RawCommit) -> Self {
        let author = c.commit.author;
        Self {
            sha: c.sha.chars().take(8).collect(),
            message: first_line(&c.commit.message).to_string(),
            author: author
                .as_ref()
                .and_then(|a| a.name.clone())
                .unwrap_or_else(|| "unknown".to_string()),
            date: author
                .and_then(|a| a.date)
                .map(|d| d.to_rfc3339())
                .unwrap_or_default(),
            url: c.html_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawSearchResults {
    items: Vec<RawRepository>,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    login: String,
}

#[derive(Serialize)]
struct ListReposQuery {
    sort: &'static str,
    direction: &'static str,
    per_page: u8,
    page: u32,
}

#[derive(Serialize)]
struct CommitsQuery {
    since: String,
    per_page: u8,
    page: u32,
}

#[derive(Serialize)]
struct SearchQuery<'a> {
    q: &'a str,
    sort: &'a str,
    order: &'static str,
    per_page: u8,
    page: u32,
}

// -- Helpers --

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or("")
}

fn capped_per_page(limit: usize) -> u8 {
    limit.clamp(1, PAGE_SIZE as usize) as u8
}

/// The instant `days` days before now, or an error if that is out of range.
fn lookback(now: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>, AgentError> {
    Duration::try_days(i64::from(days))
        .and_then(|d| now.checked_sub_signed(d))
        .ok_or_else(|| AgentError::InvalidParam(format!("days out of range: {}", days)))
}

/// Append the recent-activity filter GitHub search applies server-side.
pub fn recent_activity_query(query: &str, now: DateTime<Utc>) -> String {
    let since = now - Duration::days(SEARCH_WINDOW_DAYS);
    format!("{} pushed:>={}", query, since.format("%Y-%m-%d"))
}

/// Validate that a GitHub owner/repo name doesn't contain characters that
/// could be used for URL injection in raw API routes.
fn sanitize_github_name(name: &str, field: &str) -> Result<(), AgentError> {
    if name.is_empty() {
        return Err(AgentError::InvalidParam(format!("{} must not be empty", field)));
    }
    if name == "." || name == ".." {
        return Err(AgentError::InvalidParam(format!(
            "{} must not be a relative path segment",
            field
        )));
    }
    for ch in ['/', '?', '#', '%', '\0', ' ', '\n', '\t'] {
        if name.contains(ch) {
            return Err(AgentError::InvalidParam(format!(
                "{} contains invalid character '{}'",
                field,
                ch.escape_default()
            )));
        }
    }
    Ok(())
}

/// Split `owner/repo` into its halves.
fn parse_repo_name(repo_name: &str) -> Result<(&str, &str), AgentError> {
    let (owner, repo) = repo_name.split_once('/').ok_or_else(|| {
        AgentError::InvalidParam(format!(
            "repo_name must be in 'owner/repo' format, got '{}'",
            repo_name
        ))
    })?;
    sanitize_github_name(owner, "owner")?;
    sanitize_github_name(repo, "repo")?;
    Ok((owner, repo))
}

// -- Octocrab-backed implementation --

/// GitHub tool set backed by the REST API.
#[derive(Debug, Clone)]
pub struct GitHubToolset {
    clients: GitHubClientFactory,
}

impl GitHubToolset {
    pub fn new(clients: GitHubClientFactory) -> Self {
        if !clients.is_authenticated() {
            warn!("No GitHub token provided, API rate limits will be very restrictive");
        }
        Self { clients }
    }

    async fn fetch_user_repositories(
        &self,
        username: Option<&str>,
        days: u32,
        limit: usize,
    ) -> Result<Vec<RepositoryRecord>, AgentError> {
        if username.is_none() && !self.clients.is_authenticated() {
            return Err(AgentError::Unauthenticated);
        }
        let cutoff = lookback(Utc::now(), days)?;
        let github = self.clients.build()?;

        let route = match username {
            Some(user) => {
                sanitize_github_name(user, "username")?;
                format!("/users/{}/repos", user)
            }
            None => {
                let me: RawUser = github.get("/user", None::<&()>).await?;
                debug!(login = %me.login, "Resolved authenticated GitHub user");
                "/user/repos".to_string()
            }
        };

        let mut repos = Vec::new();
        let mut page = 1;

        while repos.len() < limit {
            let query = ListReposQuery {
                sort: "updated",
                direction: "desc",
                per_page: PAGE_SIZE,
                page,
            };
            let batch: Vec<RawRepository> = github.get(&route, Some(&query)).await?;
            let batch_len = batch.len();
            let mut past_cutoff = false;

            for repo in batch {
                if repos.len() >= limit {
                    break;
                }
                if repo.updated_at >= cutoff {
                    repos.push(RepositoryRecord::from(repo));
                } else {
                    // Sorted by update time, so the rest are older still.
                    past_cutoff = true;
                    break;
                }
            }

            if past_cutoff || batch_len < PAGE_SIZE as usize {
                break;
            }
            page += 1;
        }

        Ok(repos)
    }

    async fn fetch_recent_commits(
        &self,
        repo_name: &str,
        days: u32,
        limit: usize,
    ) -> Result<Vec<CommitRecord>, AgentError> {
        let (owner, repo) = parse_repo_name(repo_name)?;
        let since = lookback(Utc::now(), days)?.to_rfc3339();
        let github = self.clients.build()?;

        let route = format!("/repos/{}/{}/commits", owner, repo);
        let per_page = capped_per_page(limit);
        let mut commits = Vec::new();
        let mut page = 1;

        while commits.len() < limit {
            let query = CommitsQuery {
                since: since.clone(),
                per_page,
                page,
            };
            let batch: Vec<RawCommit> = github.get(&route, Some(&query)).await?;
            let batch_len = batch.len();
            commits.extend(
                batch
                    .into_iter()
                    .take(limit - commits.len())
                    .map(CommitRecord::from),
            );
            if batch_len < per_page as usize {
                break;
            }
            page += 1;
        }

        Ok(commits)
    }

    async fn fetch_search_results(
        &self,
        query: &str,
        sort: &str,
        limit: usize,
    ) -> Result<Vec<RepositoryRecord>, AgentError> {
        let github = self.clients.build()?;
        let search_query = recent_activity_query(query, Utc::now());
        debug!(query = %search_query, sort, "Searching repositories");

        let per_page = capped_per_page(limit);
        let mut repos = Vec::new();
        let mut page = 1;

        while repos.len() < limit {
            let params = SearchQuery {
                q: &search_query,
                sort,
                order: "desc",
                per_page,
                page,
            };
            let results: RawSearchResults =
                github.get("/search/repositories", Some(&params)).await?;
            let batch_len = results.items.len();
            repos.extend(
                results
                    .items
                    .into_iter()
                    .take(limit - repos.len())
                    .map(RepositoryRecord::from),
            );
            if batch_len < per_page as usize {
                break;
            }
            page += 1;
        }

        Ok(repos)
    }
}

/// Fold an operation error into the error envelope with the given prefix.
fn failure<T>(prefix: &str, err: AgentError) -> ToolEnvelope<T> {
    warn!(error = %err, "{}", prefix);
    match err {
        AgentError::Unauthenticated => ToolEnvelope::error(err.to_string()),
        other => ToolEnvelope::error(format!("{}: {}", prefix, other)),
    }
}

#[async_trait]
impl GitHubQueries for GitHubToolset {
    async fn get_user_repositories(
        &self,
        params: UserReposParams,
    ) -> ToolEnvelope<RepositoryRecord> {
        let days = params.days.unwrap_or(DEFAULT_REPO_DAYS);
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT) as usize;

        // Models often send "" for an optional username.
        let username = params
            .username
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty());

        match self.fetch_user_repositories(username, days, limit).await
        {
            Ok(repos) => {
                let message = format!(
                    "Found {} repositories updated in the last {} days",
                    repos.len(),
                    days
                );
                ToolEnvelope::success(repos, message)
            }
            Err(e) => failure("Failed to get repositories", e),
        }
    }

    async fn get_recent_commits(&self, params: RecentCommitsParams) -> ToolEnvelope<CommitRecord> {
        let days = params.days.unwrap_or(DEFAULT_COMMIT_DAYS);
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT) as usize;

        match self.fetch_recent_commits(&params.repo_name, days, limit).await {
            Ok(commits) => {
                let message = format!(
                    "Found {} commits in {} from the last {} days",
                    commits.len(),
                    params.repo_name,
                    days
                );
                ToolEnvelope::success(commits, message)
            }
            Err(e) => failure("Failed to get commits", e),
        }
    }

    async fn search_repositories(
        &self,
        params: SearchReposParams,
    ) -> ToolEnvelope<RepositoryRecord> {
        let sort = params.sort.as_deref().unwrap_or(DEFAULT_SORT);
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT) as usize;

        match self.fetch_search_results(&params.query, sort, limit).await {
            Ok(repos) => {
                let message = format!(
                    "Found {} repositories matching '{}' with recent activity",
                    repos.len(),
                    params.query
                );
                ToolEnvelope::success(repos, message)
            }
            Err(e) => failure("Failed to search repositories", e),
        }
    }
}
