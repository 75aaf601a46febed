//! GitHub extraction client
//!
//! Paginated reads of pull requests, issues and commits with a single
//! retry on transport failures and 5xx responses. An exhausted rate limit
//! is reported immediately as [`IngestError::RateLimited`].

use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::GitHubConfig;
use crate::database::models::{Commit, Issue, PullRequest};
use crate::error::IngestError;
use crate::github::{normalize, types};

/// Largest `per_page` the GitHub REST API honours.
pub const MAX_PER_PAGE: usize = 100;
/// Upper bound on pages scanned for one listing.
pub const MAX_PAGES: usize = 10;
/// Most items a single listing can yield.
pub const MAX_LISTED: usize = MAX_PER_PAGE * MAX_PAGES;

const MAX_ATTEMPTS: u32 = 2;
const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// Pull requests of one extraction plus the numbers whose file list could not be read.
#[derive(Debug, Clone, Default)]
pub struct PullRequestBatch {
    pub pull_requests: Vec<PullRequest>,
    pub missing_files: Vec<i64>,
}

#[derive(Clone)]
pub struct GitHubClient {
    http: Client,
    base_url: String,
    network_retry_backoff: Duration,
    server_error_retry_backoff: Duration,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig) -> Result<Self, IngestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github.v3+json"),
        );

        let http = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| {
                IngestError::Config(format!("Failed to create GitHub client: {}", e))
            })?;

        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            network_retry_backoff: config.network_retry_backoff(),
            server_error_retry_backoff: config.server_error_retry_backoff(),
        })
    }

    /// Repositories the authenticated user can access, most recently updated first.
    ///
    /// Private repositories are included; the listing stops after
    /// [`MAX_LISTED`] entries.
    pub async fn fetch_user_repositories(
        &self,
        credential: &str,
    ) -> Result<Vec<types::Repository>, IngestError> {
        require_credential(credential)?;
        let query = vec![("sort", "updated".to_string())];
        let repositories = self
            .collect_pages(credential, "/user/repos", query, MAX_LISTED as u32, Some)
            .await?;
        debug!("Listed {} repositories for the authenticated user", repositories.len());
        Ok(repositories)
    }

    pub async fn fetch_pull_requests(
        &self,
        credential: &str,
        owner: &str,
        repo: &str,
        limit: u32,
    ) -> Result<PullRequestBatch, IngestError> {
        validate_request(credential, owner, repo, limit)?;
        info!("Fetching up to {} pull requests for {}/{}", limit, owner, repo);

        let path = format!("/repos/{}/{}/pulls", owner, repo);
        let listing: Vec<types::PullRequest> = self
            .collect_pages(credential, &path, sorted_listing_query(), limit, Some)
            .await?;

        let mut batch = PullRequestBatch::default();
        let mut rate_limited = false;
        for raw in listing {
            if rate_limited {
                batch.missing_files.push(raw.number);
                batch
                    .pull_requests
                    .push(normalize::normalize_pull_request(raw, Vec::new()));
                continue;
            }

            let files = match self
                .fetch_pull_request_files(credential, owner, repo, raw.number)
                .await
            {
                Ok(files) => files,
                Err(e) => {
                    warn!(
                        "File list unavailable for {}/{}#{}: {}",
                        owner, repo, raw.number, e
                    );
                    // Every later file request would hit the same exhausted quota.
                    rate_limited = e.is_rate_limited();
                    batch.missing_files.push(raw.number);
                    Vec::new()
                }
            };
            batch
                .pull_requests
                .push(normalize::normalize_pull_request(raw, files));
        }

        info!(
            "Fetched {} pull requests for {}/{}",
            batch.pull_requests.len(),
            owner,
            repo
        );
        Ok(batch)
    }

    /// True issues only; listing entries that are pull requests are skipped.
    pub async fn fetch_issues(
        &self,
        credential: &str,
        owner: &str,
        repo: &str,
        limit: u32,
    ) -> Result<Vec<Issue>, IngestError> {
        validate_request(credential, owner, repo, limit)?;
        info!("Fetching up to {} issues for {}/{}", limit, owner, repo);

        let path = format!("/repos/{}/{}/issues", owner, repo);
        let issues = self
            .collect_pages(
                credential,
                &path,
                sorted_listing_query(),
                limit,
                normalize::normalize_issue,
            )
            .await?;

        info!("Fetched {} issues for {}/{}", issues.len(), owner, repo);
        Ok(issues)
    }

    pub async fn fetch_commits(
        &self,
        credential: &str,
        owner: &str,
        repo: &str,
        limit: u32,
    ) -> Result<Vec<Commit>, IngestError> {
        validate_request(credential, owner, repo, limit)?;
        info!("Fetching up to {} commits for {}/{}", limit, owner, repo);

        let path = format!("/repos/{}/{}/commits", owner, repo);
        let commits = self
            .collect_pages(credential, &path, Vec::new(), limit, |raw: types::Commit| {
                let sha = raw.sha.clone();
                let commit = normalize::normalize_commit(raw);
                if commit.is_none() {
                    warn!("Skipping commit {} without author or committer date", sha);
                }
                commit
            })
            .await?;

        info!("Fetched {} commits for {}/{}", commits.len(), owner, repo);
        Ok(commits)
    }

    async fn fetch_pull_request_files(
        &self,
        credential: &str,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<Vec<String>, IngestError> {
        let path = format!("/repos/{}/{}/pulls/{}/files", owner, repo, number);
        let query = [("per_page", MAX_PER_PAGE.to_string())];
        let files: Vec<types::ChangedFile> = self.get_json(credential, &path, &query).await?;
        Ok(normalize::file_names(files))
    }

    /// Walks `page=1,2,..` until `limit` kept items are collected or a short page ends the listing.
    async fn collect_pages<T, U, F>(
        &self,
        credential: &str,
        path: &str,
        base_query: Vec<(&'static str, String)>,
        limit: u32,
        mut keep: F,
    ) -> Result<Vec<U>, IngestError>
    where
        T: DeserializeOwned,
        F: FnMut(T) -> Option<U>,
    {
        let limit = limit as usize;
        let per_page = limit.min(MAX_PER_PAGE);
        let mut items = Vec::with_capacity(limit.min(MAX_LISTED));

        for page in 1..=MAX_PAGES {
            let mut query = base_query.clone();
            query.push(("per_page", per_page.to_string()));
            query.push(("page", page.to_string()));

            let batch: Vec<T> = self.get_json(credential, path, &query).await?;
            let fetched = batch.len();
            items.extend(batch.into_iter().filter_map(&mut keep));

            debug!("{} page {}: {} fetched, {} kept so far", path, page, fetched, items.len());
            if items.len() >= limit || fetched < per_page {
                break;
            }
        }

        items.truncate(limit);
        Ok(items)
    }

    /// One logical GET: at most two attempts, rate limits never retried.
    async fn get_json<T: DeserializeOwned>(
        &self,
        credential: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, IngestError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let sent = self
                .http
                .get(&url)
                .query(query)
                .bearer_auth(credential)
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                Err(e) if attempt < MAX_ATTEMPTS => {
                    warn!(
                        "Request to {} failed ({}), retrying in {:?}",
                        path, e, self.network_retry_backoff
                    );
                    tokio::time::sleep(self.network_retry_backoff).await;
                    continue;
                }
                Err(e) => {
                    return Err(IngestError::ExternalService(format!(
                        "Request to {} failed after retry: {}",
                        path, e
                    )));
                }
            };

            let status = response.status();
            if let Some(err) = rate_limit_error(status, response.headers()) {
                warn!("Rate limit exhausted while requesting {}: {}", path, err);
                return Err(err);
            }

            if status.is_server_error() {
                if attempt < MAX_ATTEMPTS {
                    warn!(
                        "GitHub returned {} for {}, retrying in {:?}",
                        status.as_u16(),
                        path,
                        self.server_error_retry_backoff
                    );
                    tokio::time::sleep(self.server_error_retry_backoff).await;
                    continue;
                }
                return Err(IngestError::ExternalService(format!(
                    "GitHub API request to {} failed with status {} after retry",
                    path,
                    status.as_u16()
                )));
            }

            if !status.is_success() {
                return Err(IngestError::ExternalService(format!(
                    "GitHub API request to {} failed with status {}",
                    path,
                    status.as_u16()
                )));
            }

            return response.json::<T>().await.map_err(|e| {
                IngestError::ExternalService(format!(
                    "Failed to decode response from {}: {}",
                    path, e
                ))
            });
        }
    }
}

/// A 4xx with `X-RateLimit-Remaining: 0` means the quota is spent.
pub fn rate_limit_error(status: StatusCode, headers: &HeaderMap) -> Option<IngestError> {
    if !status.is_client_error() {
        return None;
    }

    let remaining = headers
        .get(RATE_LIMIT_REMAINING)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)?;
    if remaining != "0" {
        return None;
    }

    let reset_at = headers
        .get(RATE_LIMIT_RESET)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_reset);

    Some(IngestError::RateLimited { reset_at })
}

fn parse_reset(value: &str) -> Option<DateTime<Utc>> {
    let seconds: i64 = value.trim().parse().ok()?;
    Utc.timestamp_opt(seconds, 0).single()
}

fn sorted_listing_query() -> Vec<(&'static str, String)> {
    vec![
        ("state", "all".to_string()),
        ("sort", "updated".to_string()),
        ("direction", "desc".to_string()),
    ]
}

fn require_credential(credential: &str) -> Result<(), IngestError> {
    if credential.trim().is_empty() {
        return Err(IngestError::Validation(
            "GitHub credential is required".to_string(),
        ));
    }
    Ok(())
}

fn validate_request(credential: &str, owner: &str, repo: &str, limit: u32) -> Result<(), IngestError> {
    require_credential(credential)?;
    validate_name("owner", owner)?;
    validate_name("repository", repo)?;
    if limit == 0 {
        return Err(IngestError::Validation(
            "Extraction limit must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Owner and repository names end up in URL paths.
pub fn validate_name(what: &str, name: &str) -> Result<(), IngestError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(IngestError::Validation(format!(
            "Invalid {} name: {:?}",
            what, name
        )));
    }
    Ok(())
}
