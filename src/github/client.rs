use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{GitHubError, PullRequestApi, Token};
use crate::pr::{ChangedFile, PrRef};

const USER_AGENT: &str = "pr-labeler";
const API_VERSION: &str = "2022-11-28";
/// GitHub's maximum page size for the pull request files endpoint.
const PER_PAGE: usize = 100;

/// GitHub REST client authenticated with a single token.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: Token,
}

impl GitHubClient {
    /// Build a client for `api_url` (e.g., https://api.github.com or a
    /// GitHub Enterprise `/api/v3` root).
    pub fn new(api_url: &str, token: Token) -> Result<Self, GitHubError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static(API_VERSION));

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn repo_url(&self, pr: &PrRef, path: &str) -> String {
        format!("{}/repos/{}/{}/{}", self.api_url, pr.owner, pr.repo, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, GitHubError> {
        let response = request.bearer_auth(self.token.expose()).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let rate_limited = status == StatusCode::TOO_MANY_REQUESTS
            || (status == StatusCode::FORBIDDEN && quota_exhausted(&response));
        let message = api_message(&response.text().await.unwrap_or_default());
        if rate_limited {
            return Err(GitHubError::RateLimited {
                status: status.as_u16(),
                message,
            });
        }
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(GitHubError::Unauthorized {
                status: status.as_u16(),
                message,
            }),
            _ => Err(GitHubError::Status {
                status: status.as_u16(),
                message,
            }),
        }
    }
}

#[async_trait]
impl PullRequestApi for GitHubClient {
    #[instrument(skip(self, pr), fields(pr = %pr))]
    async fn list_files(&self, pr: &PrRef) -> Result<Vec<ChangedFile>, GitHubError> {
        let url = self.repo_url(pr, &format!("pulls/{}/files", pr.number));
        let mut files = Vec::new();
        let mut page = 1usize;

        loop {
            let request = self
                .http
                .get(&url)
                .query(&[("per_page", PER_PAGE), ("page", page)]);
            let batch = self.send(request).await?.json::<Vec<ChangedFile>>().await?;
            debug!(page, count = batch.len(), "received changed files page");

            let last_page = batch.len() < PER_PAGE;
            files.extend(batch);
            if last_page {
                break;
            }
            page += 1;
        }

        debug!(total = files.len(), "gathered all changed files");
        Ok(files)
    }

    #[instrument(skip(self, pr), fields(pr = %pr))]
    async fn add_labels(&self, pr: &PrRef, labels: &[&str]) -> Result<(), GitHubError> {
        let url = self.repo_url(pr, &format!("issues/{}/labels", pr.number));
        let request = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "labels": labels }));
        self.send(request).await?;
        Ok(())
    }

    #[instrument(skip(self, pr, body), fields(pr = %pr, body_len = body.len()))]
    async fn add_comment(&self, pr: &PrRef, body: &str) -> Result<(), GitHubError> {
        let url = self.repo_url(pr, &format!("issues/{}/comments", pr.number));
        let request = self.http.post(&url).json(&serde_json::json!({ "body": body }));
        self.send(request).await?;
        Ok(())
    }
}

/// GitHub signals a spent primary rate limit with a 403 carrying
/// `x-ratelimit-remaining: 0`.
fn quota_exhausted(response: &Response) -> bool {
    response
        .headers()
        .get("x-ratelimit-remaining")
        .is_some_and(|remaining| remaining.as_bytes() == b"0")
}

/// Pull the `message` field out of a GitHub error payload, falling back to
/// the raw body.
fn api_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    serde_json::from_str::<ErrorBody>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.trim().to_string())
}
