pub mod client;

pub use client::GitHubClient;

use async_trait::async_trait;
use thiserror::Error;

use crate::pr::{ChangedFile, PrRef};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("GitHub API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("GitHub rejected the credential ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("GitHub rate limit hit ({status}): {message}")]
    RateLimited { status: u16, message: String },

    #[error("GitHub API returned {status}: {message}")]
    Status { status: u16, message: String },
}

/// The three GitHub operations a labeling run needs.
///
/// Implementations must be Send + Sync so label requests can be spawned
/// onto a tokio JoinSet.
#[async_trait]
pub trait PullRequestApi: Send + Sync {
    /// All changed files of the pull request, every page gathered.
    async fn list_files(&self, pr: &PrRef) -> Result<Vec<ChangedFile>, GitHubError>;

    /// Add labels to the pull request's issue. Re-adding an existing label is a no-op.
    async fn add_labels(&self, pr: &PrRef, labels: &[&str]) -> Result<(), GitHubError>;

    /// Create a new comment on the pull request's issue.
    async fn add_comment(&self, pr: &PrRef, body: &str) -> Result<(), GitHubError>;
}

/// A GitHub API token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Token(***)")
    }
}
