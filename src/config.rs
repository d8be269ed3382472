use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::github::{Token, DEFAULT_API_URL};
use crate::pr::{self, PrError, PrRef};
use crate::run::{LabelErrorPolicy, LabelOptions, RunOptions};

const DEFAULT_CONFIG_FILE: &str = ".pr-labeler.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required input: {0}")]
    MissingInput(&'static str),

    #[error("Invalid input {name}: {reason}")]
    InvalidInput { name: &'static str, reason: String },

    #[error(transparent)]
    Url(#[from] PrError),

    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Optional settings loaded from .pr-labeler.toml.
/// All fields are optional; the tool works with zero config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub github: GitHubConfig,

    #[serde(default)]
    pub labels: LabelConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitHubConfig {
    /// GitHub API token. If None, falls back to GITHUB_TOKEN env var.
    pub token: Option<String>,
    /// REST API root, for GitHub Enterprise (e.g., https://ghe.example.com/api/v3)
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LabelConfig {
    /// Apply labels concurrently instead of one at a time
    pub parallel: Option<bool>,
    /// Log failed label requests and still post the summary comment
    pub continue_on_error: Option<bool>,
}

impl FileConfig {
    /// Load from `path`, or from .pr-labeler.toml in the current directory
    /// when no path is given. A missing default file yields the default config;
    /// a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<FileConfig, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::load_from(default_path)?
                } else {
                    FileConfig::default()
                }
            }
        };

        if non_empty(config.github.token.clone()).is_none() {
            config.github.token = std::env::var("GITHUB_TOKEN").ok();
        }

        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<FileConfig, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }
}

/// Raw run inputs as supplied on the command line or through the
/// INPUT_* variables of a GitHub Actions step.
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub pr_number: Option<String>,
    pub url: Option<String>,
    pub token: Option<String>,
    pub api_url: Option<String>,
    pub parallel: bool,
    pub continue_on_error: bool,
    pub dry_run: bool,
}

/// Fully validated settings for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub pr: PrRef,
    pub token: Token,
    pub api_url: String,
    pub options: RunOptions,
}

impl RunConfig {
    /// Validate `inputs` against `file` without touching the network.
    ///
    /// A PR URL, when given, takes precedence over owner/repo/pr_number.
    /// The input token wins over the config file (which already carries the
    /// GITHUB_TOKEN fallback). Empty strings count as missing.
    pub fn resolve(inputs: Inputs, file: FileConfig) -> Result<RunConfig, ConfigError> {
        let pr = match non_empty(inputs.url) {
            Some(url) => pr::parse_pr_url(&url)?,
            None => PrRef {
                owner: required(inputs.owner, "owner")?,
                repo: required(inputs.repo, "repo")?,
                number: parse_pr_number(&required(inputs.pr_number, "pr_number")?)?,
            },
        };

        let token = non_empty(inputs.token)
            .or_else(|| non_empty(file.github.token))
            .map(Token::new)
            .ok_or(ConfigError::MissingInput("token"))?;

        let api_url = non_empty(inputs.api_url)
            .or_else(|| non_empty(file.github.api_url))
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let on_error = if inputs.continue_on_error || file.labels.continue_on_error.unwrap_or(false) {
            LabelErrorPolicy::Continue
        } else {
            LabelErrorPolicy::Abort
        };

        Ok(RunConfig {
            pr,
            token,
            api_url,
            options: RunOptions {
                labels: LabelOptions {
                    parallel: inputs.parallel || file.labels.parallel.unwrap_or(false),
                    on_error,
                },
                dry_run: inputs.dry_run,
            },
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn required(value: Option<String>, name: &'static str) -> Result<String, ConfigError> {
    non_empty(value).ok_or(ConfigError::MissingInput(name))
}

fn parse_pr_number(raw: &str) -> Result<u64, ConfigError> {
    match raw.parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidInput {
            name: "pr_number",
            reason: "must be a positive integer".to_string(),
        }),
        Ok(number) => Ok(number),
        Err(e) => Err(ConfigError::InvalidInput {
            name: "pr_number",
            reason: format!("{:?} is not an integer ({})", raw, e),
        }),
    }
}
