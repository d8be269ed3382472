pub mod types;

pub use types::{ChangedFile, PrRef};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrError {
    #[error("Invalid PR URL: {0}")]
    InvalidUrl(String),
}

/// Parse a GitHub PR URL into its component parts.
///
/// Expected format: https://github.com/{owner}/{repo}/pull/{number}
pub fn parse_pr_url(url: &str) -> Result<PrRef, PrError> {
    let invalid = || PrError::InvalidUrl(url.to_string());
    let parsed = reqwest::Url::parse(url).map_err(|_| invalid())?;

    if parsed.host_str() != Some("github.com") {
        return Err(invalid());
    }

    let segments: Vec<_> = parsed
        .path_segments()
        .ok_or_else(invalid)?
        .filter(|segment| !segment.is_empty())
        .collect();

    if segments.len() != 4 || segments[2] != "pull" {
        return Err(invalid());
    }

    let number = segments[3].parse::<u64>().map_err(|_| invalid())?;

    Ok(PrRef {
        owner: segments[0].to_string(),
        repo: segments[1].to_string(),
        number,
    })
}
