use serde::Deserialize;

/// Identifies a pull request (and its backing issue) on GitHub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl std::fmt::Display for PrRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

/// A single file touched by the pull request, as reported by the
/// `pulls/{number}/files` endpoint.
///
/// `changes` is taken as reported and never recomputed from
/// `additions + deletions`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChangedFile {
    /// Path relative to the repository root (e.g., "src/index.ts")
    pub filename: String,
    /// Lines added in this file
    pub additions: u64,
    /// Lines deleted in this file
    pub deletions: u64,
    /// Total changed lines reported for this file
    pub changes: u64,
}

#[cfg(test)]
impl ChangedFile {
    pub fn new(filename: &str, additions: u64, deletions: u64, changes: u64) -> Self {
        Self {
            filename: filename.to_string(),
            additions,
            deletions,
            changes,
        }
    }
}
