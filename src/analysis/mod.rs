pub mod label;
pub mod stats;

pub use label::{classify, Classification, Label};
pub use stats::DiffStats;

use tracing::debug;

use crate::pr::ChangedFile;

/// Aggregate statistics plus one label per file for a single pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub stats: DiffStats,
    pub classifications: Vec<Classification>,
}

/// Compute the diff statistics and per-file labels for `files`.
///
/// Pure: no I/O, no shared state between files.
pub fn analyze(files: &[ChangedFile]) -> Analysis {
    let stats = DiffStats::aggregate(files);
    let classifications = classify(files);
    debug!(
        files = files.len(),
        additions = stats.additions,
        deletions = stats.deletions,
        changes = stats.changes,
        "analyzed changed files"
    );
    Analysis {
        stats,
        classifications,
    }
}
