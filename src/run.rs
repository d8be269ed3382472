use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, instrument, warn, Instrument};

use crate::analysis::{self, Analysis, Classification, Label};
use crate::github::{GitHubError, PullRequestApi};
use crate::pr::PrRef;
use crate::report;

/// Upper bound on label requests in flight at once in parallel mode.
const MAX_CONCURRENT_LABELS: usize = 8;

/// What to do when a single label request fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LabelErrorPolicy {
    /// Fail the run; the summary comment is not posted.
    #[default]
    Abort,
    /// Log the failure and keep going; the summary comment is still posted.
    Continue,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LabelOptions {
    /// Issue label requests concurrently (at most MAX_CONCURRENT_LABELS at a
    /// time) and join them all before commenting.
    pub parallel: bool,
    pub on_error: LabelErrorPolicy,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub labels: LabelOptions,
    /// Fetch and analyze only; apply no labels and post no comment.
    pub dry_run: bool,
}

/// A label request that did not succeed.
#[derive(Debug, Error)]
#[error("{label} for {filename}: {error}")]
pub struct LabelFailure {
    pub filename: String,
    pub label: Label,
    #[source]
    pub error: GitHubError,
}

/// Label requests that failed under `LabelErrorPolicy::Abort`, in file order.
#[derive(Debug)]
pub struct LabelFailures(pub Vec<LabelFailure>);

impl std::fmt::Display for LabelFailures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} label request(s) failed", self.0.len())?;
        if let Some(first) = self.0.first() {
            write!(f, ", first: {}", first)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Failed to fetch changed files: {0}")]
    Fetch(#[source] GitHubError),

    #[error("{0}")]
    Labels(LabelFailures),

    #[error("Label task panicked: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Failed to post summary comment: {0}")]
    Comment(#[source] GitHubError),

    #[error("{0}, summary comment not posted")]
    Cancelled(String),
}

/// Outcome of a completed run.
#[derive(Debug)]
pub struct RunSummary {
    pub pr: PrRef,
    pub analysis: Analysis,
    /// The comment body that was posted (or would have been, on a dry run)
    pub comment: String,
    /// Label requests that failed under `LabelErrorPolicy::Continue`
    pub label_failures: Vec<LabelFailure>,
    pub dry_run: bool,
}

/// Fetch the changed files, label the pull request once per file, then post
/// one summary comment.
///
/// The comment is only posted after every label request has settled, and
/// never when the run fails before that point.
#[instrument(skip(api, pr, options), fields(pr = %pr, parallel = options.labels.parallel, dry_run = options.dry_run))]
pub async fn run(
    api: Arc<dyn PullRequestApi>,
    pr: &PrRef,
    options: RunOptions,
) -> Result<RunSummary, RunError> {
    info!("fetching changed files");
    let files = api.list_files(pr).await.map_err(RunError::Fetch)?;
    info!(files = files.len(), "fetched changed files");

    let analysis = analysis::analyze(&files);
    let comment = report::comment_body(&analysis.stats);

    if options.dry_run {
        info!("dry run, skipping labels and comment");
        return Ok(RunSummary {
            pr: pr.clone(),
            analysis,
            comment,
            label_failures: Vec::new(),
            dry_run: true,
        });
    }

    info!(labels = analysis.classifications.len(), "applying labels");
    let failures = if options.labels.parallel {
        apply_parallel(&api, pr, &analysis.classifications).await?
    } else {
        apply_sequential(api.as_ref(), pr, &analysis.classifications, options.labels.on_error).await?
    };

    let label_failures = match options.labels.on_error {
        LabelErrorPolicy::Abort if !failures.is_empty() => return Err(RunError::Labels(LabelFailures(failures))),
        _ => failures,
    };
    for failure in &label_failures {
        warn!(filename = %failure.filename, label = %failure.label, error = %failure.error, "label request failed, continuing");
    }

    info!("posting summary comment");
    api.add_comment(pr, &comment).await.map_err(RunError::Comment)?;

    Ok(RunSummary {
        pr: pr.clone(),
        analysis,
        comment,
        label_failures,
        dry_run: false,
    })
}

/// Drive `labeling` until it finishes or `cancel` resolves first.
///
/// On cancellation the labeling future is dropped, which abandons in-flight
/// requests (and aborts spawned label tasks); the comment is never posted.
/// `cancel` yields the reason reported in `RunError::Cancelled`.
pub async fn run_until<L, C>(labeling: L, cancel: C) -> Result<RunSummary, RunError>
where
    L: Future<Output = Result<RunSummary, RunError>>,
    C: Future<Output = String>,
{
    tokio::select! {
        result = labeling => result,
        reason = cancel => {
            warn!(%reason, "run cancelled");
            Err(RunError::Cancelled(reason))
        }
    }
}

/// One request at a time, in file order. Under `Abort` the first failure
/// stops the loop.
async fn apply_sequential(
    api: &dyn PullRequestApi,
    pr: &PrRef,
    classifications: &[Classification],
    on_error: LabelErrorPolicy,
) -> Result<Vec<LabelFailure>, RunError> {
    let mut failures = Vec::new();
    for classification in classifications {
        debug!(filename = %classification.filename, label = %classification.label, "applying label");
        if let Err(error) = api.add_labels(pr, &[classification.label.as_str()]).await {
            failures.push(LabelFailure {
                filename: classification.filename.clone(),
                label: classification.label,
                error,
            });
            if on_error == LabelErrorPolicy::Abort {
                break;
            }
        }
    }
    Ok(failures)
}

/// Every request spawned onto a JoinSet, gated by a semaphore so at most
/// MAX_CONCURRENT_LABELS run at once; all are joined before returning.
/// Failures come back in file order.
async fn apply_parallel(
    api: &Arc<dyn PullRequestApi>,
    pr: &PrRef,
    classifications: &[Classification],
) -> Result<Vec<LabelFailure>, RunError> {
    let permits = Arc::new(Semaphore::new(MAX_CONCURRENT_LABELS));
    let mut tasks = JoinSet::new();
    for (index, classification) in classifications.iter().cloned().enumerate() {
        let api = Arc::clone(api);
        let permits = Arc::clone(&permits);
        let pr = pr.clone();
        let span = info_span!("label", filename = %classification.filename, label = %classification.label);
        tasks.spawn(
            async move {
                // held until the request settles; the semaphore is never closed
                let _permit = permits.acquire_owned().await;
                let result = api.add_labels(&pr, &[classification.label.as_str()]).await;
                (index, classification, result)
            }
            .instrument(span),
        );
    }

    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (index, classification, result) = joined?;
        if let Err(error) = result {
            failures.push((
                index,
                LabelFailure {
                    filename: classification.filename,
                    label: classification.label,
                    error,
                },
            ));
        }
    }

    failures.sort_by_key(|(index, _)| *index);
    Ok(failures.into_iter().map(|(_, failure)| failure).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pr::ChangedFile;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        ListFiles,
        AddLabels(Vec<String>),
        AddComment(String),
    }

    /// In-memory stand-in for GitHub that records every request.
    #[derive(Default)]
    struct FakeApi {
        files: Vec<ChangedFile>,
        reject_credential: bool,
        failing_label: Option<&'static str>,
        failing_comment: bool,
        /// add_labels records the call and then never returns
        hang_labels: bool,
        /// add_labels sleeps this long while counted as in flight
        label_delay: Option<Duration>,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
        calls: Mutex<Vec<Call>>,
    }

    impl FakeApi {
        fn with_files(files: Vec<ChangedFile>) -> Self {
            Self {
                files,
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }

        fn comments(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, Call::AddComment(_)))
                .count()
        }
    }

    fn server_error() -> GitHubError {
        GitHubError::Status {
            status: 502,
            message: "Bad Gateway".to_string(),
        }
    }

    #[async_trait]
    impl PullRequestApi for FakeApi {
        async fn list_files(&self, _pr: &PrRef) -> Result<Vec<ChangedFile>, GitHubError> {
            self.record(Call::ListFiles);
            if self.reject_credential {
                return Err(GitHubError::Unauthorized {
                    status: 401,
                    message: "Bad credentials".to_string(),
                });
            }
            Ok(self.files.clone())
        }

        async fn add_labels(&self, _pr: &PrRef, labels: &[&str]) -> Result<(), GitHubError> {
            self.record(Call::AddLabels(labels.iter().map(|l| l.to_string()).collect()));
            if self.hang_labels {
                std::future::pending::<()>().await;
            }
            if let Some(delay) = self.label_delay {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            if labels.iter().any(|l| Some(*l) == self.failing_label) {
                return Err(server_error());
            }
            Ok(())
        }

        async fn add_comment(&self, _pr: &PrRef, body: &str) -> Result<(), GitHubError> {
            self.record(Call::AddComment(body.to_string()));
            if self.failing_comment {
                return Err(server_error());
            }
            Ok(())
        }
    }

    fn sample_pr() -> PrRef {
        PrRef {
            owner: "org".to_string(),
            repo: "repo".to_string(),
            number: 42,
        }
    }

    fn labels(names: &[&str]) -> Call {
        Call::AddLabels(names.iter().map(|n| n.to_string()).collect())
    }

    fn three_files() -> Vec<ChangedFile> {
        vec![
            ChangedFile::new("index.ts", 10, 2, 12),
            ChangedFile::new("README.md", 3, 0, 3),
            ChangedFile::new("lib/app.js", 4, 4, 8),
        ]
    }

    fn parallel(on_error: LabelErrorPolicy) -> RunOptions {
        RunOptions {
            labels: LabelOptions {
                parallel: true,
                on_error,
            },
            dry_run: false,
        }
    }

    fn continue_on_error() -> RunOptions {
        RunOptions {
            labels: LabelOptions {
                parallel: false,
                on_error: LabelErrorPolicy::Continue,
            },
            dry_run: false,
        }
    }

    #[tokio::test]
    async fn test_labels_then_comment() {
        let api = Arc::new(FakeApi::with_files(vec![
            ChangedFile::new("index.ts", 10, 2, 12),
            ChangedFile::new("README.md", 3, 0, 3),
        ]));

        let summary = run(api.clone(), &sample_pr(), RunOptions::default()).await.unwrap();

        assert_eq!(summary.analysis.stats.additions, 13);
        assert_eq!(summary.analysis.stats.deletions, 2);
        assert_eq!(summary.analysis.stats.changes, 15);
        assert_eq!(
            api.calls(),
            vec![
                Call::ListFiles,
                labels(&["typescript"]),
                labels(&["markdown"]),
                Call::AddComment("This PR has 13 additions, 15 changes and 2 deletions.".to_string()),
            ]
        );
        assert!(summary.label_failures.is_empty());
    }

    #[tokio::test]
    async fn test_empty_pull_request() {
        let api = Arc::new(FakeApi::default());
        let summary = run(api.clone(), &sample_pr(), RunOptions::default()).await.unwrap();

        assert_eq!(summary.comment, "This PR has 0 additions, 0 changes and 0 deletions.");
        assert_eq!(
            api.calls(),
            vec![
                Call::ListFiles,
                Call::AddComment("This PR has 0 additions, 0 changes and 0 deletions.".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_file_without_extension_is_other() {
        let api = Arc::new(FakeApi::with_files(vec![ChangedFile::new("script", 1, 1, 2)]));
        run(api.clone(), &sample_pr(), RunOptions::default()).await.unwrap();
        assert_eq!(api.calls()[1], labels(&["other"]));
    }

    #[tokio::test]
    async fn test_fetch_failure_posts_nothing() {
        let api = Arc::new(FakeApi {
            reject_credential: true,
            ..FakeApi::with_files(three_files())
        });
        let err = run(api.clone(), &sample_pr(), RunOptions::default()).await.unwrap_err();

        assert!(matches!(err, RunError::Fetch(GitHubError::Unauthorized { status: 401, .. })));
        assert_eq!(api.calls(), vec![Call::ListFiles]);
    }

    #[tokio::test]
    async fn test_label_failure_aborts_before_comment() {
        let api = Arc::new(FakeApi {
            failing_label: Some("markdown"),
            ..FakeApi::with_files(three_files())
        });
        let err = run(api.clone(), &sample_pr(), RunOptions::default()).await.unwrap_err();

        match &err {
            RunError::Labels(LabelFailures(failures)) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].filename, "README.md");
                assert_eq!(failures[0].label, Label::Markdown);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("markdown for README.md"));
        // the loop stops at the first failure
        assert_eq!(
            api.calls(),
            vec![Call::ListFiles, labels(&["typescript"]), labels(&["markdown"])]
        );
    }

    #[tokio::test]
    async fn test_label_failure_continue_still_comments() {
        let api = Arc::new(FakeApi {
            failing_label: Some("markdown"),
            ..FakeApi::with_files(three_files())
        });
        let summary = run(api.clone(), &sample_pr(), continue_on_error()).await.unwrap();

        assert_eq!(summary.label_failures.len(), 1);
        assert_eq!(summary.label_failures[0].filename, "README.md");
        let calls = api.calls();
        assert_eq!(calls.len(), 5);
        assert_eq!(calls[3], labels(&["javascript"]));
        assert_eq!(
            calls[4],
            Call::AddComment("This PR has 17 additions, 23 changes and 6 deletions.".to_string())
        );
    }

    #[tokio::test]
    async fn test_parallel_labels_join_before_comment() {
        let api = Arc::new(FakeApi::with_files(three_files()));
        run(api.clone(), &sample_pr(), parallel(LabelErrorPolicy::Abort))
            .await
            .unwrap();

        let calls = api.calls();
        assert_eq!(calls.len(), 5);
        assert_eq!(calls[0], Call::ListFiles);
        for expected in [labels(&["typescript"]), labels(&["markdown"]), labels(&["javascript"])] {
            assert!(calls[1..4].contains(&expected));
        }
        assert!(matches!(calls[4], Call::AddComment(_)));
    }

    #[tokio::test]
    async fn test_parallel_failure_collects_and_aborts() {
        let api = Arc::new(FakeApi {
            failing_label: Some("markdown"),
            ..FakeApi::with_files(vec![
                ChangedFile::new("a.md", 1, 0, 1),
                ChangedFile::new("b.ts", 1, 0, 1),
                ChangedFile::new("c.md", 1, 0, 1),
            ])
        });
        let err = run(api.clone(), &sample_pr(), parallel(LabelErrorPolicy::Abort))
            .await
            .unwrap_err();

        match err {
            RunError::Labels(LabelFailures(failures)) => {
                let names: Vec<_> = failures.iter().map(|f| f.filename.as_str()).collect();
                assert_eq!(names, vec!["a.md", "c.md"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let calls = api.calls();
        // every label request settled, no comment
        assert_eq!(calls.len(), 4);
        assert!(!calls.iter().any(|c| matches!(c, Call::AddComment(_))));
    }

    #[tokio::test]
    async fn test_parallel_failure_continue() {
        let api = Arc::new(FakeApi {
            failing_label: Some("typescript"),
            ..FakeApi::with_files(three_files())
        });
        let summary = run(api.clone(), &sample_pr(), parallel(LabelErrorPolicy::Continue))
            .await
            .unwrap();
        assert_eq!(summary.label_failures.len(), 1);
        assert!(matches!(api.calls().last(), Some(Call::AddComment(_))));
    }

    #[tokio::test]
    async fn test_comment_failure_after_labels() {
        let api = Arc::new(FakeApi {
            failing_comment: true,
            ..FakeApi::with_files(three_files())
        });
        let err = run(api.clone(), &sample_pr(), RunOptions::default()).await.unwrap_err();

        assert!(matches!(err, RunError::Comment(_)));
        assert_eq!(api.calls().len(), 5);
    }

    #[tokio::test]
    async fn test_dry_run_makes_no_mutations() {
        let api = Arc::new(FakeApi::with_files(three_files()));
        let options = RunOptions {
            dry_run: true,
            ..RunOptions::default()
        };
        let summary = run(api.clone(), &sample_pr(), options).await.unwrap();

        assert!(summary.dry_run);
        assert_eq!(summary.comment, "This PR has 17 additions, 23 changes and 6 deletions.");
        assert_eq!(summary.analysis.classifications.len(), 3);
        assert_eq!(api.calls(), vec![Call::ListFiles]);
    }

    #[tokio::test]
    async fn test_duplicate_filenames_label_twice() {
        let api = Arc::new(FakeApi::with_files(vec![
            ChangedFile::new("README.md", 1, 0, 1),
            ChangedFile::new("README.md", 1, 0, 1),
        ]));
        run(api.clone(), &sample_pr(), RunOptions::default()).await.unwrap();
        assert_eq!(api.calls()[1..3], [labels(&["markdown"]), labels(&["markdown"])]);
    }

    async fn cancel_after(ms: u64) -> String {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        "timed out".to_string()
    }

    #[tokio::test]
    async fn test_cancel_while_labeling_sequential() {
        let api = Arc::new(FakeApi {
            hang_labels: true,
            ..FakeApi::with_files(three_files())
        });
        let pr = sample_pr();
        let labeling = run(api.clone(), &pr, RunOptions::default());
        let err = run_until(labeling, cancel_after(50)).await.unwrap_err();

        assert!(matches!(err, RunError::Cancelled(ref reason) if reason == "timed out"));
        assert_eq!(err.to_string(), "timed out, summary comment not posted");
        assert_eq!(api.comments(), 0);
        assert_eq!(api.calls(), vec![Call::ListFiles, labels(&["typescript"])]);
    }

    #[tokio::test]
    async fn test_cancel_while_labeling_parallel() {
        let api = Arc::new(FakeApi {
            hang_labels: true,
            ..FakeApi::with_files(three_files())
        });
        let pr = sample_pr();
        let labeling = run(api.clone(), &pr, parallel(LabelErrorPolicy::Abort));
        let err = run_until(labeling, cancel_after(50)).await.unwrap_err();

        assert!(matches!(err, RunError::Cancelled(_)));
        // dropped tasks are aborted, so nothing can post the comment later
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(api.comments(), 0);
    }

    #[tokio::test]
    async fn test_run_until_finishes_before_cancel() {
        let api = Arc::new(FakeApi::with_files(three_files()));
        let pr = sample_pr();
        let labeling = run(api.clone(), &pr, RunOptions::default());
        let summary = run_until(labeling, std::future::pending::<String>())
            .await
            .unwrap();
        assert_eq!(summary.analysis.classifications.len(), 3);
        assert_eq!(api.comments(), 1);
    }

    #[tokio::test]
    async fn test_parallel_labels_are_bounded() {
        let files: Vec<_> = (0..30)
            .map(|i| ChangedFile::new(&format!("src/f{}.ts", i), 1, 0, 1))
            .collect();
        let api = Arc::new(FakeApi {
            label_delay: Some(Duration::from_millis(10)),
            ..FakeApi::with_files(files)
        });
        run(api.clone(), &sample_pr(), parallel(LabelErrorPolicy::Abort))
            .await
            .unwrap();

        let peak = api.peak_in_flight.load(Ordering::SeqCst);
        assert!((1..=MAX_CONCURRENT_LABELS).contains(&peak), "peak in flight was {peak}");
        let calls = api.calls();
        assert_eq!(calls.len(), 32);
        assert!(matches!(calls.last(), Some(Call::AddComment(_))));
    }
}
