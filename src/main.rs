mod analysis;
mod config;
mod github;
mod pr;
mod report;
mod run;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, Instrument};
use tracing_subscriber::EnvFilter;

use crate::config::{FileConfig, Inputs, RunConfig};
use crate::github::GitHubClient;

/// PR Labeler — labels a GitHub Pull Request by the type of each changed file
/// and posts one comment with the aggregate diff statistics.
///
/// Every input can also come from the matching INPUT_* environment variable,
/// which is how a GitHub Actions step passes `with:` values.
#[derive(Parser, Debug)]
#[command(name = "pr-labeler", version, about)]
struct Cli {
    /// Repository owner or organization
    #[arg(long, env = "INPUT_OWNER")]
    owner: Option<String>,

    /// Repository name
    #[arg(long, env = "INPUT_REPO")]
    repo: Option<String>,

    /// Pull request number
    #[arg(long, env = "INPUT_PR_NUMBER")]
    pr_number: Option<String>,

    /// GitHub Pull Request URL, instead of --owner/--repo/--pr-number
    /// (e.g., https://github.com/org/repo/pull/42)
    #[arg(long)]
    url: Option<String>,

    /// GitHub API token. Falls back to the config file, then GITHUB_TOKEN.
    #[arg(long, env = "INPUT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// GitHub REST API root (for GitHub Enterprise)
    #[arg(long, env = "INPUT_API_URL")]
    api_url: Option<String>,

    /// Config file path (defaults to .pr-labeler.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Apply labels concurrently
    #[arg(long)]
    parallel: bool,

    /// Keep going when a label request fails and still post the comment
    #[arg(long)]
    continue_on_error: bool,

    /// Fetch and classify only; change nothing on GitHub
    #[arg(long)]
    dry_run: bool,

    /// Abandon the run after this many seconds
    #[arg(long)]
    timeout: Option<u64>,
}

impl Cli {
    fn inputs(&self) -> Inputs {
        Inputs {
            owner: self.owner.clone(),
            repo: self.repo.clone(),
            pr_number: self.pr_number.clone(),
            url: self.url.clone(),
            token: self.token.clone(),
            api_url: self.api_url.clone(),
            parallel: self.parallel,
            continue_on_error: self.continue_on_error,
            dry_run: self.dry_run,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match try_main(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report::report_failure(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

async fn try_main(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    info!("loading configuration");
    let file = FileConfig::load(cli.config.as_deref())?;
    let config = RunConfig::resolve(cli.inputs(), file)?;
    debug!(pr = %config.pr, api_url = %config.api_url, options = ?config.options, "resolved configuration");

    let client = GitHubClient::new(&config.api_url, config.token.clone())?;
    let span = info_span!("pr_label", pr = %config.pr);
    let labeling = run::run(Arc::new(client), &config.pr, config.options).instrument(span);
    let summary = run::run_until(labeling, cancellation(cli.timeout)).await?;

    report::print_summary(&summary);
    info!(
        labels = summary.analysis.classifications.len(),
        failed = summary.label_failures.len(),
        "done"
    );
    Ok(())
}

/// Resolves with a reason once the user interrupts or `timeout` seconds pass.
async fn cancellation(timeout: Option<u64>) -> String {
    let deadline = async {
        match timeout {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        Ok(()) = tokio::signal::ctrl_c() => "interrupted".to_string(),
        _ = deadline => format!("timed out after {}s", timeout.unwrap_or_default()),
    }
}
