use colored::Colorize;
use std::io::{self, Write};

use crate::analysis::{DiffStats, Label};
use crate::run::RunSummary;

/// The body of the summary comment posted on the pull request.
pub fn comment_body(stats: &DiffStats) -> String {
    format!(
        "This PR has {} additions, {} changes and {} deletions.",
        stats.additions, stats.changes, stats.deletions
    )
}

/// Print a human-readable summary of a finished run to stdout.
pub fn print_summary(summary: &RunSummary) {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    // stdout going away mid-print (e.g., a closed pipe) is not worth failing the run for
    let _ = write_summary(&mut out, summary, true);
}

/// Format the run summary. Layout:
///
/// PR org/repo#42 (dry run)
///   typescript   index.ts
///   markdown     README.md
///
/// +13 -2 (15 changes)
/// Comment: "This PR has 13 additions, 15 changes and 2 deletions."
pub fn write_summary(out: &mut impl Write, summary: &RunSummary, color: bool) -> io::Result<()> {
    let suffix = if summary.dry_run { " (dry run)" } else { "" };
    writeln!(out)?;
    writeln!(out, "PR {}{}", summary.pr, suffix)?;

    if summary.analysis.classifications.is_empty() {
        writeln!(out, "  No changed files.")?;
    }
    for classification in &summary.analysis.classifications {
        let label = format!("{:<12}", classification.label.as_str());
        let label = if color {
            colorize_label(classification.label, &label).to_string()
        } else {
            label
        };
        writeln!(out, "  {} {}", label, classification.filename)?;
    }
    writeln!(out)?;

    let stats = &summary.analysis.stats;
    let (added, deleted) = (format!("+{}", stats.additions), format!("-{}", stats.deletions));
    if color {
        writeln!(out, "{} {} ({} changes)", added.green(), deleted.red(), stats.changes)?;
    } else {
        writeln!(out, "{} {} ({} changes)", added, deleted, stats.changes)?;
    }
    writeln!(out, "Comment: \"{}\"", summary.comment)?;

    if !summary.label_failures.is_empty() {
        writeln!(out)?;
        let heading = format!("{} label request(s) failed:", summary.label_failures.len());
        if color {
            writeln!(out, "{}", heading.yellow().bold())?;
        } else {
            writeln!(out, "{}", heading)?;
        }
        for failure in &summary.label_failures {
            writeln!(out, "  • {}", failure)?;
        }
    }
    Ok(())
}

/// Report a terminal failure: always on stderr, and as an `::error::`
/// workflow command when running inside GitHub Actions.
pub fn report_failure(message: &str) {
    eprintln!("{} {}", "error:".red().bold(), message);
    if in_github_actions() {
        println!("{}", workflow_error(message));
    }
}

fn in_github_actions() -> bool {
    std::env::var("GITHUB_ACTIONS").is_ok_and(|v| v == "true")
}

/// Encode `message` as a GitHub Actions `::error::` command. Line breaks
/// and `%` must be escaped to survive the single-line protocol.
fn workflow_error(message: &str) -> String {
    let escaped = message
        .replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A");
    format!("::error::{}", escaped)
}

fn colorize_label(label: Label, text: &str) -> colored::ColoredString {
    match label {
        Label::Javascript => text.yellow(),
        Label::Typescript => text.blue(),
        Label::Yaml => text.magenta(),
        Label::Markdown => text.cyan(),
        Label::Other => text.dimmed(),
    }
}
