//! CLI entry point for the merge queue orchestrator.
//!
//! Run `merge-queue --help` for usage information.

// CLI binaries legitimately need println! for user output
#![allow(clippy::disallowed_macros)]

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use merge_queue::{Config, GitHubClient, Orchestrator, RunOutcome};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "merge-queue")]
#[command(about = "Automated pull-request merge queue orchestrator")]
#[command(version)]
struct Cli {
    /// Repository in owner/repo format
    #[arg(long, env = "REPOSITORY")]
    repository: String,

    /// Originating issue number carrying the merge request
    #[arg(long, env = "ISSUE_NUMBER")]
    issue: u64,

    /// GitHub token used for all platform operations
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: String,

    /// The integration branch all candidate PRs must target
    #[arg(long, env = "DEFAULT_BRANCH", default_value = "main")]
    default_branch: String,

    /// Team whose members may approve or reject the run
    #[arg(long, env = "APPROVER_GROUP", default_value = "merge-approvals")]
    approver_group: String,

    /// Workflow name the CI listener is expected to start
    #[arg(long, env = "REQUIRED_CI_CHECK", default_value = "run-tests")]
    required_ci_check: String,

    /// Workflow file of this orchestrator, for the competing-run check
    #[arg(long, env = "WORKFLOW_FILE", default_value = "merge_queue.yaml")]
    workflow_file: String,

    /// Maximum seconds to wait for CI completion
    #[arg(long, env = "MAX_WAIT_SECONDS", default_value = "2700")]
    max_wait_seconds: u64,

    /// Seconds between CI completion polls
    #[arg(long, env = "CHECK_INTERVAL", default_value = "30")]
    check_interval: u64,

    /// Maximum seconds to wait for the CI start signal
    #[arg(long, env = "MAX_STARTUP_WAIT", default_value = "300")]
    max_startup_wait: u64,

    /// Minutes before the approval request times out
    #[arg(long, env = "APPROVAL_TIMEOUT_MINUTES", default_value = "60")]
    approval_timeout_minutes: u64,

    /// Minutes between approval reminders
    #[arg(long, env = "APPROVAL_REMINDER_INTERVAL_MINUTES", default_value = "15")]
    approval_reminder_interval_minutes: u64,

    /// Seconds to let the platform converge after each merge
    #[arg(long, env = "POST_MERGE_SETTLE", default_value = "10")]
    post_merge_settle: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn to_config(&self) -> Config {
        Config {
            repository: self.repository.clone(),
            default_branch: self.default_branch.clone(),
            approver_team: self.approver_group.clone(),
            required_ci_check: self.required_ci_check.clone(),
            workflow_file: self.workflow_file.clone(),
            max_wait_seconds: self.max_wait_seconds,
            check_interval: self.check_interval,
            max_startup_wait: self.max_startup_wait,
            approval_timeout_minutes: self.approval_timeout_minutes,
            approval_reminder_interval_minutes: self.approval_reminder_interval_minutes,
            post_merge_settle: self.post_merge_settle,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let config = cli.to_config();
    let platform = GitHubClient::new(&cli.repository, &cli.token)?;
    let orchestrator = Orchestrator::new(Arc::new(platform), config);

    // Cancellation must interrupt every wait without skipping the lock
    // release, so the token is cancelled rather than the process killed.
    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("termination requested, cancelling run");
            watcher.cancel();
        }
    });

    match orchestrator.run(cli.issue, &cancel).await {
        Ok(RunOutcome::Completed {
            merged,
            failed,
            originator_closed,
        }) => {
            info!(merged, failed, originator_closed, "merge queue run complete");
            println!("Merged {merged} PR(s), {failed} failure(s)");
            Ok(())
        }
        Ok(RunOutcome::DuplicateRun { tracking_issue }) => {
            info!(tracking_issue, "duplicate run prevented");
            println!("A merge queue run is already in progress (tracking issue #{tracking_issue})");
            Ok(())
        }
        Ok(RunOutcome::Blocked { active_runs }) => {
            info!(active_runs, "run blocked by competing workflows");
            println!("Blocked: {active_runs} merge queue workflow runs already active");
            Ok(())
        }
        Ok(RunOutcome::Rejected { rejector }) => {
            info!(%rejector, "run rejected");
            println!("Merge queue request rejected by @{rejector}");
            Ok(())
        }
        Ok(RunOutcome::ApprovalTimeout) => {
            info!("approval timed out");
            println!("Merge queue request timed out waiting for approval");
            Ok(())
        }
        Err(err) => {
            error!(error = ?err, "merge queue run failed");
            Err(err)
        }
    }
}
