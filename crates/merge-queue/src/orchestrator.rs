//! Run wiring and cleanup.
//!
//! Sequences lock → approval → validation → merge pipeline → report, and
//! guarantees the tracking-issue lock is released with the proper status on
//! every exit path, including cancellation and fatal errors.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::approval::{ApprovalController, ApprovalVerdict};
use crate::config::Config;
use crate::lock::{CompletionStatus, LockAcquisition, LockManager};
use crate::outcome::OutcomeSet;
use crate::pipeline::MergePipeline;
use crate::platform::Platform;
use crate::report::Reporter;
use crate::request::{extraction_error_comment, MergeRequest};
use crate::validate::Validator;

/// How a run ended. Every variant exits 0; fatal errors surface as `Err`.
#[derive(Debug)]
pub enum RunOutcome {
    /// The full cycle ran; per-candidate failures are in the report.
    Completed {
        merged: usize,
        failed: usize,
        originator_closed: bool,
    },
    /// Another run already holds the lock for this originator.
    DuplicateRun { tracking_issue: u64 },
    /// Competing orchestrator workflow runs blocked the cycle.
    Blocked { active_runs: usize },
    /// An authorized member rejected the run.
    Rejected { rejector: String },
    /// Nobody approved within the window.
    ApprovalTimeout,
}

/// Owns one merge-queue cycle for one originator.
pub struct Orchestrator {
    platform: Arc<dyn Platform>,
    config: Config,
}

impl Orchestrator {
    pub fn new(platform: Arc<dyn Platform>, config: Config) -> Self {
        Self {
            platform,
            config: config.normalized(),
        }
    }

    /// Run the full cycle for an originator issue.
    ///
    /// # Errors
    ///
    /// Returns an error only for orchestrator-fatal conditions: the
    /// originator cannot be fetched or parsed, the lock cannot be created,
    /// or the run is cancelled. Per-candidate failures are reported, not
    /// raised.
    pub async fn run(&self, originator: u64, cancel: &CancellationToken) -> Result<RunOutcome> {
        let platform = self.platform.as_ref();
        info!(originator, repository = %self.config.repository, "merge queue run starting");

        let issue = platform
            .get_issue(originator)
            .await
            .with_context(|| format!("failed to fetch originator issue #{originator}"))?;

        let request = match MergeRequest::parse(originator, &issue.author, &issue.body) {
            Ok(request) => request,
            Err(err) => {
                error!(originator, error = %err, "could not parse originator body");
                if let Err(post_err) = platform
                    .add_comment(originator, &extraction_error_comment(&err))
                    .await
                {
                    warn!(originator, error = %post_err, "failed to post extraction error");
                }
                return Err(err).context("originator body is not a valid merge request");
            }
        };
        info!(
            originator,
            submitter = %request.submitter,
            candidates = ?request.candidates,
            release = ?request.release_pr,
            "merge request extracted"
        );

        let lock = LockManager::new(platform, &self.config);
        let tracking_issue = match lock
            .acquire(&request)
            .await
            .context("failed to acquire merge queue lock")?
        {
            LockAcquisition::Acquired(number) => number,
            LockAcquisition::Held { tracking_issue } => {
                info!(originator, tracking_issue, "exiting, lock already held");
                return Ok(RunOutcome::DuplicateRun { tracking_issue });
            }
            LockAcquisition::Contended { active_runs } => {
                info!(originator, active_runs, "exiting, competing runs in progress");
                return Ok(RunOutcome::Blocked { active_runs });
            }
        };

        // Everything after this point runs under the lock; release it with
        // the matching status on every exit path.
        let result = self.execute(&request, cancel).await;
        let status = match &result {
            Ok(RunOutcome::Rejected { .. }) => CompletionStatus::Rejected,
            Ok(RunOutcome::ApprovalTimeout) => CompletionStatus::Timeout,
            Ok(_) => CompletionStatus::Completed,
            Err(_) => CompletionStatus::Failed,
        };
        lock.release(tracking_issue, status).await;
        result
    }

    /// The lock-guarded portion of the cycle. The reporter runs on every
    /// path with whatever outcomes exist.
    async fn execute(
        &self,
        request: &MergeRequest,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let platform = self.platform.as_ref();

        let mut approval = ApprovalController::new(platform, &self.config);
        let verdict = approval.await_decision(request, cancel).await;

        let mut outcomes = OutcomeSet::default();
        let mut required_approvals: u32 = 1;
        let mut early: Option<RunOutcome> = None;
        let mut fatal: Option<anyhow::Error> = None;

        match verdict {
            Ok(ApprovalVerdict::Approved { approver }) => {
                info!(%approver, "run approved, processing candidates");
                if let Err(err) = self
                    .drive(request, &mut outcomes, &mut required_approvals, cancel)
                    .await
                {
                    fatal = Some(err);
                }
            }
            Ok(ApprovalVerdict::Rejected { rejector }) => {
                early = Some(RunOutcome::Rejected { rejector });
            }
            Ok(ApprovalVerdict::TimedOut) => {
                early = Some(RunOutcome::ApprovalTimeout);
            }
            Err(err) => fatal = Some(err),
        }

        let reporter = Reporter::new(platform, &self.config);
        let originator_closed = reporter
            .publish(request, &outcomes, required_approvals)
            .await;

        if let Some(err) = fatal {
            return Err(err);
        }
        if let Some(outcome) = early {
            return Ok(outcome);
        }
        Ok(RunOutcome::Completed {
            merged: outcomes.merged_count(),
            failed: outcomes.failed_count(),
            originator_closed,
        })
    }

    /// Validate and merge. Per-candidate failures land in `outcomes`; only
    /// cancellation aborts.
    async fn drive(
        &self,
        request: &MergeRequest,
        outcomes: &mut OutcomeSet,
        required_approvals: &mut u32,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let platform = self.platform.as_ref();

        let validator = Validator::new(platform, &self.config);
        *required_approvals = validator
            .required_approvals(request.approvals_override)
            .await;
        let report = validator
            .validate(request, *required_approvals, outcomes)
            .await?;

        let pipeline = MergePipeline::new(platform, &self.config);
        pipeline.run(&report.mergeable, outcomes, cancel).await?;

        if let Some(release) = request.release_pr {
            if report.release_ok {
                pipeline.merge_release(release, outcomes).await;
            } else {
                warn!(pr = release, "skipping release PR merge, validation failed");
            }
        }
        Ok(())
    }
}
