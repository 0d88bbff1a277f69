//! Distributed lock backed by a labelled tracking issue.
//!
//! The existence of an open issue carrying the lock label and the
//! originator's title pattern *is* the lock. Acquisition scans the label
//! namespace, then creates the tracking issue; release stamps it with a
//! completion status and closes it on every exit path.

use tracing::{info, warn};

use crate::config::Config;
use crate::platform::{IssueState, Platform, PlatformError};
use crate::request::MergeRequest;

/// Label that scopes the lock scan to active locks only.
pub const LOCK_LABEL: &str = "distributed-lock";

/// Secondary label on tracking issues.
pub const AUTOMATION_LABEL: &str = "automation";

/// Title of the tracking issue for an originator.
#[must_use]
pub fn tracking_title(originator: u64) -> String {
    format!("[MERGE QUEUE TRACKING] Issue #{originator} - Auto Merge In Progress")
}

// Trailing separator so the scan for issue #4 cannot match issue #42.
fn tracking_title_prefix(originator: u64) -> String {
    format!("[MERGE QUEUE TRACKING] Issue #{originator} -")
}

/// Terminal status stamped on the tracking issue at release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Completed,
    Rejected,
    Timeout,
    Failed,
}

impl CompletionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Timeout => "timeout",
            Self::Failed => "failed",
        }
    }

    fn title(self) -> &'static str {
        match self {
            Self::Completed => "Completed",
            Self::Rejected => "Rejected",
            Self::Timeout => "Timeout",
            Self::Failed => "Failed",
        }
    }

    fn emoji(self) -> &'static str {
        match self {
            Self::Completed => "✅",
            Self::Rejected => "❌",
            Self::Timeout => "⏰",
            Self::Failed => "💥",
        }
    }
}

impl std::fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of a lock acquisition attempt.
#[derive(Debug)]
pub enum LockAcquisition {
    /// Lock acquired; the tracking issue number.
    Acquired(u64),
    /// Another run already holds the lock for this originator.
    Held { tracking_issue: u64 },
    /// Too many orchestrator workflow runs are in progress.
    Contended { active_runs: usize },
}

/// Acquires and releases the tracking-issue lock.
pub struct LockManager<'a> {
    platform: &'a dyn Platform,
    config: &'a Config,
}

impl<'a> LockManager<'a> {
    pub fn new(platform: &'a dyn Platform, config: &'a Config) -> Self {
        Self { platform, config }
    }

    /// Attempt to acquire the lock for an originator.
    ///
    /// On `Held` / `Contended` the explanatory comment has already been
    /// posted on the originator; the caller must exit without touching the
    /// queue.
    ///
    /// # Errors
    ///
    /// Returns an error when the label scan or the tracking-issue creation
    /// fails; creation failure is fatal for the run.
    pub async fn acquire(&self, request: &MergeRequest) -> Result<LockAcquisition, PlatformError> {
        let originator = request.originator;
        info!(originator, "checking for existing tracking issue");

        let prefix = tracking_title_prefix(originator);
        let open_locks = self
            .platform
            .list_issues_by_label(LOCK_LABEL, IssueState::Open)
            .await?;
        if let Some(existing) = open_locks.iter().find(|i| i.title.starts_with(&prefix)) {
            warn!(
                originator,
                tracking_issue = existing.number,
                "duplicate run detected, lock already held"
            );
            self.post_on_originator(originator, &duplicate_message(existing.number))
                .await;
            return Ok(LockAcquisition::Held {
                tracking_issue: existing.number,
            });
        }

        // One in-progress run of our own workflow is expected (this one);
        // more than one means a competing orchestrator slipped in.
        match self
            .platform
            .count_in_progress_runs(&self.config.workflow_file)
            .await
        {
            Ok(active_runs) if active_runs > 1 => {
                warn!(originator, active_runs, "competing workflow runs detected");
                self.post_on_originator(
                    originator,
                    &consecutive_execution_message(active_runs, &self.config.repository),
                )
                .await;
                return Ok(LockAcquisition::Contended { active_runs });
            }
            Ok(_) => {}
            Err(err) => {
                // The label scan is the authoritative check; a failed run
                // count is not grounds to block the cycle.
                warn!(originator, error = %err, "could not count workflow runs");
            }
        }

        let number = self
            .platform
            .create_issue(
                &tracking_title(originator),
                &tracking_body(request),
                &[LOCK_LABEL, AUTOMATION_LABEL],
            )
            .await?;
        info!(originator, tracking_issue = number, "tracking issue created");
        Ok(LockAcquisition::Acquired(number))
    }

    /// Release the lock: stamp the tracking issue with the completion
    /// status and close it. Failures are logged, never propagated.
    pub async fn release(&self, tracking_issue: u64, status: CompletionStatus) {
        info!(tracking_issue, status = %status, "closing tracking issue");

        if let Err(err) = self
            .platform
            .add_comment(tracking_issue, &completion_comment(status))
            .await
        {
            warn!(tracking_issue, error = %err, "failed to add completion comment");
        }

        if let Err(err) = self.platform.close_issue(tracking_issue).await {
            // The label scan keeps rejecting new runs until an operator
            // closes the issue by hand.
            warn!(tracking_issue, error = %err, "failed to close tracking issue");
        }
    }

    async fn post_on_originator(&self, originator: u64, body: &str) {
        if let Err(err) = self.platform.add_comment(originator, body).await {
            warn!(originator, error = %err, "failed to comment on originator");
        }
    }
}

fn tracking_body(request: &MergeRequest) -> String {
    let release = request
        .release_pr
        .map_or_else(|| "None".to_string(), |n| format!("#{n}"));
    format!(
        "🔒 **Merge Queue Lock**\n\n\
         **Original Issue**: #{}\n\
         **Requested by**: @{}\n\
         **PR Numbers**: {}\n\
         **Release PR**: {}\n\n\
         This issue acts as a distributed lock for the merge queue. \
         It will be closed automatically when the process completes.",
        request.originator,
        request.submitter,
        request.candidates_csv(),
        release,
    )
}

fn duplicate_message(tracking_issue: u64) -> String {
    format!(
        "⚠️ **Duplicate Merge Queue Request Detected**\n\n\
         A merge queue process is already running for this issue.\n\n\
         **Tracking Issue**: #{tracking_issue}\n\
         **Action Required**: Wait for the current process to complete.\n\n\
         **Monitor Progress**: Check the tracking issue above for status updates.\n\n\
         **Retry**: Once the current process completes, you can comment `begin-merge` again if needed."
    )
}

fn consecutive_execution_message(active_runs: usize, repository: &str) -> String {
    format!(
        "⚠️ **Consecutive Execution Prevented**\n\n\
         There are already active merge queue workflows running:\n\
         • Merge Queue workflows: {active_runs}\n\n\
         **Action Required**: Wait for the current workflows to complete before starting a new merge queue process.\n\n\
         **Monitor Progress**: [View Active Workflows](https://github.com/{repository}/actions)\n\n\
         **Retry**: Comment `begin-merge` again once all workflows have completed."
    )
}

fn completion_comment(status: CompletionStatus) -> String {
    format!(
        "{} **Merge Queue Process {}**\n\n\
         The merge queue process has {}.\n\n\
         This tracking issue is now being closed automatically.",
        status.emoji(),
        status.title(),
        status.as_str(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracking_title_format() {
        assert_eq!(
            tracking_title(42),
            "[MERGE QUEUE TRACKING] Issue #42 - Auto Merge In Progress"
        );
        assert!(tracking_title(42).starts_with(&tracking_title_prefix(42)));
    }

    #[test]
    fn test_title_prefix_does_not_match_other_originators() {
        // #4 must not match the tracking issue of #42.
        assert!(!tracking_title(42).starts_with(&tracking_title_prefix(4)));
    }

    #[test]
    fn test_completion_status_strings() {
        assert_eq!(CompletionStatus::Completed.as_str(), "completed");
        assert_eq!(CompletionStatus::Rejected.as_str(), "rejected");
        assert_eq!(CompletionStatus::Timeout.as_str(), "timeout");
        assert_eq!(CompletionStatus::Failed.as_str(), "failed");
    }

    #[test]
    fn test_completion_comment_mentions_status() {
        let comment = completion_comment(CompletionStatus::Timeout);
        assert!(comment.contains("⏰ **Merge Queue Process Timeout**"));
        assert!(comment.contains("The merge queue process has timeout."));
    }

    #[test]
    fn test_tracking_body_lists_candidates_and_release() {
        let request = MergeRequest {
            originator: 42,
            submitter: "alice".to_string(),
            candidates: vec![101, 102],
            release_pr: Some(200),
            approvals_override: None,
        };
        let body = tracking_body(&request);
        assert!(body.contains("**Original Issue**: #42"));
        assert!(body.contains("**PR Numbers**: 101, 102"));
        assert!(body.contains("**Release PR**: #200"));
    }
}
