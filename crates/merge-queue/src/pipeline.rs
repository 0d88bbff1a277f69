//! Sequential merge pipeline.
//!
//! Processes the mergeable candidates strictly in ascending number order.
//! Each candidate walks rebase → CI trigger → CI-start wait → CI-completion
//! wait → merge; a failure at any step buckets the candidate and moves on
//! to the next one.

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Result;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::outcome::{OutcomeBucket, OutcomeSet};
use crate::platform::{MergeMethod, MergeOptions, MergeableState, Platform, PrState};
use crate::poll::{self, PollError};

/// Comment that triggers the CI listener.
const CI_TRIGGER_PHRASE: &str = "Ok to test";

/// Marker the CI listener posts back once its workflow run starts.
const CI_STARTED_MARKER: &str = "CI job started";

/// Seconds between polls for the CI-start signal.
const STARTUP_POLL_INTERVAL_SECS: u64 = 5;

fn run_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"actions/runs/(\d+)").expect("valid run-id regex"))
}

/// Extract the workflow run id from a CI-start comment.
fn extract_run_id(body: &str) -> Option<u64> {
    if !body.contains(CI_STARTED_MARKER) {
        return None;
    }
    run_id_regex()
        .captures(body)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

/// Drives candidates through the merge steps one at a time.
pub struct MergePipeline<'a> {
    platform: &'a dyn Platform,
    config: &'a Config,
}

impl<'a> MergePipeline<'a> {
    pub fn new(platform: &'a dyn Platform, config: &'a Config) -> Self {
        Self { platform, config }
    }

    /// Process all mergeable candidates sequentially, recording one outcome
    /// per candidate.
    ///
    /// # Errors
    ///
    /// Only cancellation aborts the pipeline; per-candidate failures become
    /// outcomes and the next candidate is processed.
    pub async fn run(
        &self,
        mergeable: &[u64],
        outcomes: &mut OutcomeSet,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if mergeable.is_empty() {
            info!("no mergeable PRs to process");
            return Ok(());
        }
        info!(order = ?mergeable, "merging PRs in chronological order");

        for &number in mergeable {
            let (bucket, reasons) = self.process_candidate(number, cancel).await?;
            let merged = bucket == OutcomeBucket::Merged;
            outcomes.record(number, bucket, reasons);
            if merged {
                // Let the platform converge before the next candidate.
                poll::idle(
                    Duration::from_secs(self.config.post_merge_settle),
                    cancel,
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Walk one candidate through the merge steps.
    async fn process_candidate(
        &self,
        number: u64,
        cancel: &CancellationToken,
    ) -> Result<(OutcomeBucket, Vec<String>)> {
        info!(pr = number, "processing candidate");

        // Step A: update the branch with the default branch.
        info!(pr = number, branch = %self.config.default_branch, "updating branch");
        if let Err(err) = self.platform.update_branch(number).await {
            warn!(pr = number, error = %err, "failed to update branch");
            return Ok((
                OutcomeBucket::FailedUpdate,
                vec![format!("could not update branch: {err}")],
            ));
        }

        // Step B: trigger CI; the comment's timestamp is the lower bound
        // for the start signal.
        info!(pr = number, "triggering CI");
        let trigger = match self.platform.add_comment(number, CI_TRIGGER_PHRASE).await {
            Ok(comment) => comment,
            Err(err) => {
                warn!(pr = number, error = %err, "failed to trigger CI");
                return Ok((
                    OutcomeBucket::FailedUpdate,
                    vec![format!("could not trigger CI: {err}")],
                ));
            }
        };

        // Step C: wait for the CI-start signal carrying the run id.
        info!(pr = number, "waiting for CI start signal");
        let trigger_time = trigger.created_at;
        let run_id = match poll::poll(
            Duration::from_secs(self.config.max_startup_wait),
            Duration::from_secs(STARTUP_POLL_INTERVAL_SECS),
            cancel,
            || async move {
                match self.platform.list_comments_after(number, trigger_time).await {
                    Ok(comments) => comments.iter().find_map(|c| extract_run_id(&c.body)),
                    Err(err) => {
                        warn!(pr = number, error = %err, "failed to list comments");
                        None
                    }
                }
            },
        )
        .await
        {
            Ok(run_id) => run_id,
            Err(PollError::TimedOut(_)) => {
                warn!(pr = number, "timed out waiting for CI start signal");
                return Ok((OutcomeBucket::CiStartupTimeout, vec![]));
            }
            Err(err @ PollError::Cancelled) => return Err(err.into()),
        };

        // Step D: wait for that workflow run to complete.
        info!(pr = number, run_id, "monitoring workflow run");
        let run = match poll::poll(
            Duration::from_secs(self.config.max_wait_seconds),
            Duration::from_secs(self.config.check_interval),
            cancel,
            || async move {
                match self.platform.get_workflow_run(run_id).await {
                    Ok(run) if run.is_complete() => Some(run),
                    Ok(run) => {
                        debug!(pr = number, run_id, status = ?run.status, "workflow run still running");
                        None
                    }
                    Err(err) => {
                        warn!(run_id, error = %err, "failed to get workflow run status");
                        None
                    }
                }
            },
        )
        .await
        {
            Ok(run) => run,
            Err(PollError::TimedOut(_)) => {
                warn!(pr = number, run_id, "timed out waiting for CI completion");
                return Ok((OutcomeBucket::CiTimeout, vec![]));
            }
            Err(err @ PollError::Cancelled) => return Err(err.into()),
        };

        if !run.name.is_empty() && run.name != self.config.required_ci_check {
            debug!(
                pr = number,
                run = %run.name,
                expected = %self.config.required_ci_check,
                "workflow run name differs from the configured CI check"
            );
        }
        if !run.succeeded() {
            let conclusion = run
                .conclusion
                .map_or_else(|| "unknown".to_string(), |c| c.to_string());
            warn!(pr = number, run_id, %conclusion, "CI failed");
            return Ok((
                OutcomeBucket::FailedCi,
                vec![format!("CI concluded with {conclusion}")],
            ));
        }
        info!(pr = number, run_id, "CI completed successfully");

        // Step E: merge.
        Ok(self.merge_candidate(number).await)
    }

    /// Final merge step: re-check state, decide branch deletion, squash
    /// merge, verify.
    async fn merge_candidate(&self, number: u64) -> (OutcomeBucket, Vec<String>) {
        info!(pr = number, "merging with squash");

        let snapshot = match self.platform.get_candidate(number).await {
            Ok(candidate) => Some(candidate),
            Err(err) => {
                warn!(
                    pr = number,
                    error = %err,
                    "could not re-fetch candidate before merge, attempting merge anyway"
                );
                None
            }
        };

        if let Some(candidate) = &snapshot {
            if candidate.state != PrState::Open {
                warn!(pr = number, state = %candidate.state, "candidate is no longer open");
                return (
                    OutcomeBucket::FailedMerge,
                    vec![format!("PR is not open (state: {})", candidate.state)],
                );
            }
            if candidate.mergeable == MergeableState::Conflicting {
                warn!(pr = number, "candidate has merge conflicts");
                if !candidate.author.is_empty() {
                    let message = merge_conflict_comment(&candidate.author);
                    if let Err(err) = self.platform.add_comment(number, &message).await {
                        warn!(pr = number, error = %err, "failed to add merge conflict comment");
                    }
                }
                return (
                    OutcomeBucket::FailedMerge,
                    vec!["Has merge conflicts (state=CONFLICTING)".to_string()],
                );
            }
        }

        let head_ref = snapshot.as_ref().map(|c| c.head_ref.clone());
        let delete_branch = match &head_ref {
            Some(branch) => match self.platform.get_branch_protection(branch).await {
                Ok(Some(_)) => {
                    info!(pr = number, branch = %branch, "keeping protected branch after merge");
                    false
                }
                Ok(None) => {
                    info!(pr = number, branch = %branch, "will delete branch after merge");
                    true
                }
                Err(err) => {
                    warn!(pr = number, branch = %branch, error = %err, "could not check branch protection, keeping branch");
                    false
                }
            },
            // Unknown branch name: keep it.
            None => false,
        };

        let head_name = head_ref.unwrap_or_else(|| "unknown-branch".to_string());
        let subject = format!("[Merge Queue]Merge Pull Request #{number} from {head_name}");
        let opts = MergeOptions {
            method: MergeMethod::Squash,
            delete_branch,
            subject,
            admin: true,
        };
        if let Err(err) = self.platform.merge_pr(number, &opts).await {
            warn!(pr = number, error = %err, "merge command failed");
            return (
                OutcomeBucket::FailedMerge,
                vec![format!("merge command failed: {err}")],
            );
        }

        // The merge call can report success while the PR stays open; the
        // final state is authoritative.
        match self.platform.get_candidate(number).await {
            Ok(candidate) if candidate.state == PrState::Merged => {
                info!(pr = number, "merged successfully");
                (OutcomeBucket::Merged, vec![])
            }
            Ok(candidate) => {
                warn!(
                    pr = number,
                    state = %candidate.state,
                    "merge command succeeded but PR is not merged"
                );
                (
                    OutcomeBucket::FailedMerge,
                    vec![format!(
                        "merge command succeeded but PR is still {}",
                        candidate.state
                    )],
                )
            }
            Err(err) => {
                info!(
                    pr = number,
                    error = %err,
                    "merge command succeeded (could not verify final state)"
                );
                (OutcomeBucket::Merged, vec![])
            }
        }
    }

    /// Merge the release PR with a merge commit, keeping its branch when
    /// protected.
    pub async fn merge_release(&self, release: u64, outcomes: &mut OutcomeSet) {
        info!(pr = release, branch = %self.config.default_branch, "merging release PR");

        let pull = match self.platform.get_candidate(release).await {
            Ok(candidate) => candidate,
            Err(err) => {
                warn!(pr = release, error = %err, "failed to get release PR details");
                outcomes.record(
                    release,
                    OutcomeBucket::FailedMerge,
                    vec!["Failed to retrieve PR information".to_string()],
                );
                return;
            }
        };

        let keep_branch = match self.platform.get_branch_protection(&pull.head_ref).await {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(err) => {
                warn!(pr = release, error = %err, "could not check branch protection, keeping branch");
                true
            }
        };

        let opts = MergeOptions {
            method: MergeMethod::Merge,
            delete_branch: !keep_branch,
            subject: format!("[Merge Queue] {}", pull.title),
            admin: true,
        };
        match self.platform.merge_pr(release, &opts).await {
            Ok(()) => {
                info!(pr = release, "release PR merged");
                outcomes.record(release, OutcomeBucket::Merged, vec![]);
            }
            Err(err) => {
                warn!(pr = release, error = %err, "failed to merge release PR");
                outcomes.record(
                    release,
                    OutcomeBucket::FailedMerge,
                    vec![format!("merge command failed: {err}")],
                );
            }
        }
    }
}

fn merge_conflict_comment(author: &str) -> String {
    format!(
        "@{author} ⚠️ **Merge Conflicts Detected**\n\n\
         This PR has merge conflicts that prevent it from being merged automatically. \
         The conflicts likely occurred after the latest changes were merged to the main branch.\n\n\
         **Next Steps:**\n\
         1. Pull the latest changes from the main branch\n\
         2. Resolve the merge conflicts in your branch\n\
         3. Push the resolved changes\n\
         4. The PR will be ready for the next merge cycle\n\n\
         *This comment was automatically generated by the merge queue workflow.*"
    )
}
