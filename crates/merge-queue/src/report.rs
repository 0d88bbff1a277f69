//! Final report and author notifications.
//!
//! Aggregates outcomes into the merge summary, posts it on the originator,
//! comments a bucket-specific message on every failed candidate, and closes
//! the originator when at least one candidate was processed. Reporter
//! failures are logged; they never abort cleanup.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::Config;
use crate::outcome::{OutcomeBucket, OutcomeSet};
use crate::platform::Platform;
use crate::request::MergeRequest;

/// Builds and publishes the cycle report.
pub struct Reporter<'a> {
    platform: &'a dyn Platform,
    config: &'a Config,
}

impl<'a> Reporter<'a> {
    pub fn new(platform: &'a dyn Platform, config: &'a Config) -> Self {
        Self { platform, config }
    }

    /// Publish the report and notifications. Returns whether the
    /// originator was closed.
    pub async fn publish(
        &self,
        request: &MergeRequest,
        outcomes: &OutcomeSet,
        required_approvals: u32,
    ) -> bool {
        let originator = request.originator;

        // One author lookup per failed candidate, reused across the
        // summary and the per-candidate notifications.
        let mut authors: HashMap<u64, String> = HashMap::new();
        for outcome in outcomes.failures() {
            let author = self.author_of(outcome.number).await;
            authors.insert(outcome.number, author);
        }

        let summary = build_summary(self.config, request, outcomes, &authors);
        let should_close = !request.candidates.is_empty() && outcomes.total() > 0;

        let framed = frame_summary(&summary, should_close);
        match self.platform.add_comment(originator, &framed).await {
            Ok(_) => info!(originator, "posted merge summary"),
            Err(err) => warn!(originator, error = %err, "failed to post merge summary"),
        }

        if should_close {
            info!(originator, "closing originator issue");
            if let Err(err) = self
                .platform
                .add_comment(
                    originator,
                    "Merge queue workflow completed. This issue is now closed automatically.",
                )
                .await
            {
                warn!(originator, error = %err, "failed to post closing comment");
            }
            if let Err(err) = self.platform.close_issue(originator).await {
                warn!(originator, error = %err, "failed to close originator issue");
            }
        } else {
            info!(originator, "no candidates processed, leaving originator open");
        }

        self.notify_failed_candidates(outcomes, &authors, required_approvals)
            .await;
        should_close
    }

    async fn author_of(&self, number: u64) -> String {
        match self.platform.get_pr_author(number).await {
            Ok(author) => author,
            Err(err) => {
                warn!(pr = number, error = %err, "failed to get PR author");
                "unknown".to_string()
            }
        }
    }

    /// Post the bucket-specific remediation message on each failed
    /// candidate, addressed to its author.
    async fn notify_failed_candidates(
        &self,
        outcomes: &OutcomeSet,
        authors: &HashMap<u64, String>,
        required_approvals: u32,
    ) {
        for outcome in outcomes.failures() {
            let author = authors
                .get(&outcome.number)
                .map_or("unknown", String::as_str);
            info!(pr = outcome.number, bucket = ?outcome.bucket, "notifying author of failure");

            let message = format!(
                "@{author}, {}",
                failure_message(self.config, outcome.bucket, required_approvals)
            );
            if let Err(err) = self.platform.add_comment(outcome.number, &message).await {
                warn!(pr = outcome.number, error = %err, "failed to comment on failed PR");
            }
        }
    }
}

/// The merge summary, section per bucket, failed entries annotated with
/// their author.
fn build_summary(
    config: &Config,
    request: &MergeRequest,
    outcomes: &OutcomeSet,
    authors: &HashMap<u64, String>,
) -> String {
    let branch = &config.default_branch;
    let date = Utc::now().format("%Y-%m-%d");
    let merged = outcomes.in_bucket(OutcomeBucket::Merged);

    let mut summary = format!(
        "# PR Merge Summary - {date}\n\n\
         ## Overview\n\
         - **Total PRs Requested**: {}\n\
         - **Successfully Merged**: {}\n\
         - **Failed to Merge**: {}\n\n\
         ## Successfully Merged PRs ✅\n",
        request.candidates.len(),
        outcomes.merged_count(),
        outcomes.failed_count(),
    );
    if merged.is_empty() {
        summary.push_str("- None");
    } else {
        summary.push_str(
            &merged
                .iter()
                .map(|pr| format!("- PR #{pr}"))
                .collect::<Vec<_>>()
                .join("\n"),
        );
    }

    summary.push_str("\n\n## Failed PRs by Category ❌\n");
    let ci_minutes = config.max_wait_seconds / 60;
    let startup_minutes = config.max_startup_wait / 60;
    let sections = [
        (
            OutcomeBucket::Unmergeable,
            "Initial Validation Failures".to_string(),
            format!("insufficient approvals, failing checks, or not targeting {branch}"),
        ),
        (
            OutcomeBucket::FailedUpdate,
            format!("Update with {} Failed", title_case(branch)),
            format!("could not update branch with {branch}"),
        ),
        (
            OutcomeBucket::FailedCi,
            "CI Checks Failed".to_string(),
            "CI checks failed after update".to_string(),
        ),
        (
            OutcomeBucket::CiTimeout,
            "CI Execution Timeout".to_string(),
            format!("CI did not complete within {ci_minutes} minutes"),
        ),
        (
            OutcomeBucket::CiStartupTimeout,
            "CI Startup Timeout".to_string(),
            format!("CI workflow did not start within {startup_minutes} minutes"),
        ),
        (
            OutcomeBucket::FailedMerge,
            "Merge Operation Failed".to_string(),
            "merge command failed (likely merge conflicts)".to_string(),
        ),
    ];

    for (bucket, heading, blurb) in sections {
        summary.push_str(&format!("\n### {heading}\n"));
        let numbers = outcomes.in_bucket(bucket);
        if numbers.is_empty() {
            summary.push_str("- None\n");
        } else {
            for pr in numbers {
                let author = authors.get(&pr).map_or("unknown", String::as_str);
                summary.push_str(&format!("- PR #{pr} (@{author}) - {blurb}\n"));
            }
        }
    }

    summary.push_str(&format!(
        "\n---\n@{} - Your merge queue request has been completed!\n\n\
         *Automated workflow execution*",
        request.submitter,
    ));
    summary
}

/// Canonical remediation text per failure bucket.
fn failure_message(config: &Config, bucket: OutcomeBucket, required_approvals: u32) -> String {
    let branch = &config.default_branch;
    let ci_minutes = config.max_wait_seconds / 60;
    let startup_minutes = config.max_startup_wait / 60;
    match bucket {
        OutcomeBucket::Merged => String::new(),
        OutcomeBucket::Unmergeable => format!(
            "❌ This PR could not be merged due to one or more of the following:\n\n\
             - Less than {required_approvals} approvals\n\
             - Failing or missing status checks\n\
             - Not up-to-date with `{branch}`\n\
             - Not targeting `{branch}`\n\n\
             Please address these issues to include it in the next merge cycle."
        ),
        OutcomeBucket::FailedUpdate => format!(
            "❌ This PR could not be updated with the latest `{branch}` branch. There may be \
             merge conflicts that need to be resolved manually.\n\n\
             Please resolve any conflicts and ensure the PR can be cleanly updated with `{branch}`."
        ),
        OutcomeBucket::FailedCi => format!(
            "❌ This PR's CI checks failed after being updated with `{branch}`. Please review \
             the failing checks and fix any issues.\n\n\
             The PR has been updated with the latest `{branch}` - please check if this caused \
             any new test failures."
        ),
        OutcomeBucket::CiTimeout => format!(
            "⏰ This PR's CI checks did not complete within the {ci_minutes}-minute timeout \
             period after being updated with `{branch}`.\n\n\
             The PR has been updated with the latest `{branch}` - please check the CI status \
             and re-run if needed."
        ),
        OutcomeBucket::CiStartupTimeout => format!(
            "⏰ This PR's CI workflow did not start within the {startup_minutes}-minute startup \
             timeout period after being triggered.\n\n\
             This may indicate issues with CI runner availability or workflow configuration. \
             The PR has been updated with the latest `{branch}` - please check the CI status \
             and re-trigger if needed."
        ),
        OutcomeBucket::FailedMerge => format!(
            "❌ This PR failed to merge despite passing all checks. This is most likely due to \
             merge conflicts that occurred after other PRs were merged to `{branch}`.\n\n\
             **If you received a merge conflict notification:** Please resolve the conflicts \
             in your branch and push the changes.\n\n\
             **If no conflicts were reported:** This may be due to a GitHub API issue. The PR \
             has been updated with the latest `{branch}` - please try merging manually or \
             contact the repository administrators."
        ),
    }
}

fn frame_summary(summary: &str, will_close: bool) -> String {
    let footer = if will_close {
        "*This merge queue request has been completed. The issue will now be closed automatically.*"
    } else {
        "*This merge queue request encountered issues and requires manual review. The issue will remain open.*"
    };
    format!("## 🎯 **Merge Queue Results**\n\n{summary}\n\n---\n{footer}")
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            repository: "5dlabs/demo".to_string(),
            ..Config::default()
        }
    }

    fn request() -> MergeRequest {
        MergeRequest {
            originator: 42,
            submitter: "alice".to_string(),
            candidates: vec![10, 20, 30],
            release_pr: None,
            approvals_override: None,
        }
    }

    fn outcomes() -> OutcomeSet {
        let mut set = OutcomeSet::default();
        set.record(10, OutcomeBucket::Unmergeable, vec!["conflicts".to_string()]);
        set.record(20, OutcomeBucket::Merged, vec![]);
        set.record(30, OutcomeBucket::FailedCi, vec![]);
        set
    }

    #[test]
    fn test_summary_sections_and_counts() {
        let mut authors = HashMap::new();
        authors.insert(10, "bob".to_string());
        authors.insert(30, "carol".to_string());

        let summary = build_summary(&config(), &request(), &outcomes(), &authors);
        assert!(summary.contains("- **Total PRs Requested**: 3"));
        assert!(summary.contains("- **Successfully Merged**: 1"));
        assert!(summary.contains("- **Failed to Merge**: 2"));
        assert!(summary.contains("- PR #20"));
        assert!(summary.contains(
            "- PR #10 (@bob) - insufficient approvals, failing checks, or not targeting main"
        ));
        assert!(summary.contains("- PR #30 (@carol) - CI checks failed after update"));
        assert!(summary.contains("### Update with Main Failed\n- None"));
        assert!(summary.contains("@alice - Your merge queue request has been completed!"));
    }

    #[test]
    fn test_summary_with_no_outcomes() {
        let summary = build_summary(&config(), &request(), &OutcomeSet::default(), &HashMap::new());
        assert!(summary.contains("- **Successfully Merged**: 0"));
        assert!(summary.contains("## Successfully Merged PRs ✅\n- None"));
    }

    #[test]
    fn test_unknown_author_fallback_in_summary() {
        let summary = build_summary(&config(), &request(), &outcomes(), &HashMap::new());
        assert!(summary.contains("- PR #10 (@unknown)"));
    }

    #[test]
    fn test_failure_messages_reference_branch_and_approvals() {
        let config = config();

        let unmergeable = failure_message(&config, OutcomeBucket::Unmergeable, 2);
        assert!(unmergeable.contains("Less than 2 approvals"));
        assert!(unmergeable.contains("`main`"));

        let timeout = failure_message(&config, OutcomeBucket::CiTimeout, 2);
        assert!(timeout.contains("45-minute timeout"));

        let startup = failure_message(&config, OutcomeBucket::CiStartupTimeout, 2);
        assert!(startup.contains("5-minute startup"));
    }

    #[test]
    fn test_frame_summary_footer_depends_on_close_decision() {
        let closing = frame_summary("body", true);
        assert!(closing.contains("will now be closed automatically"));
        let open = frame_summary("body", false);
        assert!(open.contains("will remain open"));
        assert!(open.starts_with("## 🎯 **Merge Queue Results**"));
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("main"), "Main");
        assert_eq!(title_case(""), "");
    }
}
