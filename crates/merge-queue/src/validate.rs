//! Candidate validation.
//!
//! Classifies each candidate as mergeable or unmergeable from a fresh
//! snapshot, resolves the required-approval count, and notifies authors
//! about the actionable failure classes.

use anyhow::Result;
use tracing::{info, warn};

use crate::config::Config;
use crate::outcome::{OutcomeBucket, OutcomeSet};
use crate::platform::{Candidate, MergeableState, Platform, PrState};
use crate::request::MergeRequest;

/// A single failed validation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    NotOpen { state: PrState },
    WrongBase { base: String },
    Conflicting,
    InsufficientApprovals { have: usize, needed: u32 },
    FailingChecks { checks: Vec<String> },
}

impl Violation {
    /// Human-readable reason string for reports.
    #[must_use]
    pub fn reason(&self, default_branch: &str) -> String {
        match self {
            Self::NotOpen { state } => format!("PR is not open (state: {state})"),
            Self::WrongBase { base } => format!(
                "Does not target '{default_branch}' (targets '{base}') - all PRs must target the default branch '{default_branch}'"
            ),
            Self::Conflicting => "Has merge conflicts (state=CONFLICTING)".to_string(),
            Self::InsufficientApprovals { have, needed } => {
                format!("Has {have} approvals, but {needed} are required")
            }
            Self::FailingChecks { checks } => {
                format!("Has failing/missing checks: {}", checks.join(", "))
            }
        }
    }
}

/// Evaluate a snapshot against the merge criteria. Deterministic given the
/// snapshot and the required-approval count. A closed PR short-circuits;
/// an UNKNOWN mergeable state is accepted and re-checked at merge time.
#[must_use]
pub fn evaluate_candidate(
    candidate: &Candidate,
    required_approvals: u32,
    default_branch: &str,
) -> Vec<Violation> {
    if candidate.state != PrState::Open {
        return vec![Violation::NotOpen {
            state: candidate.state,
        }];
    }

    let mut violations = Vec::new();
    if candidate.base_ref != default_branch {
        violations.push(Violation::WrongBase {
            base: candidate.base_ref.clone(),
        });
    }
    if candidate.mergeable == MergeableState::Conflicting {
        violations.push(Violation::Conflicting);
    }
    let have = candidate.approval_count();
    if (have as u64) < u64::from(required_approvals) {
        violations.push(Violation::InsufficientApprovals {
            have,
            needed: required_approvals,
        });
    }
    let failing = candidate.failing_checks();
    if !failing.is_empty() {
        violations.push(Violation::FailingChecks { checks: failing });
    }
    violations
}

/// Result of validating a request's candidates.
#[derive(Debug)]
pub struct ValidationReport {
    /// Mergeable candidates in ascending number order; this is the merge
    /// order.
    pub mergeable: Vec<u64>,
    pub required_approvals: u32,
    /// Whether the release PR (if any) passed validation.
    pub release_ok: bool,
}

/// Validates candidates and notifies authors.
pub struct Validator<'a> {
    platform: &'a dyn Platform,
    config: &'a Config,
}

impl<'a> Validator<'a> {
    pub fn new(platform: &'a dyn Platform, config: &'a Config) -> Self {
        Self { platform, config }
    }

    /// Resolve the required-approval count: positive override, else branch
    /// protection of the default branch, else 1.
    pub async fn required_approvals(&self, approvals_override: Option<u32>) -> u32 {
        if let Some(count) = approvals_override {
            info!(count, "using manually specified required approvals");
            return count;
        }

        match self
            .platform
            .get_branch_protection(&self.config.default_branch)
            .await
        {
            Ok(Some(protection)) => {
                let count = protection.required_approving_review_count.unwrap_or(0);
                info!(count, "required approvals from branch protection");
                count
            }
            Ok(None) => {
                warn!("no branch protection info available, defaulting to 1 required approval");
                1
            }
            Err(err) => {
                warn!(error = %err, "branch protection lookup failed, defaulting to 1 required approval");
                1
            }
        }
    }

    /// Validate all regular candidates (recording unmergeable outcomes) and
    /// the optional release PR.
    ///
    /// # Errors
    ///
    /// This method does not fail on per-candidate problems; those become
    /// outcomes. It only bubbles cancellation-level errors from the
    /// platform, which it does not currently produce.
    pub async fn validate(
        &self,
        request: &MergeRequest,
        required_approvals: u32,
        outcomes: &mut OutcomeSet,
    ) -> Result<ValidationReport> {
        let mut mergeable = Vec::new();

        for &number in &request.candidates {
            info!(pr = number, "validating candidate");
            match self.validate_one(number, required_approvals).await {
                Ok(()) => mergeable.push(number),
                Err(reasons) => {
                    for reason in &reasons {
                        info!(pr = number, %reason, "candidate rejected");
                    }
                    outcomes.record(number, OutcomeBucket::Unmergeable, reasons);
                }
            }
        }

        let release_ok = match request.release_pr {
            Some(release) => {
                info!(pr = release, "validating release PR");
                match self.validate_one(release, required_approvals).await {
                    Ok(()) => true,
                    Err(reasons) => {
                        // The release PR is handled separately from the
                        // regular queue; it is only excluded from the
                        // release-merge step.
                        for reason in &reasons {
                            warn!(pr = release, %reason, "release PR validation failed");
                        }
                        false
                    }
                }
            }
            None => false,
        };

        info!(
            mergeable = mergeable.len(),
            unmergeable = outcomes.in_bucket(OutcomeBucket::Unmergeable).len(),
            "validation complete"
        );
        Ok(ValidationReport {
            mergeable,
            required_approvals,
            release_ok,
        })
    }

    /// Validate a single PR; `Err` carries the failure reasons.
    async fn validate_one(
        &self,
        number: u64,
        required_approvals: u32,
    ) -> std::result::Result<(), Vec<String>> {
        let candidate = match self.platform.get_candidate(number).await {
            Ok(candidate) => candidate,
            Err(err) => {
                warn!(pr = number, error = %err, "failed to fetch candidate");
                return Err(vec!["Failed to retrieve PR information".to_string()]);
            }
        };

        let violations = evaluate_candidate(&candidate, required_approvals, &self.config.default_branch);
        if violations.is_empty() {
            info!(pr = number, "candidate is mergeable");
            return Ok(());
        }

        for violation in &violations {
            self.notify_author(&candidate, violation).await;
        }
        Err(violations
            .iter()
            .map(|v| v.reason(&self.config.default_branch))
            .collect())
    }

    /// Post an author-directed comment for the actionable failure classes.
    async fn notify_author(&self, candidate: &Candidate, violation: &Violation) {
        let author = &candidate.author;
        if author.is_empty() {
            return;
        }
        let message = match violation {
            Violation::WrongBase { base } => {
                base_branch_notice(candidate.number, author, base, &self.config.default_branch)
            }
            Violation::Conflicting => {
                conflict_notice(candidate.number, author, &self.config.default_branch)
            }
            Violation::InsufficientApprovals { have, needed } => {
                approvals_notice(candidate.number, author, *have, *needed)
            }
            Violation::NotOpen { .. } | Violation::FailingChecks { .. } => return,
        };
        if let Err(err) = self.platform.add_comment(candidate.number, &message).await {
            warn!(pr = candidate.number, error = %err, "failed to notify author");
        }
    }
}

fn base_branch_notice(number: u64, author: &str, current: &str, expected: &str) -> String {
    format!(
        "⚠️ **Base Branch Issue - Action Required**\n\n\
         @{author}, your PR #{number} is targeting the `{current}` branch, but the merge queue \
         requires all PRs to target the default branch `{expected}`.\n\n\
         **Required Action:**\n\
         1. Change the base branch of this PR from `{current}` to `{expected}`\n\
         2. Resolve any merge conflicts that may arise\n\
         3. Ensure all status checks pass\n\n\
         **How to Change Base Branch:**\n\
         - Go to your PR page\n\
         - Click \"Edit\" next to the PR title\n\
         - Change the base branch to `{expected}`\n\
         - Update your branch if needed: `git rebase origin/{expected}`\n\n\
         **Why This Matters:**\n\
         The merge queue is designed to merge PRs sequentially into the default branch \
         (`{expected}`) to maintain a clean, linear history.\n\n\
         *This is an automated notification from the merge queue validation process.*"
    )
}

fn conflict_notice(number: u64, author: &str, base_branch: &str) -> String {
    format!(
        "⚠️ **Merge Conflicts Detected - Action Required**\n\n\
         @{author}, your PR #{number} has merge conflicts with the `{base_branch}` branch and \
         cannot be merged automatically.\n\n\
         **Required Action:**\n\
         1. Update your branch with the latest changes from `{base_branch}`\n\
         2. Resolve all merge conflicts\n\
         3. Push the resolved changes to your branch\n\
         4. Ensure all status checks pass\n\n\
         **Why This Matters:**\n\
         The merge queue requires all PRs to be conflict-free to ensure smooth, automated \
         merging and maintain repository stability.\n\n\
         *This is an automated notification from the merge queue validation process.*"
    )
}

fn approvals_notice(number: u64, author: &str, have: usize, needed: u32) -> String {
    format!(
        "⚠️ **Insufficient Approvals - Action Required**\n\n\
         @{author}, your PR #{number} currently has {have} approval(s), but {needed} approval(s) \
         are required for merging.\n\n\
         **Required Action:**\n\
         1. Request reviews from team members or maintainers\n\
         2. Address any feedback or requested changes\n\
         3. Ensure your PR meets all review criteria\n\
         4. Wait for the required number of approvals\n\n\
         **Why This Matters:**\n\
         The merge queue enforces approval requirements to ensure code quality and maintain \
         proper review processes before merging.\n\n\
         *This is an automated notification from the merge queue validation process.*"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{CheckState, Review, ReviewState, StatusCheck};

    fn snapshot() -> Candidate {
        Candidate {
            number: 101,
            title: "Add widget".to_string(),
            author: "octocat".to_string(),
            base_ref: "main".to_string(),
            head_ref: "feature/widget".to_string(),
            state: PrState::Open,
            mergeable: MergeableState::Mergeable,
            reviews: vec![
                Review {
                    author: "a".to_string(),
                    state: ReviewState::Approved,
                },
                Review {
                    author: "b".to_string(),
                    state: ReviewState::Approved,
                },
            ],
            status_checks: vec![StatusCheck {
                context: "run-tests".to_string(),
                state: CheckState::Success,
            }],
        }
    }

    #[test]
    fn test_clean_candidate_is_mergeable() {
        assert!(evaluate_candidate(&snapshot(), 2, "main").is_empty());
    }

    #[test]
    fn test_closed_candidate_short_circuits() {
        let mut candidate = snapshot();
        candidate.state = PrState::Merged;
        candidate.base_ref = "develop".to_string();
        let violations = evaluate_candidate(&candidate, 2, "main");
        assert_eq!(
            violations,
            vec![Violation::NotOpen {
                state: PrState::Merged
            }]
        );
        assert_eq!(
            violations[0].reason("main"),
            "PR is not open (state: MERGED)"
        );
    }

    #[test]
    fn test_wrong_base_branch_detected() {
        let mut candidate = snapshot();
        candidate.base_ref = "develop".to_string();
        let violations = evaluate_candidate(&candidate, 2, "main");
        assert_eq!(
            violations,
            vec![Violation::WrongBase {
                base: "develop".to_string()
            }]
        );
    }

    #[test]
    fn test_unknown_mergeable_state_is_accepted() {
        let mut candidate = snapshot();
        candidate.mergeable = MergeableState::Unknown;
        assert!(evaluate_candidate(&candidate, 2, "main").is_empty());
    }

    #[test]
    fn test_conflicting_candidate_rejected() {
        let mut candidate = snapshot();
        candidate.mergeable = MergeableState::Conflicting;
        assert_eq!(
            evaluate_candidate(&candidate, 2, "main"),
            vec![Violation::Conflicting]
        );
    }

    #[test]
    fn test_insufficient_approvals_counted() {
        let violations = evaluate_candidate(&snapshot(), 3, "main");
        assert_eq!(
            violations,
            vec![Violation::InsufficientApprovals { have: 2, needed: 3 }]
        );
        assert_eq!(
            violations[0].reason("main"),
            "Has 2 approvals, but 3 are required"
        );
    }

    #[test]
    fn test_failing_checks_listed() {
        let mut candidate = snapshot();
        candidate.status_checks.push(StatusCheck {
            context: "lint".to_string(),
            state: CheckState::Failure,
        });
        let violations = evaluate_candidate(&candidate, 2, "main");
        assert_eq!(
            violations,
            vec![Violation::FailingChecks {
                checks: vec!["lint:FAILURE".to_string()]
            }]
        );
    }

    #[test]
    fn test_multiple_violations_accumulate() {
        let mut candidate = snapshot();
        candidate.base_ref = "develop".to_string();
        candidate.mergeable = MergeableState::Conflicting;
        candidate.reviews.clear();
        let violations = evaluate_candidate(&candidate, 2, "main");
        assert_eq!(violations.len(), 3);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let candidate = snapshot();
        let first = evaluate_candidate(&candidate, 3, "main");
        let second = evaluate_candidate(&candidate, 3, "main");
        assert_eq!(first, second);
    }
}
