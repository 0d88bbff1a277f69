//! Platform trait and common types for hosting-platform adapters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during platform operations.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Requested resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Response payload could not be decoded.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Pull request state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

impl std::fmt::Display for PrState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Closed => write!(f, "CLOSED"),
            Self::Merged => write!(f, "MERGED"),
        }
    }
}

/// The platform's opinion on whether a candidate can be merged cleanly.
///
/// `Unknown` means the platform has not yet computed mergeability; callers
/// must not treat it as a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeableState {
    Mergeable,
    Conflicting,
    Unknown,
}

impl std::fmt::Display for MergeableState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mergeable => write!(f, "MERGEABLE"),
            Self::Conflicting => write!(f, "CONFLICTING"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// State of a single review on a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
    #[serde(other)]
    Other,
}

/// A review attached to a pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub author: String,
    pub state: ReviewState,
}

/// Aggregated state of a single entry in the status-check rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckState {
    Success,
    Failure,
    Pending,
    Error,
    #[serde(other)]
    Other,
}

impl std::fmt::Display for CheckState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Failure => write!(f, "FAILURE"),
            Self::Pending => write!(f, "PENDING"),
            Self::Error => write!(f, "ERROR"),
            Self::Other => write!(f, "OTHER"),
        }
    }
}

/// One entry in a candidate's status-check rollup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusCheck {
    /// Check name (e.g. "run-tests").
    pub context: String,
    pub state: CheckState,
}

/// Snapshot of a merge candidate. Immutable within one cycle; re-fetched
/// before each transition that depends on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub number: u64,
    pub title: String,
    pub author: String,
    pub base_ref: String,
    pub head_ref: String,
    pub state: PrState,
    pub mergeable: MergeableState,
    pub reviews: Vec<Review>,
    pub status_checks: Vec<StatusCheck>,
}

impl Candidate {
    /// Count reviews in the APPROVED state.
    #[must_use]
    pub fn approval_count(&self) -> usize {
        self.reviews
            .iter()
            .filter(|r| r.state == ReviewState::Approved)
            .count()
    }

    /// Rollup entries that are not SUCCESS, formatted `context:STATE`.
    #[must_use]
    pub fn failing_checks(&self) -> Vec<String> {
        self.status_checks
            .iter()
            .filter(|c| c.state != CheckState::Success)
            .map(|c| format!("{}:{}", c.context, c.state))
            .collect()
    }
}

/// A comment on an issue or pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A comment the orchestrator itself posted.
#[derive(Debug, Clone)]
pub struct PostedComment {
    pub id: u64,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// An issue as returned by the platform.
#[derive(Debug, Clone)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub author: String,
}

/// Summary row from a label-scoped issue listing.
#[derive(Debug, Clone)]
pub struct IssueSummary {
    pub number: u64,
    pub title: String,
}

/// Issue state filter for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueState {
    Open,
    Closed,
    All,
}

impl IssueState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::All => "all",
        }
    }
}

/// Status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
    #[serde(other)]
    Other,
}

/// Conclusion of a completed workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunConclusion {
    Success,
    Failure,
    Cancelled,
    TimedOut,
    #[serde(other)]
    Other,
}

impl std::fmt::Display for RunConclusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// A CI workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub status: RunStatus,
    pub conclusion: Option<RunConclusion>,
    pub name: String,
}

impl WorkflowRun {
    /// Whether the run reached a terminal state.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Whether the run completed successfully.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.is_complete() && self.conclusion == Some(RunConclusion::Success)
    }
}

/// Branch protection settings relevant to the merge queue.
#[derive(Debug, Clone, Default)]
pub struct BranchProtection {
    pub required_approving_review_count: Option<u32>,
}

/// Merge method for the final merge call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMethod {
    Squash,
    Merge,
    Rebase,
}

impl MergeMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Squash => "squash",
            Self::Merge => "merge",
            Self::Rebase => "rebase",
        }
    }
}

/// Options for merging a pull request.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub method: MergeMethod,
    /// Delete the head branch after a successful merge.
    pub delete_branch: bool,
    /// Commit subject line.
    pub subject: String,
    /// Merge with elevated privileges. The REST implementation relies on
    /// the token's permissions; the flag is part of the contract so fakes
    /// can assert it.
    pub admin: bool,
}

/// Typed operations against the code-hosting platform.
///
/// All operations return structured results and never panic on network or
/// parse failures. Implementations retry transient errors once; a 404 is
/// reported as [`PlatformError::NotFound`], not as a generic API error.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Fetch an issue (title, body, author).
    async fn get_issue(&self, number: u64) -> Result<Issue, PlatformError>;

    /// Get the author login of a pull request.
    async fn get_pr_author(&self, number: u64) -> Result<String, PlatformError>;

    /// Post a comment on an issue or pull request.
    async fn add_comment(&self, number: u64, body: &str) -> Result<PostedComment, PlatformError>;

    /// List all comments on an issue or pull request.
    async fn list_comments(&self, number: u64) -> Result<Vec<Comment>, PlatformError>;

    /// List comments created strictly after the given instant.
    async fn list_comments_after(
        &self,
        number: u64,
        after: DateTime<Utc>,
    ) -> Result<Vec<Comment>, PlatformError> {
        let mut comments = self.list_comments(number).await?;
        comments.retain(|c| c.created_at > after);
        Ok(comments)
    }

    /// Fetch a full candidate snapshot (pull request, reviews, rollup).
    async fn get_candidate(&self, number: u64) -> Result<Candidate, PlatformError>;

    /// Update the candidate's branch with the base branch.
    async fn update_branch(&self, number: u64) -> Result<(), PlatformError>;

    /// Merge a pull request.
    async fn merge_pr(&self, number: u64, opts: &MergeOptions) -> Result<(), PlatformError>;

    /// Fetch a workflow run by id.
    async fn get_workflow_run(&self, run_id: u64) -> Result<WorkflowRun, PlatformError>;

    /// Count in-progress runs of a workflow definition.
    async fn count_in_progress_runs(&self, workflow_file: &str) -> Result<usize, PlatformError>;

    /// Fetch branch protection; `None` when the branch is unprotected.
    /// A permission failure is an error, and callers fall back to their
    /// safe defaults (one required approval, keep the branch on merge).
    async fn get_branch_protection(
        &self,
        branch: &str,
    ) -> Result<Option<BranchProtection>, PlatformError>;

    /// Resolve the member logins of a team.
    async fn get_team_members(&self, team_slug: &str) -> Result<Vec<String>, PlatformError>;

    /// Check whether a user belongs to a team.
    async fn is_team_member(&self, user: &str, team_slug: &str) -> Result<bool, PlatformError> {
        let members = self.get_team_members(team_slug).await?;
        Ok(members.iter().any(|m| m == user))
    }

    /// Create a labelled issue; returns the new issue number.
    async fn create_issue(
        &self,
        title: &str,
        body: &str,
        labels: &[&str],
    ) -> Result<u64, PlatformError>;

    /// Close an issue.
    async fn close_issue(&self, number: u64) -> Result<(), PlatformError>;

    /// List open/closed issues carrying a label.
    async fn list_issues_by_label(
        &self,
        label: &str,
        state: IssueState,
    ) -> Result<Vec<IssueSummary>, PlatformError>;
}
