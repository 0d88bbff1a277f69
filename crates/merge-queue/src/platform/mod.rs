//! Hosting-platform adapters.
//!
//! The [`Platform`] trait is the seam between the orchestrator and the
//! code-hosting platform. The GitHub implementation lives in [`github`];
//! tests supply in-memory fakes.

pub mod github;
pub mod traits;

pub use github::GitHubClient;
pub use traits::{
    BranchProtection, Candidate, CheckState, Comment, Issue, IssueState, IssueSummary,
    MergeMethod, MergeOptions, MergeableState, Platform, PlatformError, PostedComment, PrState,
    Review, ReviewState, RunConclusion, RunStatus, StatusCheck, WorkflowRun,
};
