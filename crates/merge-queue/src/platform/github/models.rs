//! Wire-format structs for the GitHub REST API.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::platform::traits::{
    Candidate, CheckState, Comment, MergeableState, PrState, Review, ReviewState, StatusCheck,
};

#[derive(Debug, Deserialize)]
pub(crate) struct RawUser {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawRef {
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub sha: String,
}

/// `GET /repos/{owner}/{repo}/pulls/{number}`
#[derive(Debug, Deserialize)]
pub(crate) struct RawPull {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    pub state: String,
    #[serde(default)]
    pub merged: bool,
    pub mergeable: Option<bool>,
    #[serde(default)]
    pub mergeable_state: String,
    pub user: RawUser,
    pub base: RawRef,
    pub head: RawRef,
}

impl RawPull {
    pub fn pr_state(&self) -> PrState {
        if self.merged {
            PrState::Merged
        } else if self.state == "open" {
            PrState::Open
        } else {
            PrState::Closed
        }
    }

    pub fn mergeable_state(&self) -> MergeableState {
        if self.mergeable == Some(false) || self.mergeable_state == "dirty" {
            MergeableState::Conflicting
        } else if self.mergeable.is_none() || self.mergeable_state == "unknown" {
            MergeableState::Unknown
        } else {
            MergeableState::Mergeable
        }
    }
}

/// `GET /repos/{owner}/{repo}/pulls/{number}/reviews`
#[derive(Debug, Deserialize)]
pub(crate) struct RawReview {
    pub user: RawUser,
    pub state: String,
}

impl RawReview {
    pub fn into_review(self) -> Review {
        let state = match self.state.as_str() {
            "APPROVED" => ReviewState::Approved,
            "CHANGES_REQUESTED" => ReviewState::ChangesRequested,
            "COMMENTED" => ReviewState::Commented,
            "DISMISSED" => ReviewState::Dismissed,
            _ => ReviewState::Other,
        };
        Review {
            author: self.user.login,
            state,
        }
    }
}

/// `GET /repos/{owner}/{repo}/commits/{sha}/status`
#[derive(Debug, Deserialize)]
pub(crate) struct RawCombinedStatus {
    #[serde(default)]
    pub statuses: Vec<RawStatus>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawStatus {
    pub context: String,
    pub state: String,
}

impl RawStatus {
    pub fn into_check(self) -> StatusCheck {
        let state = match self.state.as_str() {
            "success" => CheckState::Success,
            "failure" => CheckState::Failure,
            "pending" => CheckState::Pending,
            "error" => CheckState::Error,
            _ => CheckState::Other,
        };
        StatusCheck {
            context: self.context,
            state,
        }
    }
}

pub(crate) fn build_candidate(
    pull: RawPull,
    reviews: Vec<RawReview>,
    status: RawCombinedStatus,
) -> Candidate {
    let state = pull.pr_state();
    let mergeable = pull.mergeable_state();
    Candidate {
        number: pull.number,
        title: pull.title,
        author: pull.user.login,
        base_ref: pull.base.git_ref,
        head_ref: pull.head.git_ref,
        state,
        mergeable,
        reviews: reviews.into_iter().map(RawReview::into_review).collect(),
        status_checks: status.statuses.into_iter().map(RawStatus::into_check).collect(),
    }
}

/// `GET /repos/{owner}/{repo}/issues/{number}` and list items.
#[derive(Debug, Deserialize)]
pub(crate) struct RawIssue {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub user: RawUser,
    /// Present when the "issue" is actually a pull request.
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

/// `POST /repos/{owner}/{repo}/issues/{number}/comments` response and
/// comment list items.
#[derive(Debug, Deserialize)]
pub(crate) struct RawComment {
    pub id: u64,
    pub user: RawUser,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub html_url: String,
    pub created_at: DateTime<Utc>,
}

impl RawComment {
    pub fn into_comment(self) -> Comment {
        Comment {
            id: self.id,
            author: self.user.login,
            body: self.body.unwrap_or_default(),
            created_at: self.created_at,
        }
    }
}

/// `GET /repos/{owner}/{repo}/actions/runs/{run_id}`
#[derive(Debug, Deserialize)]
pub(crate) struct RawWorkflowRun {
    pub status: String,
    pub conclusion: Option<String>,
    #[serde(default)]
    pub name: String,
}

/// `GET /repos/{owner}/{repo}/actions/workflows/{file}/runs`
#[derive(Debug, Deserialize)]
pub(crate) struct RawWorkflowRunsPage {
    pub total_count: usize,
}

/// `GET /repos/{owner}/{repo}/branches/{branch}/protection`
#[derive(Debug, Deserialize)]
pub(crate) struct RawBranchProtection {
    #[serde(default)]
    pub required_pull_request_reviews: Option<RawRequiredReviews>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawRequiredReviews {
    #[serde(default)]
    pub required_approving_review_count: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pull(state: &str, merged: bool, mergeable: Option<bool>, mergeable_state: &str) -> RawPull {
        serde_json::from_value(serde_json::json!({
            "number": 7,
            "title": "Add widget",
            "state": state,
            "merged": merged,
            "mergeable": mergeable,
            "mergeable_state": mergeable_state,
            "user": {"login": "octocat"},
            "base": {"ref": "main", "sha": "aaa"},
            "head": {"ref": "feature/widget", "sha": "bbb"},
        }))
        .unwrap()
    }

    #[test]
    fn test_pr_state_mapping() {
        assert_eq!(pull("open", false, Some(true), "clean").pr_state(), PrState::Open);
        assert_eq!(pull("closed", false, None, "unknown").pr_state(), PrState::Closed);
        assert_eq!(pull("closed", true, None, "unknown").pr_state(), PrState::Merged);
    }

    #[test]
    fn test_mergeable_state_mapping() {
        assert_eq!(
            pull("open", false, Some(true), "clean").mergeable_state(),
            MergeableState::Mergeable
        );
        assert_eq!(
            pull("open", false, Some(false), "dirty").mergeable_state(),
            MergeableState::Conflicting
        );
        // The platform reports conflicts through either field.
        assert_eq!(
            pull("open", false, Some(true), "dirty").mergeable_state(),
            MergeableState::Conflicting
        );
        assert_eq!(
            pull("open", false, None, "unknown").mergeable_state(),
            MergeableState::Unknown
        );
        assert_eq!(
            pull("open", false, None, "clean").mergeable_state(),
            MergeableState::Unknown
        );
    }

    #[test]
    fn test_review_mapping() {
        let raw = RawReview {
            user: RawUser {
                login: "alice".to_string(),
            },
            state: "APPROVED".to_string(),
        };
        let review = raw.into_review();
        assert_eq!(review.author, "alice");
        assert_eq!(review.state, ReviewState::Approved);
    }

    #[test]
    fn test_status_mapping() {
        let raw = RawStatus {
            context: "run-tests".to_string(),
            state: "pending".to_string(),
        };
        let check = raw.into_check();
        assert_eq!(check.state, CheckState::Pending);
    }

    #[test]
    fn test_comment_with_null_body() {
        let raw: RawComment = serde_json::from_value(serde_json::json!({
            "id": 11,
            "user": {"login": "bob"},
            "body": null,
            "html_url": "https://github.com/o/r/issues/1#issuecomment-11",
            "created_at": "2025-07-16T14:47:52Z",
        }))
        .unwrap();
        assert_eq!(raw.into_comment().body, "");
    }
}
