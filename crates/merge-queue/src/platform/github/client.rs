//! GitHub REST API implementation of the [`Platform`] trait.
//!
//! API Documentation: <https://docs.github.com/en/rest>

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::models::{
    build_candidate, RawBranchProtection, RawCombinedStatus, RawComment, RawIssue, RawPull,
    RawReview, RawUser, RawWorkflowRun, RawWorkflowRunsPage,
};
use crate::platform::traits::{
    BranchProtection, Candidate, Comment, Issue, IssueState, IssueSummary, MergeOptions, Platform,
    PlatformError, PostedComment, RunConclusion, RunStatus, WorkflowRun,
};

/// Base URL for the GitHub REST API.
const GITHUB_API_URL: &str = "https://api.github.com";

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Backoff before the single retry of a failed request.
const RETRY_BACKOFF_MS: u64 = 500;

/// GitHub REST client scoped to a single repository.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
    owner: String,
    repo: String,
}

impl GitHubClient {
    /// Create a new client for `owner/repo`.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository is not in `owner/repo` form or
    /// the HTTP client cannot be created.
    pub fn new(repository: &str, token: &str) -> Result<Self, PlatformError> {
        let (owner, repo) = repository.split_once('/').ok_or_else(|| {
            PlatformError::Config(format!(
                "invalid repository '{repository}' (expected owner/repo)"
            ))
        })?;
        if owner.is_empty() || repo.is_empty() {
            return Err(PlatformError::Config(format!(
                "invalid repository '{repository}' (expected owner/repo)"
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("merge-queue/0.3"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            token: token.to_string(),
            base_url: GITHUB_API_URL.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    /// Point the client at a different API base URL (used by tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}{path}", self.base_url, self.owner, self.repo)
    }

    fn org_url(&self, path: &str) -> String {
        format!("{}/orgs/{}{path}", self.base_url, self.owner)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.header(AUTHORIZATION, format!("Bearer {}", self.token))
    }

    /// Send a request, retrying once on transport errors and 5xx responses.
    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, PlatformError> {
        let retry = builder.try_clone();
        match builder.send().await {
            Ok(response) if response.status().is_server_error() => match retry {
                Some(retry) => {
                    debug!(status = %response.status(), "server error, retrying once");
                    sleep(Duration::from_millis(RETRY_BACKOFF_MS)).await;
                    Ok(retry.send().await?)
                }
                None => Ok(response),
            },
            Ok(response) => Ok(response),
            Err(err) => match retry {
                Some(retry) => {
                    warn!(error = %err, "request failed, retrying once");
                    sleep(Duration::from_millis(RETRY_BACKOFF_MS)).await;
                    Ok(retry.send().await?)
                }
                None => Err(err.into()),
            },
        }
    }

    /// Map a non-success response to the appropriate error.
    async fn ensure_success(
        response: reqwest::Response,
        what: &str,
    ) -> Result<reqwest::Response, PlatformError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(PlatformError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PlatformError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn read_json<T: DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T, PlatformError> {
        let body = response.text().await.unwrap_or_default();
        serde_json::from_str(&body).map_err(|e| PlatformError::Parse(format!("{what}: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, what: &str) -> Result<T, PlatformError> {
        let response = self.send(self.authorized(self.client.get(url))).await?;
        let response = Self::ensure_success(response, what).await?;
        Self::read_json(response, what).await
    }

    async fn get_pull(&self, number: u64) -> Result<RawPull, PlatformError> {
        self.get_json(
            &self.repo_url(&format!("/pulls/{number}")),
            &format!("PR #{number}"),
        )
        .await
    }
}

fn parse_run_status(s: &str) -> RunStatus {
    match s {
        "queued" => RunStatus::Queued,
        "in_progress" => RunStatus::InProgress,
        "completed" => RunStatus::Completed,
        _ => RunStatus::Other,
    }
}

fn parse_run_conclusion(s: &str) -> RunConclusion {
    match s {
        "success" => RunConclusion::Success,
        "failure" => RunConclusion::Failure,
        "cancelled" => RunConclusion::Cancelled,
        "timed_out" => RunConclusion::TimedOut,
        _ => RunConclusion::Other,
    }
}

#[async_trait]
impl Platform for GitHubClient {
    async fn get_issue(&self, number: u64) -> Result<Issue, PlatformError> {
        let raw: RawIssue = self
            .get_json(
                &self.repo_url(&format!("/issues/{number}")),
                &format!("issue #{number}"),
            )
            .await?;
        Ok(Issue {
            number: raw.number,
            title: raw.title,
            body: raw.body.unwrap_or_default(),
            author: raw.user.login,
        })
    }

    async fn get_pr_author(&self, number: u64) -> Result<String, PlatformError> {
        Ok(self.get_pull(number).await?.user.login)
    }

    async fn add_comment(&self, number: u64, body: &str) -> Result<PostedComment, PlatformError> {
        let url = self.repo_url(&format!("/issues/{number}/comments"));
        let response = self
            .send(
                self.authorized(self.client.post(&url))
                    .json(&serde_json::json!({ "body": body })),
            )
            .await?;
        let response = Self::ensure_success(response, &format!("comment on #{number}")).await?;
        let raw: RawComment = Self::read_json(response, "created comment").await?;
        debug!(number, comment_id = raw.id, "posted comment");
        Ok(PostedComment {
            id: raw.id,
            url: raw.html_url,
            created_at: raw.created_at,
        })
    }

    async fn list_comments(&self, number: u64) -> Result<Vec<Comment>, PlatformError> {
        let url = self.repo_url(&format!("/issues/{number}/comments?per_page=100"));
        let raw: Vec<RawComment> = self
            .get_json(&url, &format!("comments on #{number}"))
            .await?;
        Ok(raw.into_iter().map(RawComment::into_comment).collect())
    }

    async fn get_candidate(&self, number: u64) -> Result<Candidate, PlatformError> {
        let pull = self.get_pull(number).await?;
        let reviews: Vec<RawReview> = self
            .get_json(
                &self.repo_url(&format!("/pulls/{number}/reviews?per_page=100")),
                &format!("reviews on PR #{number}"),
            )
            .await?;
        let status: RawCombinedStatus = self
            .get_json(
                &self.repo_url(&format!("/commits/{}/status", pull.head.sha)),
                &format!("status rollup for PR #{number}"),
            )
            .await?;
        Ok(build_candidate(pull, reviews, status))
    }

    async fn update_branch(&self, number: u64) -> Result<(), PlatformError> {
        let url = self.repo_url(&format!("/pulls/{number}/update-branch"));
        let response = self
            .send(
                self.authorized(self.client.put(&url))
                    .json(&serde_json::json!({})),
            )
            .await?;
        Self::ensure_success(response, &format!("update branch of PR #{number}")).await?;
        Ok(())
    }

    async fn merge_pr(&self, number: u64, opts: &MergeOptions) -> Result<(), PlatformError> {
        if opts.admin {
            debug!(number, "admin merge requested, relying on token privileges");
        }

        // Resolve the head ref before merging; it is gone afterwards.
        let head_ref = if opts.delete_branch {
            Some(self.get_pull(number).await?.head.git_ref)
        } else {
            None
        };

        let url = self.repo_url(&format!("/pulls/{number}/merge"));
        let response = self
            .send(self.authorized(self.client.put(&url)).json(&serde_json::json!({
                "merge_method": opts.method.as_str(),
                "commit_title": opts.subject,
            })))
            .await?;
        Self::ensure_success(response, &format!("merge PR #{number}")).await?;

        if let Some(head_ref) = head_ref {
            let url = self.repo_url(&format!("/git/refs/heads/{head_ref}"));
            let response = self.send(self.authorized(self.client.delete(&url))).await?;
            if !response.status().is_success() {
                warn!(
                    number,
                    branch = %head_ref,
                    status = %response.status(),
                    "failed to delete head branch after merge"
                );
            }
        }

        Ok(())
    }

    async fn get_workflow_run(&self, run_id: u64) -> Result<WorkflowRun, PlatformError> {
        let raw: RawWorkflowRun = self
            .get_json(
                &self.repo_url(&format!("/actions/runs/{run_id}")),
                &format!("workflow run {run_id}"),
            )
            .await?;
        Ok(WorkflowRun {
            status: parse_run_status(&raw.status),
            conclusion: raw.conclusion.as_deref().map(parse_run_conclusion),
            name: raw.name,
        })
    }

    async fn count_in_progress_runs(&self, workflow_file: &str) -> Result<usize, PlatformError> {
        let url = self.repo_url(&format!(
            "/actions/workflows/{workflow_file}/runs?status=in_progress&per_page=1"
        ));
        let page: RawWorkflowRunsPage = self
            .get_json(&url, &format!("runs of workflow {workflow_file}"))
            .await?;
        Ok(page.total_count)
    }

    async fn get_branch_protection(
        &self,
        branch: &str,
    ) -> Result<Option<BranchProtection>, PlatformError> {
        let url = self.repo_url(&format!("/branches/{branch}/protection"));
        let response = self.send(self.authorized(self.client.get(&url))).await?;
        let status = response.status();

        // 404 means the branch is definitely unprotected. A 403 surfaces
        // as an API error; callers fall back to their safe defaults.
        if status == StatusCode::NOT_FOUND {
            debug!(branch, "branch is not protected");
            return Ok(None);
        }
        let response = Self::ensure_success(response, &format!("protection of {branch}")).await?;
        let raw: RawBranchProtection = Self::read_json(response, "branch protection").await?;
        Ok(Some(BranchProtection {
            required_approving_review_count: raw
                .required_pull_request_reviews
                .and_then(|r| r.required_approving_review_count),
        }))
    }

    async fn get_team_members(&self, team_slug: &str) -> Result<Vec<String>, PlatformError> {
        let url = self.org_url(&format!("/teams/{team_slug}/members?per_page=100"));
        let raw: Vec<RawUser> = self
            .get_json(&url, &format!("members of team {team_slug}"))
            .await?;
        Ok(raw.into_iter().map(|u| u.login).collect())
    }

    async fn is_team_member(&self, user: &str, team_slug: &str) -> Result<bool, PlatformError> {
        let url = self.org_url(&format!("/teams/{team_slug}/memberships/{user}"));
        let response = self.send(self.authorized(self.client.get(&url))).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::ensure_success(response, &format!("membership of {user}")).await?;
        Ok(true)
    }

    async fn create_issue(
        &self,
        title: &str,
        body: &str,
        labels: &[&str],
    ) -> Result<u64, PlatformError> {
        let url = self.repo_url("/issues");
        let response = self
            .send(self.authorized(self.client.post(&url)).json(&serde_json::json!({
                "title": title,
                "body": body,
                "labels": labels,
            })))
            .await?;
        let response = Self::ensure_success(response, "create issue").await?;
        let raw: RawIssue = Self::read_json(response, "created issue").await?;
        Ok(raw.number)
    }

    async fn close_issue(&self, number: u64) -> Result<(), PlatformError> {
        let url = self.repo_url(&format!("/issues/{number}"));
        let response = self
            .send(
                self.authorized(self.client.patch(&url))
                    .json(&serde_json::json!({ "state": "closed" })),
            )
            .await?;
        Self::ensure_success(response, &format!("close issue #{number}")).await?;
        Ok(())
    }

    async fn list_issues_by_label(
        &self,
        label: &str,
        state: IssueState,
    ) -> Result<Vec<IssueSummary>, PlatformError> {
        let url = self.repo_url(&format!(
            "/issues?labels={label}&state={}&per_page=50",
            state.as_str()
        ));
        let raw: Vec<RawIssue> = self.get_json(&url, &format!("issues labelled {label}")).await?;
        Ok(raw
            .into_iter()
            .filter(|i| i.pull_request.is_none())
            .map(|i| IssueSummary {
                number: i.number,
                title: i.title,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_malformed_repository() {
        assert!(GitHubClient::new("not-a-repo", "token").is_err());
        assert!(GitHubClient::new("owner/", "token").is_err());
        assert!(GitHubClient::new("/repo", "token").is_err());
        assert!(GitHubClient::new("owner/repo", "token").is_ok());
    }

    #[test]
    fn test_repo_and_org_urls() {
        let client = GitHubClient::new("5dlabs/demo", "token").unwrap();
        assert_eq!(
            client.repo_url("/pulls/7"),
            "https://api.github.com/repos/5dlabs/demo/pulls/7"
        );
        assert_eq!(
            client.org_url("/teams/merge-approvals/members?per_page=100"),
            "https://api.github.com/orgs/5dlabs/teams/merge-approvals/members?per_page=100"
        );
    }

    #[test]
    fn test_parse_run_status() {
        assert_eq!(parse_run_status("queued"), RunStatus::Queued);
        assert_eq!(parse_run_status("in_progress"), RunStatus::InProgress);
        assert_eq!(parse_run_status("completed"), RunStatus::Completed);
        assert_eq!(parse_run_status("waiting"), RunStatus::Other);
    }

    #[test]
    fn test_parse_run_conclusion() {
        assert_eq!(parse_run_conclusion("success"), RunConclusion::Success);
        assert_eq!(parse_run_conclusion("failure"), RunConclusion::Failure);
        assert_eq!(parse_run_conclusion("timed_out"), RunConclusion::TimedOut);
        assert_eq!(parse_run_conclusion("neutral"), RunConclusion::Other);
    }
}
