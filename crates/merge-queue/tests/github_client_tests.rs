//! GitHub client tests against a mock API server.
//!
//! Cover the error-mapping contract: retry-once on server errors, 404 as
//! absence, permission failures on branch protection, and the wire-format
//! mapping into candidate snapshots.

use merge_queue::platform::{
    CheckState, GitHubClient, IssueState, MergeMethod, MergeOptions, MergeableState, Platform,
    PlatformError, PrState,
};
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn client(server: &MockServer) -> GitHubClient {
    GitHubClient::new("5dlabs/demo", "test-token")
        .unwrap()
        .with_base_url(server.uri())
}

#[tokio::test]
async fn test_retries_once_on_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/5dlabs/demo/actions/runs/99"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/5dlabs/demo/actions/runs/99"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "completed",
            "conclusion": "success",
            "name": "run-tests",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let run = client(&server).await.get_workflow_run(99).await.unwrap();
    assert!(run.succeeded());
    assert_eq!(run.name, "run-tests");
}

#[tokio::test]
async fn test_missing_run_maps_to_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/5dlabs/demo/actions/runs/7"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client(&server).await.get_workflow_run(7).await.unwrap_err();
    assert!(matches!(err, PlatformError::NotFound(_)), "got {err:?}");
}

#[tokio::test]
async fn test_unprotected_branch_maps_to_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/5dlabs/demo/branches/feature-1/protection"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let protection = client(&server)
        .await
        .get_branch_protection("feature-1")
        .await
        .unwrap();
    assert!(protection.is_none());
}

#[tokio::test]
async fn test_forbidden_branch_protection_is_an_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/5dlabs/demo/branches/main/protection"))
        .respond_with(ResponseTemplate::new(403).set_body_string("admin rights required"))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .get_branch_protection("main")
        .await
        .unwrap_err();
    match err {
        PlatformError::Api { status, message } => {
            assert_eq!(status, 403);
            assert!(message.contains("admin rights required"));
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_protected_branch_review_count() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/5dlabs/demo/branches/main/protection"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "required_pull_request_reviews": {
                "required_approving_review_count": 2,
            },
        })))
        .mount(&server)
        .await;

    let protection = client(&server)
        .await
        .get_branch_protection("main")
        .await
        .unwrap()
        .expect("protection info");
    assert_eq!(protection.required_approving_review_count, Some(2));
}

#[tokio::test]
async fn test_add_comment_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/repos/5dlabs/demo/issues/42/comments"))
        .and(body_json(serde_json::json!({ "body": "Ok to test" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": 1234,
            "user": {"login": "github-actions"},
            "body": "Ok to test",
            "html_url": "https://github.com/5dlabs/demo/issues/42#issuecomment-1234",
            "created_at": "2025-07-16T14:47:52Z",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let posted = client(&server).await.add_comment(42, "Ok to test").await.unwrap();
    assert_eq!(posted.id, 1234);
    assert!(posted.url.ends_with("issuecomment-1234"));
    assert_eq!(posted.created_at.to_rfc3339(), "2025-07-16T14:47:52+00:00");
}

#[tokio::test]
async fn test_get_candidate_assembles_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/5dlabs/demo/pulls/101"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "number": 101,
            "title": "Add widget",
            "state": "open",
            "merged": false,
            "mergeable": true,
            "mergeable_state": "clean",
            "user": {"login": "octocat"},
            "base": {"ref": "main", "sha": "aaa111"},
            "head": {"ref": "feature/widget", "sha": "bbb222"},
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/5dlabs/demo/pulls/101/reviews"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"user": {"login": "alice"}, "state": "APPROVED"},
            {"user": {"login": "bob"}, "state": "COMMENTED"},
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/5dlabs/demo/commits/bbb222/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "state": "success",
            "statuses": [
                {"context": "run-tests", "state": "success"},
            ],
        })))
        .mount(&server)
        .await;

    let candidate = client(&server).await.get_candidate(101).await.unwrap();
    assert_eq!(candidate.number, 101);
    assert_eq!(candidate.author, "octocat");
    assert_eq!(candidate.state, PrState::Open);
    assert_eq!(candidate.mergeable, MergeableState::Mergeable);
    assert_eq!(candidate.base_ref, "main");
    assert_eq!(candidate.head_ref, "feature/widget");
    assert_eq!(candidate.approval_count(), 1);
    assert_eq!(candidate.status_checks.len(), 1);
    assert_eq!(candidate.status_checks[0].state, CheckState::Success);
}

#[tokio::test]
async fn test_merge_deletes_unprotected_head_branch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/5dlabs/demo/pulls/101"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "number": 101,
            "title": "Add widget",
            "state": "open",
            "merged": false,
            "mergeable": true,
            "mergeable_state": "clean",
            "user": {"login": "octocat"},
            "base": {"ref": "main", "sha": "aaa111"},
            "head": {"ref": "feature-widget", "sha": "bbb222"},
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/repos/5dlabs/demo/pulls/101/merge"))
        .and(body_json(serde_json::json!({
            "merge_method": "squash",
            "commit_title": "[Merge Queue]Merge Pull Request #101 from feature-widget",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "merged": true,
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/repos/5dlabs/demo/git/refs/heads/feature-widget"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let opts = MergeOptions {
        method: MergeMethod::Squash,
        delete_branch: true,
        subject: "[Merge Queue]Merge Pull Request #101 from feature-widget".to_string(),
        admin: true,
    };
    client(&server).await.merge_pr(101, &opts).await.unwrap();
}

#[tokio::test]
async fn test_list_issues_by_label_filters_pull_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/5dlabs/demo/issues"))
        .and(query_param("labels", "distributed-lock"))
        .and(query_param("state", "open"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {
                "number": 900,
                "title": "[MERGE QUEUE TRACKING] Issue #42 - Auto Merge In Progress",
                "user": {"login": "github-actions"},
            },
            {
                "number": 901,
                "title": "a PR that carries the label",
                "user": {"login": "octocat"},
                "pull_request": {"url": "https://api.github.com/repos/5dlabs/demo/pulls/901"},
            },
        ])))
        .mount(&server)
        .await;

    let issues = client(&server)
        .await
        .list_issues_by_label("distributed-lock", IssueState::Open)
        .await
        .unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].number, 900);
}

#[tokio::test]
async fn test_is_team_member_maps_404_to_false() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orgs/5dlabs/teams/merge-approvals/memberships/mallory"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orgs/5dlabs/teams/merge-approvals/memberships/lead"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "state": "active",
            "role": "member",
        })))
        .mount(&server)
        .await;

    let client = client(&server).await;
    assert!(!client.is_team_member("mallory", "merge-approvals").await.unwrap());
    assert!(client.is_team_member("lead", "merge-approvals").await.unwrap());
}
