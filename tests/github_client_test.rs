use serde_json::json;
use std::collections::BTreeSet;
use std::time::Duration;
use wiremock::matchers::{header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use context_keeper::github::GitHubClient;
use context_keeper::IngestError;

mod common;
use common::*;

async fn mount_files(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/repos/octo/widgets/pulls/\d+/files$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(file_fixtures(&["src/lib.rs", "README.md"])))
        .mount(server)
        .await;
}

async fn requests_to(server: &MockServer, request_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == request_path)
        .count()
}

#[tokio::test]
async fn test_pull_requests_capped_at_fifty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(repo_path("pulls")))
        .and(query_param("page", "1"))
        .and(query_param("per_page", "50"))
        .and(query_param("state", "all"))
        .and(header("authorization", format!("Bearer {}", TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(pull_request_fixtures(0, 50)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(repo_path("pulls")))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(pull_request_fixtures(50, 10)))
        .mount(&server)
        .await;
    mount_files(&server).await;

    let client = mock_github_client(&server);
    let batch = client
        .fetch_pull_requests(TOKEN, OWNER, REPO, 50)
        .await
        .unwrap();

    assert_eq!(batch.pull_requests.len(), 50);
    assert!(batch.missing_files.is_empty());
    assert_eq!(batch.pull_requests[0].number, 1);
    assert_eq!(batch.pull_requests[49].number, 50);
    assert!(batch
        .pull_requests
        .windows(2)
        .all(|pair| pair[0].created_at >= pair[1].created_at));
    assert_eq!(batch.pull_requests[0].files_changed, vec!["src/lib.rs", "README.md"]);
    assert_eq!(batch.pull_requests[0].labels, vec!["enhancement"]);

    // A full first page satisfies the limit, so page 2 is never requested.
    let listing_requests = requests_to(&server, &repo_path("pulls")).await;
    assert_eq!(listing_requests, 1);
}

#[tokio::test]
async fn test_issues_skip_pull_requests_and_cap_at_fifty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(repo_path("issues")))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(issue_fixtures(0, 50, true)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(repo_path("issues")))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(issue_fixtures(50, 50, true)))
        .mount(&server)
        .await;

    let client = mock_github_client(&server);
    let issues = client.fetch_issues(TOKEN, OWNER, REPO, 50).await.unwrap();

    assert_eq!(issues.len(), 50);
    // Every fifth listing entry is a pull request and must be gone.
    assert!(issues.iter().all(|issue| issue.id % 5 != 4));
    assert_eq!(issues[0].author, "bob");
    assert_eq!(issues[0].body, "");
    assert_eq!(requests_to(&server, &repo_path("issues")).await, 2);
}

#[tokio::test]
async fn test_commits_capped_at_one_hundred() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(repo_path("commits")))
        .and(query_param("page", "1"))
        .and(query_param("per_page", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(commit_fixtures(0, 100)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(repo_path("commits")))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(commit_fixtures(100, 50)))
        .mount(&server)
        .await;

    let client = mock_github_client(&server);
    let commits = client.fetch_commits(TOKEN, OWNER, REPO, 100).await.unwrap();

    assert_eq!(commits.len(), 100);
    assert_eq!(commits[0].sha, sha(0));
    assert_eq!(commits[0].author, "Carol");
    assert!(commits.iter().all(|commit| commit.files_changed.is_empty()));
}

#[tokio::test]
async fn test_short_page_ends_listing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(repo_path("commits")))
        .respond_with(ResponseTemplate::new(200).set_body_json(commit_fixtures(0, 7)))
        .mount(&server)
        .await;

    let client = mock_github_client(&server);
    let commits = client.fetch_commits(TOKEN, OWNER, REPO, 100).await.unwrap();

    assert_eq!(commits.len(), 7);
    assert_eq!(requests_to(&server, &repo_path("commits")).await, 1);
}

#[tokio::test]
async fn test_retry_after_network_failure() {
    let server = MockServer::start().await;
    // The first response outlives the client timeout.
    Mock::given(method("GET"))
        .and(path(repo_path("pulls")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(pull_request_fixtures(0, 2))
                .set_delay(Duration::from_secs(3)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(repo_path("pulls")))
        .respond_with(ResponseTemplate::new(200).set_body_json(pull_request_fixtures(0, 2)))
        .mount(&server)
        .await;
    mount_files(&server).await;

    let mut config = mock_github_config(&server);
    config.timeout_secs = 1;
    let client = GitHubClient::new(&config).unwrap();

    let batch = client
        .fetch_pull_requests(TOKEN, OWNER, REPO, 50)
        .await
        .unwrap();

    assert_eq!(batch.pull_requests.len(), 2);
    assert_eq!(requests_to(&server, &repo_path("pulls")).await, 2);
}

#[tokio::test]
async fn test_retry_after_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(repo_path("issues")))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(repo_path("issues")))
        .respond_with(ResponseTemplate::new(200).set_body_json(issue_fixtures(0, 3, false)))
        .mount(&server)
        .await;

    let client = mock_github_client(&server);
    let issues = client.fetch_issues(TOKEN, OWNER, REPO, 50).await.unwrap();

    assert_eq!(issues.len(), 3);
    assert_eq!(requests_to(&server, &repo_path("issues")).await, 2);
}

#[tokio::test]
async fn test_server_error_fails_after_one_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(repo_path("commits")))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = mock_github_client(&server);
    let err = client
        .fetch_commits(TOKEN, OWNER, REPO, 100)
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::ExternalService(_)));
    assert!(err.to_string().contains("503"));
    assert_eq!(requests_to(&server, &repo_path("commits")).await, 2);
}

#[tokio::test]
async fn test_rate_limit_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(repo_path("issues")))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-reset", "1717243200")
                .set_body_json(json!({"message": "API rate limit exceeded"})),
        )
        .mount(&server)
        .await;

    let client = mock_github_client(&server);
    let err = client.fetch_issues(TOKEN, OWNER, REPO, 50).await.unwrap_err();

    match &err {
        IngestError::RateLimited { reset_at } => {
            assert_eq!(reset_at.unwrap().timestamp(), 1_717_243_200);
        }
        other => panic!("expected rate limit, got {:?}", other),
    }
    assert!(err.to_string().contains("rate limit exceeded"));
    assert_eq!(requests_to(&server, &repo_path("issues")).await, 1);
}

#[tokio::test]
async fn test_client_error_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(repo_path("pulls")))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})))
        .mount(&server)
        .await;

    let client = mock_github_client(&server);
    let err = client
        .fetch_pull_requests(TOKEN, OWNER, REPO, 50)
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::ExternalService(_)));
    assert_eq!(requests_to(&server, &repo_path("pulls")).await, 1);
}

#[tokio::test]
async fn test_missing_file_list_degrades_single_pull_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(repo_path("pulls")))
        .respond_with(ResponseTemplate::new(200).set_body_json(pull_request_fixtures(0, 3)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(repo_path("pulls/2/files")))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_files(&server).await;

    let client = mock_github_client(&server);
    let batch = client
        .fetch_pull_requests(TOKEN, OWNER, REPO, 50)
        .await
        .unwrap();

    assert_eq!(batch.pull_requests.len(), 3);
    assert_eq!(batch.missing_files, vec![2]);
    assert!(batch.pull_requests[1].files_changed.is_empty());
    assert_eq!(batch.pull_requests[0].files_changed.len(), 2);
    assert_eq!(batch.pull_requests[2].files_changed.len(), 2);
}

#[tokio::test]
async fn test_unknown_fields_never_surface() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(repo_path("pulls")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": 1, "number": 1, "title": "t", "body": "b",
            "user": {"login": "alice", "email": "private@example.com"},
            "state": "closed", "created_at": "2024-01-01T00:00:00Z",
            "merged_at": "2024-01-02T00:00:00Z", "labels": [],
            "auto_merge": {"merge_method": "squash"},
            "private_notes": "do-not-store"
        }])))
        .mount(&server)
        .await;
    mount_files(&server).await;

    let client = mock_github_client(&server);
    let batch = client
        .fetch_pull_requests(TOKEN, OWNER, REPO, 50)
        .await
        .unwrap();

    let value = serde_json::to_value(&batch.pull_requests[0]).unwrap();
    let keys: BTreeSet<&str> = value.as_object().unwrap().keys().map(|k| k.as_str()).collect();
    let expected: BTreeSet<&str> = [
        "id", "number", "title", "body", "author", "state", "created_at", "merged_at",
        "files_changed", "labels",
    ]
    .into_iter()
    .collect();
    assert_eq!(keys, expected);
    assert!(!value.to_string().contains("do-not-store"));
    assert!(!value.to_string().contains("private@example.com"));
    assert_eq!(batch.pull_requests[0].state, "merged");
}

#[tokio::test]
async fn test_user_repositories_span_pages() {
    let server = MockServer::start().await;
    let first_page: Vec<serde_json::Value> = (0..100)
        .map(|i| {
            json!({
                "id": i,
                "name": format!("repo-{}", i),
                "full_name": format!("octo/repo-{}", i),
                "owner": {"login": "octo"},
                "stargazers_count": 5
            })
        })
        .collect();
    Mock::given(method("GET"))
        .and(path("/user/repos"))
        .and(query_param("page", "1"))
        .and(query_param("per_page", "100"))
        .and(query_param("sort", "updated"))
        .respond_with(ResponseTemplate::new(200).set_body_json(first_page))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/user/repos"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 778, "name": "secret", "full_name": "octo/secret", "owner": {"login": "octo"}, "private": true}
        ])))
        .mount(&server)
        .await;

    let client = mock_github_client(&server);
    let repos = client.fetch_user_repositories(TOKEN).await.unwrap();

    assert_eq!(repos.len(), 101);
    assert_eq!(repos[0].full_name, "octo/repo-0");
    assert_eq!(repos[100].full_name, "octo/secret");
    assert_eq!(repos[100].owner.login, "octo");
    assert_eq!(requests_to(&server, "/user/repos").await, 2);
}

#[tokio::test]
async fn test_huge_limit_returns_what_upstream_has() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(repo_path("commits")))
        .and(query_param("per_page", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(commit_fixtures(0, 7)))
        .mount(&server)
        .await;

    let client = mock_github_client(&server);
    let commits = client
        .fetch_commits(TOKEN, OWNER, REPO, u32::MAX)
        .await
        .unwrap();

    assert_eq!(commits.len(), 7);
    assert_eq!(requests_to(&server, &repo_path("commits")).await, 1);
}

#[tokio::test]
async fn test_rate_limited_file_list_stops_file_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(repo_path("pulls")))
        .respond_with(ResponseTemplate::new(200).set_body_json(pull_request_fixtures(0, 4)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(repo_path("pulls/1/files")))
        .respond_with(ResponseTemplate::new(200).set_body_json(file_fixtures(&["a.rs"])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/repos/octo/widgets/pulls/\d+/files$"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-reset", "1717243200"),
        )
        .mount(&server)
        .await;

    let client = mock_github_client(&server);
    let batch = client
        .fetch_pull_requests(TOKEN, OWNER, REPO, 50)
        .await
        .unwrap();

    assert_eq!(batch.pull_requests.len(), 4);
    assert_eq!(batch.pull_requests[0].files_changed, vec!["a.rs"]);
    assert_eq!(batch.missing_files, vec![2, 3, 4]);

    let file_requests = server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path().ends_with("/files"))
        .count();
    // #1 succeeded, #2 hit the exhausted quota, #3 and #4 were never requested.
    assert_eq!(file_requests, 2);
}

#[tokio::test]
async fn test_empty_credential_is_rejected_without_requests() {
    let server = MockServer::start().await;
    let client = mock_github_client(&server);

    let err = client.fetch_issues("", OWNER, REPO, 50).await.unwrap_err();
    assert!(matches!(err, IngestError::Validation(_)));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}
