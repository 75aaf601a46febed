#![allow(dead_code)]

use chrono::{Duration, TimeZone, Utc};
use serde_json::{json, Value};
use wiremock::MockServer;

use context_keeper::config::{GitHubConfig, IngestionLimits};
use context_keeper::database::Database;
use context_keeper::github::GitHubClient;
use context_keeper::ingestion::IngestionService;

pub const TOKEN: &str = "gho_test_token";
pub const OWNER: &str = "octo";
pub const REPO: &str = "widgets";

/// Setup an in-memory SQLite database for testing
pub async fn setup_test_db() -> Database {
    Database::new_in_memory()
        .await
        .expect("Failed to create test database")
}

/// GitHub settings pointed at a mock server, with millisecond backoffs.
pub fn mock_github_config(server: &MockServer) -> GitHubConfig {
    GitHubConfig {
        api_base_url: server.uri(),
        user_agent: "context-keeper-tests".to_string(),
        timeout_secs: 5,
        network_retry_backoff_ms: 10,
        server_error_retry_backoff_ms: 10,
    }
}

pub fn mock_github_client(server: &MockServer) -> GitHubClient {
    GitHubClient::new(&mock_github_config(server)).expect("Failed to create GitHub client")
}

pub async fn setup_service(server: &MockServer) -> IngestionService {
    IngestionService::new(
        setup_test_db().await,
        mock_github_client(server),
        IngestionLimits::default(),
    )
}

pub fn repo_path(suffix: &str) -> String {
    format!("/repos/{}/{}/{}", OWNER, REPO, suffix)
}

/// Whole-second timestamps, newest first, one hour apart.
fn timestamp(index: usize) -> String {
    let base = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    (base - Duration::hours(index as i64)).to_rfc3339()
}

pub fn sha(index: usize) -> String {
    format!("{:040x}", index + 1)
}

/// Pull request listing entries numbered from `start`, with extra upstream fields.
pub fn pull_request_fixtures(start: usize, count: usize) -> Value {
    let items: Vec<Value> = (start..start + count)
        .map(|i| {
            json!({
                "id": 1000 + i,
                "number": i + 1,
                "title": format!("Pull request {}", i + 1),
                "body": format!("Body {}", i + 1),
                "user": {"login": "alice", "type": "User"},
                "state": "open",
                "created_at": timestamp(i),
                "merged_at": null,
                "labels": [{"name": "enhancement", "color": "a2eeef"}],
                "head": {"sha": sha(i)},
                "draft": false
            })
        })
        .collect();
    Value::Array(items)
}

/// Issue listing entries numbered from `start`, every fifth one a pull request.
pub fn issue_fixtures(start: usize, count: usize, with_pull_requests: bool) -> Value {
    let items: Vec<Value> = (start..start + count)
        .map(|i| {
            let mut issue = json!({
                "id": 5000 + i,
                "number": i + 1,
                "title": format!("Issue {}", i + 1),
                "body": null,
                "user": {"login": "bob"},
                "state": "open",
                "created_at": timestamp(i),
                "closed_at": null,
                "labels": [{"name": "bug"}],
                "comments": 3
            });
            if with_pull_requests && i % 5 == 4 {
                issue["pull_request"] = json!({"url": "https://api.github.com/pulls/1"});
            }
            issue
        })
        .collect();
    Value::Array(items)
}

pub fn commit_fixtures(start: usize, count: usize) -> Value {
    let items: Vec<Value> = (start..start + count)
        .map(|i| {
            json!({
                "sha": sha(i),
                "node_id": format!("C_{}", i),
                "commit": {
                    "message": format!("Commit {}", i + 1),
                    "author": {"name": "Carol", "email": "carol@example.com", "date": timestamp(i)},
                    "committer": {"name": "GitHub", "date": timestamp(i)}
                },
                "html_url": "https://github.com/octo/widgets/commit/x"
            })
        })
        .collect();
    Value::Array(items)
}

pub fn file_fixtures(names: &[&str]) -> Value {
    Value::Array(
        names
            .iter()
            .map(|name| json!({"filename": name, "status": "modified", "additions": 1}))
            .collect(),
    )
}
