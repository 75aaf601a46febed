//! Field normalization
//!
//! Projects GitHub wire records onto the stored entities. Multi-valued
//! fields become ordered `Vec<String>`s, never absent.

use crate::database::models::{Commit, Issue, PullRequest};
use crate::github::types;

const GHOST_AUTHOR: &str = "ghost";

/// GitHub reports merged pull requests as `closed`; keep the merge visible.
pub fn pull_request_state(state: &str, merged: bool) -> String {
    if merged {
        "merged".to_string()
    } else {
        state.to_string()
    }
}

pub fn normalize_pull_request(raw: types::PullRequest, files_changed: Vec<String>) -> PullRequest {
    PullRequest {
        id: raw.id,
        number: raw.number,
        state: pull_request_state(&raw.state, raw.merged_at.is_some()),
        title: raw.title,
        body: raw.body.unwrap_or_default(),
        author: author_login(raw.user),
        created_at: raw.created_at,
        merged_at: raw.merged_at,
        files_changed,
        labels: label_names(raw.labels),
    }
}

/// The issue listing mixes in pull requests; only those carry the linkage field.
pub fn is_pull_request(raw: &types::Issue) -> bool {
    raw.pull_request.is_some()
}

/// Returns `None` for listing entries that are really pull requests.
pub fn normalize_issue(raw: types::Issue) -> Option<Issue> {
    if is_pull_request(&raw) {
        return None;
    }

    Some(Issue {
        id: raw.id,
        title: raw.title,
        body: raw.body.unwrap_or_default(),
        author: author_login(raw.user),
        state: raw.state,
        created_at: raw.created_at,
        closed_at: raw.closed_at,
        labels: label_names(raw.labels),
    })
}

/// Returns `None` when the payload carries neither an author nor a committer date.
pub fn normalize_commit(raw: types::Commit) -> Option<Commit> {
    let signature = raw.commit.author.or(raw.commit.committer)?;

    Some(Commit {
        sha: raw.sha,
        message: raw.commit.message,
        author: signature.name,
        created_at: signature.date,
        files_changed: file_names(raw.files),
    })
}

pub fn file_names(files: Vec<types::ChangedFile>) -> Vec<String> {
    files.into_iter().map(|file| file.filename).collect()
}

fn label_names(labels: Vec<types::Label>) -> Vec<String> {
    labels.into_iter().map(|label| label.name).collect()
}

// Deleted accounts come back as a null user.
fn author_login(user: Option<types::User>) -> String {
    user.map(|u| u.login)
        .unwrap_or_else(|| GHOST_AUTHOR.to_string())
}
