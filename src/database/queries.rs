use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::types::Json;
use sqlx::Row;
use tracing::debug;

use super::Database;
use crate::database::models::*;
use crate::error::IngestError;

impl Database {
    /// Insert or refresh a repository keyed by its full name.
    pub async fn upsert_repository(
        &self,
        name: &str,
        full_name: &str,
        owner: &str,
    ) -> Result<Repository, IngestError> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO repos (name, full_name, owner, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (full_name) DO UPDATE SET
                name = excluded.name,
                owner = excluded.owner,
                updated_at = excluded.updated_at
            RETURNING id, name, full_name, owner, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(full_name)
        .bind(owner)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        repository_from_row(&row)
    }

    pub async fn get_repository(&self, repo_id: i64) -> Result<Option<Repository>, IngestError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, full_name, owner, created_at, updated_at
            FROM repos
            WHERE id = ?
            "#,
        )
        .bind(repo_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(repository_from_row).transpose()
    }

    pub async fn list_repositories_by_owner(
        &self,
        owner: &str,
    ) -> Result<Vec<Repository>, IngestError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, full_name, owner, created_at, updated_at
            FROM repos
            WHERE owner = ?
            ORDER BY updated_at DESC
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(repository_from_row).collect()
    }

    /// Removes a repository together with all of its content and jobs.
    pub async fn delete_repository(&self, repo_id: i64) -> Result<bool, IngestError> {
        let result = sqlx::query("DELETE FROM repos WHERE id = ?")
            .bind(repo_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn upsert_pull_request(
        &self,
        repo_id: i64,
        pr: &PullRequest,
    ) -> Result<(), IngestError> {
        sqlx::query(
            r#"
            INSERT INTO pull_requests
                (id, repo_id, number, title, body, author, state, created_at, merged_at, files_changed, labels)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (repo_id, number) DO UPDATE SET
                title = excluded.title,
                body = excluded.body,
                state = excluded.state,
                merged_at = excluded.merged_at,
                files_changed = excluded.files_changed,
                labels = excluded.labels
            "#,
        )
        .bind(pr.id)
        .bind(repo_id)
        .bind(pr.number)
        .bind(&pr.title)
        .bind(&pr.body)
        .bind(&pr.author)
        .bind(&pr.state)
        .bind(pr.created_at)
        .bind(pr.merged_at)
        .bind(Json(&pr.files_changed))
        .bind(Json(&pr.labels))
        .execute(&self.pool)
        .await?;

        debug!("Upserted pull request #{} for repo {}", pr.number, repo_id);
        Ok(())
    }

    pub async fn recent_pull_requests(
        &self,
        repo_id: i64,
        limit: i64,
    ) -> Result<Vec<PullRequest>, IngestError> {
        let rows = sqlx::query(
            r#"
            SELECT id, number, title, body, author, state, created_at, merged_at, files_changed, labels
            FROM pull_requests
            WHERE repo_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(repo_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<PullRequest, IngestError> {
                Ok(PullRequest {
                    id: row.try_get("id")?,
                    number: row.try_get("number")?,
                    title: row.try_get("title")?,
                    body: text_or_empty(row, "body")?,
                    author: row.try_get("author")?,
                    state: row.try_get("state")?,
                    created_at: row.try_get("created_at")?,
                    merged_at: row.try_get("merged_at")?,
                    files_changed: string_list(row, "files_changed")?,
                    labels: string_list(row, "labels")?,
                })
            })
            .collect()
    }

    pub async fn upsert_issue(&self, repo_id: i64, issue: &Issue) -> Result<(), IngestError> {
        sqlx::query(
            r#"
            INSERT INTO issues (id, repo_id, title, body, author, state, created_at, closed_at, labels)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                title = excluded.title,
                body = excluded.body,
                state = excluded.state,
                closed_at = excluded.closed_at,
                labels = excluded.labels
            "#,
        )
        .bind(issue.id)
        .bind(repo_id)
        .bind(&issue.title)
        .bind(&issue.body)
        .bind(&issue.author)
        .bind(&issue.state)
        .bind(issue.created_at)
        .bind(issue.closed_at)
        .bind(Json(&issue.labels))
        .execute(&self.pool)
        .await?;

        debug!("Upserted issue {} for repo {}", issue.id, repo_id);
        Ok(())
    }

    pub async fn recent_issues(&self, repo_id: i64, limit: i64) -> Result<Vec<Issue>, IngestError> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, body, author, state, created_at, closed_at, labels
            FROM issues
            WHERE repo_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(repo_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Issue, IngestError> {
                Ok(Issue {
                    id: row.try_get("id")?,
                    title: row.try_get("title")?,
                    body: text_or_empty(row, "body")?,
                    author: row.try_get("author")?,
                    state: row.try_get("state")?,
                    created_at: row.try_get("created_at")?,
                    closed_at: row.try_get("closed_at")?,
                    labels: string_list(row, "labels")?,
                })
            })
            .collect()
    }

    /// Commits are immutable: an existing SHA is left untouched.
    pub async fn insert_commit(&self, repo_id: i64, commit: &Commit) -> Result<bool, IngestError> {
        if !is_commit_sha(&commit.sha) {
            return Err(IngestError::Validation(format!(
                "Invalid commit SHA: {}",
                commit.sha
            )));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO commits (sha, repo_id, message, author, created_at, files_changed)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (sha) DO NOTHING
            "#,
        )
        .bind(&commit.sha)
        .bind(repo_id)
        .bind(&commit.message)
        .bind(&commit.author)
        .bind(commit.created_at)
        .bind(Json(&commit.files_changed))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn recent_commits(&self, repo_id: i64, limit: i64) -> Result<Vec<Commit>, IngestError> {
        let rows = sqlx::query(
            r#"
            SELECT sha, message, author, created_at, files_changed
            FROM commits
            WHERE repo_id = ?
            ORDER BY created_at DESC, sha DESC
            LIMIT ?
            "#,
        )
        .bind(repo_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Commit, IngestError> {
                Ok(Commit {
                    sha: row.try_get("sha")?,
                    message: row.try_get("message")?,
                    author: row.try_get("author")?,
                    created_at: row.try_get("created_at")?,
                    files_changed: string_list(row, "files_changed")?,
                })
            })
            .collect()
    }

    pub async fn count_entities(&self, repo_id: i64, kind: EntityKind) -> Result<i64, IngestError> {
        let query = match kind {
            EntityKind::PullRequest => "SELECT COUNT(*) FROM pull_requests WHERE repo_id = ?",
            EntityKind::Issue => "SELECT COUNT(*) FROM issues WHERE repo_id = ?",
            EntityKind::Commit => "SELECT COUNT(*) FROM commits WHERE repo_id = ?",
        };
        let count: i64 = sqlx::query_scalar(query)
            .bind(repo_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn create_job(
        &self,
        repo_id: i64,
        requested_by: Option<&str>,
    ) -> Result<IngestionJob, IngestError> {
        let row = sqlx::query(
            r#"
            INSERT INTO ingestion_jobs (repo_id, status, requested_by, created_at)
            VALUES (?, 'pending', ?, ?)
            RETURNING id, repo_id, status, requested_by, created_at, started_at, finished_at, error_message
            "#,
        )
        .bind(repo_id)
        .bind(requested_by)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        job_from_row(&row)
    }

    pub async fn get_job(&self, job_id: i64) -> Result<Option<IngestionJob>, IngestError> {
        let row = sqlx::query(
            r#"
            SELECT id, repo_id, status, requested_by, created_at, started_at, finished_at, error_message
            FROM ingestion_jobs
            WHERE id = ?
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    pub async fn list_jobs_for_repository(
        &self,
        repo_id: i64,
    ) -> Result<Vec<IngestionJob>, IngestError> {
        let rows = sqlx::query(
            r#"
            SELECT id, repo_id, status, requested_by, created_at, started_at, finished_at, error_message
            FROM ingestion_jobs
            WHERE repo_id = ?
            ORDER BY id DESC
            "#,
        )
        .bind(repo_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    /// `pending -> running`; stamps `started_at` exactly once.
    pub async fn mark_job_running(&self, job_id: i64) -> Result<IngestionJob, IngestError> {
        let row = sqlx::query(
            r#"
            UPDATE ingestion_jobs
            SET status = 'running', started_at = ?
            WHERE id = ? AND status = 'pending'
            RETURNING id, repo_id, status, requested_by, created_at, started_at, finished_at, error_message
            "#,
        )
        .bind(Utc::now())
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => job_from_row(&row),
            None => Err(self.rejected_transition(job_id, JobStatus::Running).await),
        }
    }

    /// `running -> terminal`; stamps `finished_at` and the error text exactly once.
    pub async fn finish_job(
        &self,
        job_id: i64,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<IngestionJob, IngestError> {
        if !JobStatus::Running.can_transition_to(status) {
            return Err(IngestError::Validation(format!(
                "{} is not a terminal job status",
                status
            )));
        }

        let row = sqlx::query(
            r#"
            UPDATE ingestion_jobs
            SET status = ?, finished_at = ?, error_message = ?
            WHERE id = ? AND status = 'running'
            RETURNING id, repo_id, status, requested_by, created_at, started_at, finished_at, error_message
            "#,
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(error_message)
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => job_from_row(&row),
            None => Err(self.rejected_transition(job_id, status).await),
        }
    }

    async fn rejected_transition(&self, job_id: i64, next: JobStatus) -> IngestError {
        match self.get_job(job_id).await {
            Ok(Some(job)) => IngestError::Validation(format!(
                "Job {} cannot move from {} to {}",
                job_id, job.status, next
            )),
            Ok(None) => IngestError::not_found("Ingestion job", job_id),
            Err(err) => err,
        }
    }
}

fn repository_from_row(row: &SqliteRow) -> Result<Repository, IngestError> {
    Ok(Repository {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        full_name: row.try_get("full_name")?,
        owner: row.try_get("owner")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn job_from_row(row: &SqliteRow) -> Result<IngestionJob, IngestError> {
    let status: String = row.try_get("status")?;
    Ok(IngestionJob {
        id: row.try_get("id")?,
        repo_id: row.try_get("repo_id")?,
        status: status.parse()?,
        requested_by: row.try_get("requested_by")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        error_message: row.try_get("error_message")?,
    })
}

/// Decodes a JSON array column; rows written before the NOT NULL default read as empty.
fn string_list(row: &SqliteRow, column: &str) -> Result<Vec<String>, IngestError> {
    let value: Option<Json<Vec<String>>> = row.try_get(column)?;
    Ok(value.map(|json| json.0).unwrap_or_default())
}

fn text_or_empty(row: &SqliteRow, column: &str) -> Result<String, IngestError> {
    let value: Option<String> = row.try_get(column)?;
    Ok(value.unwrap_or_default())
}

pub fn is_commit_sha(sha: &str) -> bool {
    sha.len() == 40 && sha.chars().all(|c| c.is_ascii_hexdigit())
}
