//! Ingestion orchestrator
//!
//! Drives one job through `pending -> running -> terminal`, extracting pull
//! requests, issues and commits in that order. A failing kind never stops
//! the others; the terminal status comes from [`JobOutcome::classify`].

use std::future::Future;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::IngestionLimits;
use crate::database::models::{
    EntityKind, IngestionJob, JobStatus, RecentEntities, Repository,
};
use crate::database::Database;
use crate::error::IngestError;
use crate::github::client::validate_name;
use crate::github::GitHubClient;
use crate::ingestion::outcome::JobOutcome;

/// Largest page a bounded-recency read will return.
pub const MAX_RECENT: u32 = 100;

/// What one kind's extraction produced.
#[derive(Debug, Default)]
struct KindStep {
    persisted: usize,
    degradation: Option<String>,
}

#[derive(Clone)]
pub struct IngestionService {
    db: Database,
    github: GitHubClient,
    limits: IngestionLimits,
}

impl IngestionService {
    pub fn new(db: Database, github: GitHubClient, limits: IngestionLimits) -> Self {
        Self { db, github, limits }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn register_repository(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Repository, IngestError> {
        validate_name("owner", owner)?;
        validate_name("repository", name)?;

        let full_name = format!("{}/{}", owner, name);
        let repository = self.db.upsert_repository(name, &full_name, owner).await?;
        debug!("Registered repository {} as {}", full_name, repository.id);
        Ok(repository)
    }

    /// Registers one of the caller's GitHub repositories by its GitHub id.
    pub async fn register_from_github(
        &self,
        credential: &str,
        github_repo_id: i64,
    ) -> Result<Repository, IngestError> {
        let remote = self
            .github
            .fetch_user_repositories(credential)
            .await?
            .into_iter()
            .find(|repo| repo.id == github_repo_id)
            .ok_or_else(|| IngestError::not_found("GitHub repository", github_repo_id))?;

        self.db
            .upsert_repository(&remote.name, &remote.full_name, &remote.owner.login)
            .await
    }

    pub async fn create_job(
        &self,
        repository_id: i64,
        user_id: &str,
    ) -> Result<IngestionJob, IngestError> {
        if user_id.trim().is_empty() {
            return Err(IngestError::Validation("user id is required".to_string()));
        }
        self.require_repository(repository_id).await?;

        let job = self.db.create_job(repository_id, Some(user_id)).await?;
        info!(
            "Created ingestion job {} for repository {} (requested by {})",
            job.id, repository_id, user_id
        );
        Ok(job)
    }

    pub async fn run_job(
        &self,
        job: &IngestionJob,
        credential: &str,
    ) -> Result<JobStatus, IngestError> {
        self.run_job_until(job, credential, std::future::pending::<()>())
            .await
    }

    /// Runs `job` to a terminal state, giving up on the remaining kinds once
    /// `cancelled` resolves.
    ///
    /// Errors are only returned when the job cannot be started or its final
    /// state cannot be written; extraction failures end up in the job row.
    pub async fn run_job_until<C>(
        &self,
        job: &IngestionJob,
        credential: &str,
        cancelled: C,
    ) -> Result<JobStatus, IngestError>
    where
        C: Future<Output = ()>,
    {
        let repository = self.require_repository(job.repo_id).await?;
        self.db.mark_job_running(job.id).await?;
        info!("Job {} running for {}", job.id, repository.full_name);

        if credential.trim().is_empty() {
            return self
                .finish(job.id, JobStatus::Failed, Some("GitHub credential is required"))
                .await;
        }

        tokio::pin!(cancelled);
        let mut outcome = JobOutcome::default();
        let mut kinds = EntityKind::ALL.into_iter();

        while let Some(kind) = kinds.next() {
            tokio::select! {
                result = self.ingest_kind(kind, &repository, credential) => match result {
                    Ok(step) => {
                        info!("Job {}: persisted {} {} records", job.id, step.persisted, kind);
                        outcome.record_success();
                        if let Some(message) = step.degradation {
                            warn!("Job {}: {}", job.id, message);
                            outcome.record_degradation(message);
                        }
                    }
                    Err(e) => {
                        warn!("Job {}: {} extraction failed: {}", job.id, kind, e);
                        outcome.record_failure(kind, &e);
                    }
                },
                _ = &mut cancelled => {
                    warn!("Job {} cancelled during {} extraction", job.id, kind);
                    outcome.record_failure(kind, &IngestError::Cancelled);
                    for remaining in kinds.by_ref() {
                        outcome.record_failure(remaining, &IngestError::Cancelled);
                    }
                    break;
                }
            }
        }

        let (status, message) = outcome.classify();
        self.finish(job.id, status, message.as_deref()).await
    }

    /// Runs the job on its own task; a `true` on `shutdown` cancels it.
    pub fn spawn_job(
        &self,
        job: IngestionJob,
        credential: String,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let cancelled = async move {
                let requested = shutdown.wait_for(|stop| *stop).await.is_ok();
                // A dropped sender means nobody will ever ask us to stop.
                if !requested {
                    std::future::pending::<()>().await;
                }
            };

            match service.run_job_until(&job, &credential, cancelled).await {
                Ok(status) => debug!("Background job {} ended as {}", job.id, status),
                Err(e) => error!("Background job {} could not run: {}", job.id, e),
            }
        })
    }

    pub async fn get_job_status(&self, job_id: i64) -> Result<IngestionJob, IngestError> {
        self.db
            .get_job(job_id)
            .await?
            .ok_or_else(|| IngestError::not_found("Ingestion job", job_id))
    }

    pub async fn latest_job_for_repository(
        &self,
        repository_id: i64,
    ) -> Result<IngestionJob, IngestError> {
        self.require_repository(repository_id).await?;
        self.db
            .list_jobs_for_repository(repository_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                IngestError::NotFound(format!(
                    "No ingestion job for repository {}",
                    repository_id
                ))
            })
    }

    pub async fn repositories_for_owner(
        &self,
        owner: &str,
    ) -> Result<Vec<Repository>, IngestError> {
        self.db.list_repositories_by_owner(owner).await
    }

    /// Newest-first read of one kind; `limit` is clamped to [`MAX_RECENT`].
    pub async fn get_recent(
        &self,
        repository_id: i64,
        kind: EntityKind,
        limit: u32,
    ) -> Result<RecentEntities, IngestError> {
        if limit == 0 {
            return Err(IngestError::Validation(
                "limit must be positive".to_string(),
            ));
        }
        self.require_repository(repository_id).await?;

        let limit = i64::from(limit.min(MAX_RECENT));
        let recent = match kind {
            EntityKind::PullRequest => {
                RecentEntities::PullRequests(self.db.recent_pull_requests(repository_id, limit).await?)
            }
            EntityKind::Issue => {
                RecentEntities::Issues(self.db.recent_issues(repository_id, limit).await?)
            }
            EntityKind::Commit => {
                RecentEntities::Commits(self.db.recent_commits(repository_id, limit).await?)
            }
        };
        Ok(recent)
    }

    async fn ingest_kind(
        &self,
        kind: EntityKind,
        repository: &Repository,
        credential: &str,
    ) -> Result<KindStep, IngestError> {
        let (owner, name) = (repository.owner.as_str(), repository.name.as_str());

        match kind {
            EntityKind::PullRequest => {
                let batch = self
                    .github
                    .fetch_pull_requests(credential, owner, name, self.limits.pull_requests)
                    .await?;
                for pr in &batch.pull_requests {
                    self.db.upsert_pull_request(repository.id, pr).await?;
                }

                let degradation = if batch.missing_files.is_empty() {
                    None
                } else {
                    let numbers: Vec<String> = batch
                        .missing_files
                        .iter()
                        .map(|number| format!("#{}", number))
                        .collect();
                    Some(format!(
                        "file list unavailable for pull requests {}",
                        numbers.join(", ")
                    ))
                };

                Ok(KindStep {
                    persisted: batch.pull_requests.len(),
                    degradation,
                })
            }
            EntityKind::Issue => {
                let issues = self
                    .github
                    .fetch_issues(credential, owner, name, self.limits.issues)
                    .await?;
                for issue in &issues {
                    self.db.upsert_issue(repository.id, issue).await?;
                }
                Ok(KindStep {
                    persisted: issues.len(),
                    degradation: None,
                })
            }
            EntityKind::Commit => {
                let commits = self
                    .github
                    .fetch_commits(credential, owner, name, self.limits.commits)
                    .await?;
                let mut inserted = 0;
                for commit in &commits {
                    if self.db.insert_commit(repository.id, commit).await? {
                        inserted += 1;
                    }
                }
                debug!(
                    "{} of {} commits for {} were new",
                    inserted,
                    commits.len(),
                    repository.full_name
                );
                Ok(KindStep {
                    persisted: commits.len(),
                    degradation: None,
                })
            }
        }
    }

    async fn finish(
        &self,
        job_id: i64,
        status: JobStatus,
        message: Option<&str>,
    ) -> Result<JobStatus, IngestError> {
        let job = self.db.finish_job(job_id, status, message).await?;
        match job.status {
            JobStatus::Completed => info!("Job {} completed", job_id),
            other => warn!(
                "Job {} finished as {}: {}",
                job_id,
                other,
                job.error_message.as_deref().unwrap_or("")
            ),
        }
        Ok(job.status)
    }

    async fn require_repository(&self, repository_id: i64) -> Result<Repository, IngestError> {
        self.db
            .get_repository(repository_id)
            .await?
            .ok_or_else(|| IngestError::not_found("Repository", repository_id))
    }
}
