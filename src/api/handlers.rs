use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::AppState;
use crate::auth::SessionClaims;
use crate::database::models::{EntityKind, IngestionJob, RecentEntities, Repository};
use crate::error::IngestError;

const DEFAULT_RECENT_LIMIT: u32 = 20;

/// Either a GitHub repository id from the caller's account, or an owner/name pair.
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub repo_id: Option<i64>,
    pub owner: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<u32>,
}

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "context-keeper",
        "timestamp": chrono::Utc::now()
    }))
}

/// Ready once the database answers.
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.service.database().ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "checks": {"database": {"status": "healthy"}}
            })),
        ),
        Err(e) => {
            warn!("Readiness check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "not_ready",
                    "checks": {"database": {"status": "unhealthy", "error": e.to_string()}}
                })),
            )
        }
    }
}

pub async fn metrics(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "uptime_seconds": state.started_at.elapsed().as_secs_f64(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn ingest_repository(
    State(state): State<AppState>,
    claims: SessionClaims,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), IngestError> {
    let Json(request) = payload?;

    let repository = match request {
        IngestRequest {
            repo_id: Some(github_id),
            ..
        } => {
            state
                .service
                .register_from_github(&claims.github_token, github_id)
                .await?
        }
        IngestRequest {
            owner: Some(owner),
            name: Some(name),
            ..
        } => state.service.register_repository(&owner, &name).await?,
        _ => {
            return Err(IngestError::Validation(
                "either repo_id or owner and name are required".to_string(),
            ))
        }
    };

    let job = state.service.create_job(repository.id, &claims.sub).await?;
    info!(
        "User {} started ingestion job {} for {}",
        claims.login, job.id, repository.full_name
    );
    let response = json!({
        "job_id": job.id,
        "repo_id": repository.id,
        "status": job.status,
    });
    state
        .service
        .spawn_job(job, claims.github_token, state.shutdown.clone());

    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn list_repositories(
    State(state): State<AppState>,
    claims: SessionClaims,
) -> Result<Json<Vec<Repository>>, IngestError> {
    let repositories = state.service.repositories_for_owner(&claims.login).await?;
    Ok(Json(repositories))
}

pub async fn repository_status(
    State(state): State<AppState>,
    _claims: SessionClaims,
    repo_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<IngestionJob>, IngestError> {
    let Path(repo_id) = repo_id?;
    let job = state.service.latest_job_for_repository(repo_id).await?;
    Ok(Json(job))
}

pub async fn job_status(
    State(state): State<AppState>,
    _claims: SessionClaims,
    job_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<IngestionJob>, IngestError> {
    let Path(job_id) = job_id?;
    let job = state.service.get_job_status(job_id).await?;
    Ok(Json(job))
}

pub async fn recent_entities(
    State(state): State<AppState>,
    _claims: SessionClaims,
    params: Result<Path<(i64, String)>, PathRejection>,
    query: Result<Query<RecentQuery>, QueryRejection>,
) -> Result<Json<RecentEntities>, IngestError> {
    let Path((repo_id, kind)) = params?;
    let Query(query) = query?;

    let kind: EntityKind = kind.parse()?;
    let limit = query.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    let recent = state.service.get_recent(repo_id, kind, limit).await?;
    Ok(Json(recent))
}
