use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::auth::TokenError;

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        Self::ExternalService(format!("Failed to decode response: {}", err))
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for IngestError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Persistence(format!("Migration failed: {}", err))
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        Self::ExternalService(format!("HTTP request failed: {}", err))
    }
}

impl From<config::ConfigError> for IngestError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("GitHub API error: {0}")]
    ExternalService(String),

    #[error("GitHub API rate limit exceeded, resets at {}", describe_reset(.reset_at))]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Persistence(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(#[from] TokenError),

    #[error("Ingestion cancelled")]
    Cancelled,
}

impl IngestError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{} {} does not exist", what, id))
    }
}

fn describe_reset(reset_at: &Option<DateTime<Utc>>) -> String {
    match reset_at {
        Some(at) => at.to_rfc3339(),
        None => "an unknown time".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
