//! Application configuration
//!
//! Layered as built-in defaults, then an optional TOML file, then
//! `CONTEXT_KEEPER_*` environment variables (`__` separates nested keys,
//! e.g. `CONTEXT_KEEPER_GITHUB__TIMEOUT_SECS=10`).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::IngestError;

/// Hard per-job extraction caps.
pub const MAX_PULL_REQUESTS: u32 = 50;
pub const MAX_ISSUES: u32 = 50;
pub const MAX_COMMITS: u32 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub jwt_secret: String,
    pub jwt_ttl_hours: i64,
    pub github: GitHubConfig,
    pub limits: IngestionLimits,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub api_base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub network_retry_backoff_ms: u64,
    pub server_error_retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionLimits {
    pub pull_requests: u32,
    pub issues: u32,
    pub commits: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://context_keeper.db".to_string(),
            server_host: "0.0.0.0".to_string(),
            server_port: 8080,
            jwt_secret: String::new(),
            jwt_ttl_hours: 24,
            github: GitHubConfig::default(),
            limits: IngestionLimits::default(),
        }
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.github.com".to_string(),
            user_agent: "ContextKeeper/1.0".to_string(),
            timeout_secs: 30,
            network_retry_backoff_ms: 1_000,
            server_error_retry_backoff_ms: 2_000,
        }
    }
}

impl Default for IngestionLimits {
    fn default() -> Self {
        Self {
            pull_requests: MAX_PULL_REQUESTS,
            issues: MAX_ISSUES,
            commits: MAX_COMMITS,
        }
    }
}

impl GitHubConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn network_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.network_retry_backoff_ms)
    }

    pub fn server_error_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.server_error_retry_backoff_ms)
    }
}

impl AppConfig {
    /// Load configuration, reading `path` if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self, IngestError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("CONTEXT_KEEPER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        let mut problems = Vec::new();

        if self.database_url.trim().is_empty() {
            problems.push("database_url is required".to_string());
        }
        if self.server_port == 0 {
            problems.push("server_port must be between 1 and 65535".to_string());
        }
        if self.jwt_ttl_hours <= 0 {
            problems.push("jwt_ttl_hours must be positive".to_string());
        }
        if self.github.api_base_url.trim().is_empty() {
            problems.push("github.api_base_url is required".to_string());
        }
        if self.github.timeout_secs == 0 {
            problems.push("github.timeout_secs must be positive".to_string());
        }

        let caps = [
            ("limits.pull_requests", self.limits.pull_requests, MAX_PULL_REQUESTS),
            ("limits.issues", self.limits.issues, MAX_ISSUES),
            ("limits.commits", self.limits.commits, MAX_COMMITS),
        ];
        for (name, value, cap) in caps {
            if value == 0 || value > cap {
                problems.push(format!("{} must be between 1 and {}", name, cap));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(IngestError::Config(problems.join(", ")))
        }
    }

    /// Extra checks that only matter when serving HTTP.
    pub fn validate_for_server(&self) -> Result<(), IngestError> {
        if self.jwt_secret.trim().is_empty() {
            return Err(IngestError::Config("jwt_secret is required".to_string()));
        }
        Ok(())
    }
}
