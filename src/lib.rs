pub mod api;
pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod github;
pub mod ingestion;

pub use error::IngestError;
