// Database schema definitions and migrations
// The SQL lives in `migrations/` and is embedded at compile time.

use sqlx::migrate::Migrator;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub const TABLES: [&str; 5] = [
    "repos",
    "pull_requests",
    "issues",
    "commits",
    "ingestion_jobs",
];
