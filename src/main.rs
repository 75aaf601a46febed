use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use context_keeper::api::{self, AppState};
use context_keeper::auth::TokenSigner;
use context_keeper::config::AppConfig;
use context_keeper::database::Database;
use context_keeper::github::GitHubClient;
use context_keeper::ingestion::IngestionService;

const JOB_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "context-keeper")]
#[command(about = "Ingest GitHub pull requests, issues and commits into a local store")]
struct Cli {
    /// Optional TOML configuration file
    #[arg(long, default_value = "context-keeper.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API
    Serve,
    /// Apply database migrations and exit
    Migrate,
    /// Ingest one repository in the foreground
    Ingest {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        repo: String,
        /// GitHub token used for extraction
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// Show an ingestion job
    Job {
        #[arg(long)]
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "context_keeper=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(Some(&cli.config)).context("Failed to load configuration")?;
    info!("Configuration loaded");

    let database = Database::new(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    database
        .run_migrations()
        .await
        .context("Failed to run database migrations")?;

    match cli.command {
        Command::Migrate => {
            info!("Database is up to date");
            Ok(())
        }
        Command::Serve => serve(config, database).await,
        Command::Ingest { owner, repo, token } => {
            let service = build_service(&config, database)?;
            let repository = service.register_repository(&owner, &repo).await?;
            let job = service.create_job(repository.id, "cli").await?;
            service.run_job(&job, &token).await?;

            let job = service.get_job_status(job.id).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
            Ok(())
        }
        Command::Job { id } => {
            let service = build_service(&config, database)?;
            let job = service.get_job_status(id).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
            Ok(())
        }
    }
}

fn build_service(config: &AppConfig, database: Database) -> Result<IngestionService> {
    let github = GitHubClient::new(&config.github).context("Failed to create GitHub client")?;
    Ok(IngestionService::new(database, github, config.limits))
}

async fn serve(config: AppConfig, database: Database) -> Result<()> {
    config
        .validate_for_server()
        .context("Invalid server configuration")?;

    let service = build_service(&config, database)?;
    let signer = TokenSigner::new(
        &config.jwt_secret,
        chrono::Duration::hours(config.jwt_ttl_hours),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let app = api::router(AppState::new(service, signer, shutdown_rx));

    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port)
        .parse()
        .context("Invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Server listening on {}", addr);

    let signal_tx = shutdown_tx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested, cancelling running jobs");
            let _ = signal_tx.send(true);
        })
        .await
        .context("Server error")?;

    // Every running job holds a receiver until its row is terminal.
    if tokio::time::timeout(JOB_DRAIN_TIMEOUT, shutdown_tx.closed())
        .await
        .is_err()
    {
        warn!("Ingestion jobs still running after {:?}", JOB_DRAIN_TIMEOUT);
    }

    Ok(())
}
