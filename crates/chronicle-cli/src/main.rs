//! Chronicle operator CLI entry point.

use std::process::ExitCode;

use chronicle_cli::commands::Cli;
use chronicle_cli::config::Config;
use chronicle_cli::error::AppError;
use chronicle_cli::state::AppState;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if it exists.
    let _ = dotenvy::dotenv();

    // Initialize tracing subscriber. Command output owns stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            ExitCode::from(err.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let config = Config::from_env()?;

    // Create database connection pool.
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;

    let state = AppState::postgres(pool, &config);
    let mut stdout = std::io::stdout().lock();
    cli.command.execute(&state, &mut stdout).await
}
