use clap::{Parser, Subcommand};

use gastos_backend::{config::Config, db, services};

/// Operational CLI for the gastos backend.
#[derive(Parser)]
#[command(name = "gastos-admin")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Delete audit entries older than the retention window
    PurgeAudit {
        /// Retention in days (defaults to AUDIT_RETENTION_DAYS)
        #[arg(long)]
        days: Option<i64>,
    },
    /// Run one generation pass over due recurring templates
    Generate,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    let pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    match cli.command {
        Command::PurgeAudit { days } => {
            let days = days.filter(|&d| d > 0).unwrap_or(config.audit_retention_days);
            let purged = services::audit::purge_older_than(&pool, days)
                .await
                .expect("Audit purge failed");
            println!("Purged {} audit entries older than {} days", purged, days);
        }
        Command::Generate => {
            let (audit, worker) = services::audit::spawn_audit_worker(pool.clone());
            let outcome = services::generator::run_generation(&pool, &audit)
                .await
                .expect("Generation pass failed");
            drop(audit);
            worker.await.expect("Audit drainer failed");
            println!(
                "Generated {} movements, deactivated {} templates",
                outcome.generated, outcome.deactivated
            );
        }
    }
}
