use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::PgPool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

mod auth;
mod config;
mod db;
mod errors;
mod gate;
mod models;
mod report;
mod routes;
mod service;
mod stats;
mod store;

use crate::config::Config;
use crate::service::Recomputer;
use crate::store::AggregateStore;

#[derive(Parser)]
#[command(name = "class-averages")]
#[command(about = "Per-classroom score averages for teachers and head teachers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the classroom and analytics schemas
    InitDb,
    /// Load a demo school with classrooms and progress
    Seed,
    /// Import progress rows from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Recalculate and store class averages
    #[command(group(
        ArgGroup::new("scope")
            .args(["classroom", "school"])
            .multiple(false)
    ))]
    Recompute {
        #[arg(long)]
        classroom: Option<Uuid>,
        #[arg(long)]
        school: Option<Uuid>,
    },
    /// Generate a markdown report from stored averages
    Report {
        #[arg(long)]
        school: Uuid,
        #[arg(long, default_value = "class-averages.md")]
        out: PathBuf,
    },
    /// Serve the HTTP recalculation trigger
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let pool = db::create_pool(&config.database_url, config.max_connections).await?;
    let analytics = config
        .analytics_database_url
        .as_deref()
        .map(|url| db::create_lazy_pool(url, config.max_connections))
        .transpose()?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            if let Some(analytics) = &analytics {
                db::init_analytics(analytics).await?;
            } else {
                tracing::warn!("ANALYTICS_DATABASE_URL not set; skipping analytics schema");
            }
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted for school {}.", db::seed_school());
        }
        Commands::Import { csv } => {
            let (inserted, skipped) = db::import_csv(&pool, &csv).await?;
            println!(
                "Inserted {inserted} progress rows from {} ({skipped} skipped).",
                csv.display()
            );
        }
        Commands::Recompute { classroom, school } => {
            let filter = service::resolve_filter(classroom, school)?;
            let recomputer = build_recomputer(&config, &pool, analytics.clone());
            let outcome = recomputer.recompute(filter).await?;

            if outcome.aggregates.is_empty() {
                println!("No progress records found for this scope.");
                return Ok(());
            }

            println!("Class averages:");
            for agg in &outcome.aggregates {
                println!(
                    "- {} average {:.2} median {:.2} (min {}, max {}) across {} assignments",
                    agg.classroom_name,
                    agg.average_score,
                    agg.median_score,
                    agg.min_score,
                    agg.max_score,
                    agg.assignment_count
                );
            }
            println!("Stored {} classrooms.", outcome.persisted);
        }
        Commands::Report { school, out } => {
            let analytics = analytics
                .as_ref()
                .context("ANALYTICS_DATABASE_URL must be set to build a report")?;
            let aggregates = db::fetch_stored_aggregates(analytics, school).await?;
            let report = report::build_report(&school.to_string(), &aggregates);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Serve => {
            let secret = config.require_jwt_secret()?;
            let recomputer = build_recomputer(&config, &pool, analytics.clone());
            let app = routes::create_router(routes::AppState {
                recomputer: Arc::new(recomputer),
                jwt_secret: Arc::from(secret),
                pool: Some(pool.clone()),
            });

            let addr = config.server_address();
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("failed to bind {addr}"))?;
            tracing::info!(%addr, "class averages trigger listening");
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}

fn build_recomputer(config: &Config, pool: &PgPool, analytics: Option<PgPool>) -> Recomputer {
    let primary = Arc::new(db::PrimaryDb::new(pool.clone()));
    let store = analytics.map(|pool| Arc::new(db::AnalyticsDb::new(pool)) as Arc<dyn AggregateStore>);

    Recomputer::new(primary.clone(), primary, store, config.recompute_settings())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "class_averages=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
