//! Opinion ETL - customer opinions into the star-schema warehouse
//!
//! Usage:
//!   # Full run: sources -> staging -> warehouse
//!   cargo run --bin opinion-etl -- run
//!
//!   # Stage only, leave the warehouse untouched:
//!   cargo run --bin opinion-etl -- run --dry-run
//!
//!   # Append staged dimensions to the warehouse, then run:
//!   cargo run --bin opinion-etl -- pipeline
//!
//!   # Show loaded opinions:
//!   cargo run --bin opinion-etl -- report --limit 10

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use opinion_etl::config::{Environment, Settings};
use opinion_etl::pipeline::{self, RunOptions};
use opinion_etl::{logging, sync, warehouse};

#[derive(Parser, Debug)]
#[command(name = "opinion-etl", about = "Loads customer opinions into the warehouse")]
struct Args {
    /// Path to the settings file
    #[arg(long, global = true, default_value = "config/settings.json")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read sources, stage, and load facts into the warehouse
    Run {
        /// Stop after staging
        #[arg(long, default_value = "false")]
        dry_run: bool,
    },
    /// Append staged dimensions to the warehouse
    SyncDimensions,
    /// Dimension sync followed by a full run
    Pipeline {
        #[arg(long, default_value = "false")]
        dry_run: bool,
    },
    /// Resolve and load the facts currently in staging
    Load,
    /// Print loaded opinions joined with their dimensions
    Report {
        #[arg(long, default_value = "5")]
        limit: i64,
    },
}

async fn run(settings: &Settings, env: &Environment, dry_run: bool) -> Result<()> {
    let summary = pipeline::run(settings, env, RunOptions { dry_run }).await?;
    println!("\n=== Run Summary ({}) ===", summary.run_id);
    for (source, rows) in &summary.sources {
        println!("  {:<20} {} rows", source, rows);
    }
    println!("Fact rows staged: {}", summary.fact_rows);
    match summary.loaded {
        Some(rows) => println!("Fact rows loaded: {}", rows),
        None => println!("Dry run - nothing loaded"),
    }
    Ok(())
}

async fn sync_dimensions(settings: &Settings, env: &Environment) -> Result<()> {
    let summary = sync::run_sync(settings, env).await?;
    if summary.failures() == 4 {
        anyhow::bail!("No dimension could be synced");
    }
    Ok(())
}

async fn report(env: &Environment, limit: i64) -> Result<()> {
    let pool = warehouse::connect(env.warehouse_url()?).await?;
    let rows = warehouse::fetch_report(&pool, limit).await;
    pool.close().await;

    println!("{:-<100}", "");
    for row in rows? {
        println!(
            "  {} | {} | {} | {} | {} | {} | {}",
            row.customer.as_deref().unwrap_or("-"),
            row.product.as_deref().unwrap_or("-"),
            row.source_type.as_deref().unwrap_or("-"),
            row.date.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string()),
            row.score.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
            row.sentiment.as_deref().unwrap_or(""),
            row.comment.as_deref().unwrap_or(""),
        );
    }
    println!("{:-<100}", "");
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let settings = Settings::load(&args.config)
        .await
        .context("Failed to load settings")?;
    logging::init(&settings.log_path)?;
    let env = Environment::from_env();

    info!(config = %args.config, command = ?args.command, "opinion-etl starting");

    match args.command {
        Command::Run { dry_run } => run(&settings, &env, dry_run).await,
        Command::SyncDimensions => sync_dimensions(&settings, &env).await,
        Command::Pipeline { dry_run } => {
            sync_dimensions(&settings, &env).await?;
            run(&settings, &env, dry_run).await
        }
        Command::Load => {
            let loaded = pipeline::load_staged(&settings, &env).await?;
            println!("Fact rows loaded: {}", loaded);
            Ok(())
        }
        Command::Report { limit } => report(&env, limit).await,
    }
}
