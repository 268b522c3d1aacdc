//! bionet-rollup - scheduled aggregation and backfill tools
//!
//! `serve` runs the hourly scheduler until Ctrl+C. The other subcommands
//! run a single job or backfill and exit.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use bionet_common::bucket::{BucketKey, Granularity};
use bionet_common::config::{RollupConfig, RootFolderInitializer, RootFolderResolver, TomlConfig};
use bionet_common::db::{self, RetryPolicy};
use bionet_common::time;
use bionet_rollup::{backfill, retention, AllTimeAccumulator, RetentionPolicy, RollupJobs, Scheduler};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Longest grace delay that still lands inside the hour it follows
const MAX_GRACE_SECS: u64 = 3599;

/// Command-line arguments for bionet-rollup
#[derive(Parser, Debug)]
#[command(name = "bionet-rollup")]
#[command(about = "Aggregation scheduler and backfill tools for bionet")]
#[command(version)]
struct Args {
    /// Root folder holding the database
    #[arg(short, long, global = true)]
    root_folder: Option<PathBuf>,

    /// Path to config.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the rollup scheduler until interrupted
    Serve,

    /// Run one rollup job now
    Run {
        /// hour, day, week or month
        granularity: Granularity,

        /// Bucket to process instead of the last completed one
        #[arg(long)]
        key: Option<String>,
    },

    /// Delete expired detections (one batch)
    Sweep,

    /// Import a tab-separated detection dump
    BackfillDump {
        file: PathBuf,
    },

    /// Recompute the all-time summary from stored hourly summaries
    RebuildAllTime,

    /// Rerun a job over an inclusive range of buckets
    BackfillRollups {
        granularity: Granularity,

        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = TomlConfig::load(args.config.as_deref());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting bionet-rollup v{}", env!("CARGO_PKG_VERSION"));

    let root_folder = RootFolderResolver::new("rollup").resolve(args.root_folder.as_deref(), &config);
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to create root folder")?;

    let db_path = initializer.database_path();
    info!("Database path: {}", db_path.display());

    let pool = db::init_database(&db_path)
        .await
        .context("Failed to initialize database")?;

    let accumulator = AllTimeAccumulator::new(pool.clone(), RetryPolicy::from(&config.rollup));
    let jobs = RollupJobs::new(pool.clone(), accumulator);

    let result = execute(args.command, &jobs, &config.rollup).await;
    pool.close().await;
    result
}

async fn execute(command: Command, jobs: &RollupJobs, config: &RollupConfig) -> Result<()> {
    let now = time::now();

    match command {
        Command::Serve => {
            let grace_secs = if config.grace_delay_secs > MAX_GRACE_SECS {
                warn!(
                    configured = config.grace_delay_secs,
                    used = MAX_GRACE_SECS,
                    "Grace delay must stay under an hour"
                );
                MAX_GRACE_SECS
            } else {
                config.grace_delay_secs
            };
            let grace = chrono::Duration::seconds(grace_secs as i64);

            let scheduler = Scheduler::new(jobs.clone(), grace, RetentionPolicy::from(config));
            scheduler.run_until(shutdown_signal()).await;
            info!("Scheduler shutdown complete");
        }

        Command::Run { granularity, key } => {
            let key = key
                .map(|text| BucketKey::parse(granularity, &text))
                .transpose()?;
            let report = jobs.run(granularity, key, now).await?;
            println!(
                "{} {}: {} inputs, {} detections",
                report.bucket.granularity(),
                report.bucket,
                report.inputs,
                report.detections
            );
        }

        Command::Sweep => {
            let deleted = retention::sweep(jobs.pool(), RetentionPolicy::from(config), now).await?;
            println!("Deleted {} expired detections", deleted);
        }

        Command::BackfillDump { file } => {
            let import = backfill::import_dump(jobs, &file, now)
                .await
                .with_context(|| format!("Failed to import {}", file.display()))?;
            println!(
                "Imported {} rows ({} skipped) into {} hourly summaries; re-merged {} coarser buckets",
                import.rows,
                import.skipped,
                import.hours.len(),
                import.rollups.len()
            );
        }

        Command::RebuildAllTime => {
            let rebuilt = backfill::rebuild_all_time(jobs.pool(), now).await?;
            println!(
                "Rebuilt all-time summary from {} hourly summaries ({} detections)",
                rebuilt.hours,
                rebuilt.summary.total_detections()
            );
        }

        Command::BackfillRollups { granularity, from, to } => {
            if granularity == Granularity::AllTime {
                bail!("Use rebuild-all-time to recompute the all-time summary");
            }
            let from = BucketKey::parse(granularity, &from)?;
            let to = BucketKey::parse(granularity, &to)?;
            let reports = backfill::backfill_rollups(jobs, from, to, now).await?;
            for report in &reports {
                println!("{} {}: {} inputs, {} detections", granularity, report.bucket, report.inputs, report.detections);
            }
        }
    }

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
