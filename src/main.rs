mod api;
mod config;
mod db;
mod dispatcher;
mod error;
mod handlers;
mod jobs;
mod matcher;
mod notify;
mod queue;
mod scorer;
mod types;

use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::db::{AlertRepository, BundleRepository, MatchRepository};
use crate::dispatcher::QueueWorker;
use crate::error::{AppError, Result};
use crate::handlers::{Handlers, WORKER_QUEUES};
use crate::jobs::{CleanupJob, ConfidenceRouter, MatchingJob, Scheduler};
use crate::matcher::MatchingOrchestrator;
use crate::notify::Notifier;
use crate::queue::message::MatchRequestPayload;
use crate::queue::{QueueClient, QueueName, SqliteQueue};

#[derive(Parser)]
#[command(name = "fundmatch", version, about = "Investment/funding matching worker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll every worker queue, run scheduled jobs and serve the monitoring API.
    Worker,
    /// Enqueue a match request.
    Trigger {
        #[arg(long)]
        lookback: Option<i64>,
        #[arg(long, default_value = "cli")]
        source: String,
    },
    /// Run a job once and print its summary.
    Job {
        #[command(subcommand)]
        job: JobCommand,
    },
    /// Print attributes of every queue.
    Queues,
    /// Print visible messages without consuming them.
    Peek {
        #[arg(value_parser = parse_queue)]
        queue: QueueName,
        #[arg(long, default_value_t = 10)]
        max: usize,
    },
}

#[derive(Subcommand)]
enum JobCommand {
    Matching {
        #[arg(long)]
        lookback: Option<i64>,
    },
    Cleanup {
        #[arg(long)]
        days: Option<i64>,
    },
}

fn parse_queue(s: &str) -> std::result::Result<QueueName, String> {
    QueueName::parse(s).ok_or_else(|| format!("unknown queue: {s}"))
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg, cli.command.unwrap_or(Command::Worker)).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

/// Everything a command needs, built once from config.
struct Services {
    pool: sqlx::SqlitePool,
    queue: QueueClient,
    alerts: AlertRepository,
    bundles: BundleRepository,
    matches: MatchRepository,
    orchestrator: MatchingOrchestrator,
}

impl Services {
    async fn connect(cfg: &Config) -> Result<Self> {
        let pool = db::connect(&cfg.db_path).await?;
        info!("Database ready at {}", cfg.db_path);

        let transport = Arc::new(SqliteQueue::new(pool.clone(), cfg.queues.message_retention));
        let queue = QueueClient::new(transport, cfg.queues.clone());
        let alerts = AlertRepository::new(pool.clone());
        let bundles = BundleRepository::new(pool.clone());
        let matches = MatchRepository::new(pool.clone());
        let orchestrator = MatchingOrchestrator::new(
            alerts.clone(),
            bundles.clone(),
            queue.clone(),
            cfg.matching.clone(),
        );
        Ok(Self {
            pool,
            queue,
            alerts,
            bundles,
            matches,
            orchestrator,
        })
    }

    fn matching_job(&self, cfg: &Config) -> Result<MatchingJob> {
        let notifier = Notifier::from_url(cfg.notification_api_url.as_deref())?;
        if notifier.is_none() {
            info!("NOTIFICATION_API_URL not set; high-confidence matches will not be pushed");
        }
        let router = ConfidenceRouter::new(self.matches.clone(), self.queue.clone(), notifier);
        Ok(MatchingJob::new(self.orchestrator.clone(), router))
    }

    fn cleanup_job(&self, cfg: &Config) -> CleanupJob {
        CleanupJob::new(self.bundles.clone(), self.matches.clone(), cfg.jobs.retention_days)
    }
}

async fn run(cfg: Config, command: Command) -> Result<()> {
    let services = Services::connect(&cfg).await?;

    match command {
        Command::Worker => run_worker(cfg, services).await,
        Command::Trigger { lookback, source } => {
            let payload = MatchRequestPayload {
                lookback_days: lookback,
                trigger_source: source,
                requested_at: Some(Utc::now()),
            };
            let message_id = services
                .queue
                .send_match_request(payload)
                .await
                .ok_or_else(|| AppError::Transport("match request was not enqueued".to_string()))?;
            println!("{message_id}");
            Ok(())
        }
        Command::Job { job: JobCommand::Matching { lookback } } => {
            let summary = services.matching_job(&cfg)?.run_once(lookback).await?;
            print_json(&summary)
        }
        Command::Job { job: JobCommand::Cleanup { days } } => {
            let summary = services.cleanup_job(&cfg).run_once(days).await?;
            print_json(&summary)
        }
        Command::Queues => {
            for queue in QueueName::ALL {
                let attributes = services.queue.attributes(queue).await?;
                println!("{}\t{}", services.queue.name(queue), serde_json::to_string(&attributes)?);
            }
            Ok(())
        }
        Command::Peek { queue, max } => {
            let messages = services.queue.peek(queue, max).await?;
            print_json(&messages)
        }
    }
}

async fn run_worker(cfg: Config, services: Services) -> Result<()> {
    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new()?);

    // --- Scheduled jobs ---
    let scheduler = Scheduler::new(
        services.matching_job(&cfg)?,
        services.cleanup_job(&cfg),
        cfg.jobs.clone(),
    );
    tokio::spawn(async move { scheduler.run().await });

    // --- Queue loops, one per worker queue ---
    let handlers = Handlers::new(
        services.orchestrator.clone(),
        services.alerts.clone(),
        services.bundles.clone(),
        services.matches.clone(),
    );
    for queue in WORKER_QUEUES {
        let worker = QueueWorker::new(
            queue,
            services.queue.clone(),
            handlers.dispatcher_for(queue),
            Arc::clone(&health),
            Arc::clone(&latency),
        );
        tokio::spawn(async move { worker.run(None).await });
    }
    info!(loops = WORKER_QUEUES.len(), "Queue workers started");

    // --- Monitoring API ---
    let app = router(ApiState {
        pool: services.pool.clone(),
        queue: services.queue.clone(),
        health,
        latency,
    });
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
