use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use modporter_core::{
    ConversionPipeline, Job, JobPriority, JobQueueService, JobType, NewJob, PipelineFailure,
    ProgressSender, ResourceRequirements, ServiceConfig,
};

#[derive(Parser)]
#[command(name = "modporter")]
#[command(about = "ModPorter conversion job orchestration")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Configuration file path")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Set log level")]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the service against a built-in demo pipeline
    Demo {
        /// How many jobs to enqueue
        #[arg(long, default_value_t = 6)]
        jobs: usize,

        /// Simulated conversion duration per job (milliseconds)
        #[arg(long, default_value_t = 400)]
        duration_ms: u64,

        /// Probability of a recoverable failure per attempt (0.0 - 1.0)
        #[arg(long, default_value_t = 0.2)]
        failure_rate: f64,
    },

    /// Print the default configuration as TOML
    Config,
}

/// Demo pipeline: sleeps in progress-reporting steps and fails
/// recoverably at a configurable rate.
struct DemoPipeline {
    duration: Duration,
    failure_rate: f64,
}

#[async_trait]
impl ConversionPipeline for DemoPipeline {
    async fn run(
        &self,
        job: Job,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> std::result::Result<serde_json::Value, PipelineFailure> {
        let steps = 10u8;
        let step = self.duration / steps as u32;
        for i in 1..=steps {
            tokio::select! {
                _ = tokio::time::sleep(step) => {}
                _ = cancel.cancelled() => {
                    return Err(PipelineFailure::terminal("cancelled", "stopped on signal"));
                }
            }
            let _ = progress.send(i * (100 / steps));
        }

        if rand::random::<f64>() < self.failure_rate {
            return Err(PipelineFailure::recoverable(
                "asset_translation",
                "simulated transient failure",
            ));
        }

        Ok(serde_json::json!({
            "job_type": job.job_type.to_string(),
            "converted": true,
        }))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match &cli.log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &cli.config {
        Some(path) => ServiceConfig::from_toml_path(path)?,
        None => ServiceConfig::development(),
    };

    match cli.command {
        Commands::Demo {
            jobs,
            duration_ms,
            failure_rate,
        } => run_demo(config, jobs, duration_ms, failure_rate).await,
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&ServiceConfig::default())?);
            Ok(())
        }
    }
}

async fn run_demo(
    config: ServiceConfig,
    jobs: usize,
    duration_ms: u64,
    failure_rate: f64,
) -> Result<()> {
    let pipeline = Arc::new(DemoPipeline {
        duration: Duration::from_millis(duration_ms.max(10)),
        failure_rate: failure_rate.clamp(0.0, 1.0),
    });
    let service = JobQueueService::new(config, pipeline);
    let mut events = service.subscribe();
    service.start();

    let priorities = [
        JobPriority::Low,
        JobPriority::Normal,
        JobPriority::High,
        JobPriority::Urgent,
    ];
    let types = [
        JobType::Conversion,
        JobType::Validation,
        JobType::Analysis,
        JobType::Packaging,
    ];

    let mut ids = Vec::with_capacity(jobs);
    for i in 0..jobs {
        let id = service
            .enqueue(
                NewJob::new(
                    types[i % types.len()],
                    serde_json::json!({ "mod": format!("demo-{i}.jar") }),
                )
                .with_priority(priorities[i % priorities.len()])
                .with_resources(ResourceRequirements::new(512, 1, 128)),
            )
            .await?;
        ids.push(id);
    }
    info!(count = ids.len(), "enqueued demo jobs");

    let mut remaining: std::collections::HashSet<_> = ids.iter().copied().collect();
    while !remaining.is_empty() {
        match events.recv().await {
            Ok(event) => {
                info!(
                    event = event.name(),
                    job_id = %event.job_id(),
                    status = %event.new_status(),
                    "event"
                );
                if event.new_status().is_terminal() {
                    remaining.remove(&event.job_id());
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                info!(skipped, "event stream lagged; reconciling from the store");
                remaining.retain(|id| {
                    service
                        .status(*id)
                        .map(|job| !job.is_terminal())
                        .unwrap_or(false)
                });
            }
            Err(_) => break,
        }
    }

    let stats = service.stats().await;
    info!(
        completed = stats.jobs.completed,
        failed = stats.jobs.failed,
        retries = stats.execution.retries,
        avg_latency_ms = stats.execution.avg_latency_ms,
        "demo finished"
    );

    service.stop().await;
    Ok(())
}
