use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use rand::Rng;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use soloist::{generate_holder_id, CoordConfig, JobRunner, MemoryStore, RunOutcome};

#[derive(Parser, Debug)]
#[command(name = "soloist")]
#[command(version)]
#[command(about = "Lease-based job coordination: effectively-once execution across a worker fleet")]
struct Args {
    /// Number of simulated worker processes racing for each execution
    #[arg(long, default_value = "3")]
    workers: usize,

    /// Number of execution cycles (each cycle is one execution key)
    #[arg(long, default_value = "5")]
    cycles: usize,

    /// Job name being coordinated
    #[arg(long, default_value = "daily-report")]
    job: String,

    /// Lease duration in milliseconds
    #[arg(long, default_value = "500")]
    lease_ms: u64,

    /// Simulated business-logic duration in milliseconds
    #[arg(long, default_value = "50")]
    work_ms: u64,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Serialize, Default, Clone)]
struct WorkerTally {
    holder_id: String,
    completed: usize,
    skipped: usize,
    failed: usize,
}

#[derive(Serialize)]
struct Summary {
    job: String,
    cycles: usize,
    workers: Vec<WorkerTally>,
    total_completed: usize,
    effectively_once: bool,
}

/// One simulated worker: attempts every cycle's execution key with a
/// small start jitter, the way independent scheduling loops would fire
/// near-simultaneously across a fleet.
async fn worker_loop(
    runner: JobRunner,
    job: String,
    cycles: usize,
    work: Duration,
) -> WorkerTally {
    let mut tally = WorkerTally {
        holder_id: runner.holder_id().to_string(),
        ..Default::default()
    };

    for cycle in 0..cycles {
        let jitter = rand::thread_rng().gen_range(0..20);
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        let execution_key = format!("cycle-{cycle}");
        let outcome = runner
            .execute(&job, &execution_key, |cancel| async move {
                tokio::select! {
                    _ = cancel.cancelled() => Err("authority revoked mid-run".into()),
                    _ = tokio::time::sleep(work) => Ok(()),
                }
            })
            .await;

        match outcome {
            Ok(RunOutcome::Completed) => tally.completed += 1,
            Ok(RunOutcome::Skipped) => tally.skipped += 1,
            Ok(RunOutcome::Failed(err)) => {
                tracing::warn!(key = %execution_key, error = %err, "Business logic failed");
                tally.failed += 1;
            }
            Err(err) => {
                tracing::warn!(key = %execution_key, error = %err, "Cycle error");
                tally.failed += 1;
            }
        }

        // Let stragglers catch up before the next key.
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    tally
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = CoordConfig::default()
        .with_lease_duration(Duration::from_millis(args.lease_ms))
        .with_acquire_timeout(Duration::from_millis(args.lease_ms))
        .with_renew_timeout(Duration::from_millis(args.lease_ms / 2));
    config.validate().map_err(|e| format!("invalid config: {e}"))?;

    let store = MemoryStore::new();
    let work = Duration::from_millis(args.work_ms);

    tracing::info!(
        job = %args.job,
        workers = args.workers,
        cycles = args.cycles,
        lease_ms = args.lease_ms,
        "Starting simulated fleet"
    );

    let mut handles = Vec::new();
    for i in 0..args.workers {
        let runner = JobRunner::connect(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            generate_holder_id(&format!("worker{i}")),
            config.clone(),
        );
        handles.push(tokio::spawn(worker_loop(
            runner,
            args.job.clone(),
            args.cycles,
            work,
        )));
    }

    let mut workers = Vec::new();
    for handle in handles {
        workers.push(handle.await?);
    }

    let total_completed: usize = workers.iter().map(|w| w.completed).sum();
    let summary = Summary {
        job: args.job,
        cycles: args.cycles,
        effectively_once: total_completed == args.cycles,
        total_completed,
        workers,
    };

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Table => {
            println!("{:<40} {:>9} {:>8} {:>7}", "WORKER", "COMPLETED", "SKIPPED", "FAILED");
            println!("{}", "-".repeat(68));
            for w in &summary.workers {
                println!(
                    "{:<40} {:>9} {:>8} {:>7}",
                    w.holder_id, w.completed, w.skipped, w.failed
                );
            }
            println!();
            println!(
                "{} of {} cycles completed exactly once: {}",
                summary.total_completed,
                summary.cycles,
                if summary.effectively_once { "yes" } else { "NO" }
            );
        }
    }

    Ok(())
}
