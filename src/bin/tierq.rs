//! tierq CLI: run workers and the results consumer, submit jobs, inspect state.

use clap::{Args, Parser, Subcommand};
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;
use tierq::config::Config;
use tierq::consumer::{ConsumerConfig, ResultConsumer};
use tierq::db::Db;
use tierq::intake::Intake;
use tierq::model::{Job, Tier};
use tierq::process::StrategyRegistry;
use tierq::queue::{RedisQueue, TieredQueue};
use tierq::shutdown::Shutdown;
use tierq::store::ResultStore;
use tierq::stream::{RedisStream, ResultStream};
use tierq::telemetry::{TelemetryConfig, TelemetryGuard, init_telemetry};
use tierq::worker::{PublishMode, Worker, WorkerConfig};
use tokio::task::JoinSet;

#[derive(Parser)]
#[command(name = "tierq", about = "Tiered job dispatch with at-least-once result delivery")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run worker loops
    Worker(WorkerArgs),
    /// Run the results consumer
    Results(ConsumerArgs),
    /// Run workers and a results consumer in one process
    Serve {
        #[command(flatten)]
        workers: WorkerArgs,
        #[command(flatten)]
        results: ConsumerArgs,
    },
    /// Place a job on its tier's queue
    Submit {
        /// Unique submission id
        submission_id: String,
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "")]
        language: String,
        #[arg(long, default_value = "free")]
        tier: Tier,
    },
    /// Show the stored result for a submission
    Show { submission_id: String },
    /// Print queue depths and the result group's pending count
    Stats,
}

#[derive(Args, Clone)]
struct WorkerArgs {
    /// Worker loops in this process
    #[arg(long, default_value_t = 1)]
    concurrency: usize,
    /// Tiers to pop from
    #[arg(long, value_delimiter = ',', default_value = "premium,free")]
    tiers: Vec<Tier>,
    /// inline | detached
    #[arg(long, default_value = "inline")]
    publish_mode: PublishMode,
    /// Append attempts per result in inline mode
    #[arg(long, default_value_t = 5)]
    publish_attempts: u32,
    /// Upper bound on one blocking pop, in seconds
    #[arg(long, default_value_t = 5)]
    pop_timeout_secs: u64,
}

#[derive(Args, Clone)]
struct ConsumerArgs {
    /// Consumer name within the group (default: consumer-<uuid>)
    #[arg(long)]
    consumer: Option<String>,
    /// Entries per poll
    #[arg(long, default_value_t = 10)]
    batch: usize,
    /// Read block interval in milliseconds
    #[arg(long, default_value_t = 5000)]
    block_ms: u64,
    /// Claim pending entries idle at least this long, in seconds
    #[arg(long, default_value_t = 30)]
    reclaim_idle_secs: u64,
    /// Deliveries before an undecodable entry is dead-lettered
    #[arg(long, default_value_t = 5)]
    max_deliveries: u64,
    /// Keep retrying undecodable entries instead of dead-lettering them
    #[arg(long)]
    no_dead_letter: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Worker(args) => {
            let _guard = telemetry(&config, "tierq-worker")?;
            let shutdown = shutdown_on_ctrl_c();
            let mut tasks = JoinSet::new();
            spawn_workers(&config, &args, &shutdown, &mut tasks).await?;
            join_all(tasks).await
        }
        Command::Results(args) => {
            let _guard = telemetry(&config, "tierq-results")?;
            let shutdown = shutdown_on_ctrl_c();
            let consumer = build_consumer(&config, &args, &shutdown).await?;
            consumer.run().await?;
            Ok(())
        }
        Command::Serve { workers, results } => {
            let _guard = telemetry(&config, "tierq")?;
            let shutdown = shutdown_on_ctrl_c();
            let consumer = build_consumer(&config, &results, &shutdown).await?;
            // Fail before any job is popped if the group cannot be created.
            consumer.prepare().await?;

            let mut tasks = JoinSet::new();
            tasks.spawn(async move { consumer.run().await });
            spawn_workers(&config, &workers, &shutdown, &mut tasks).await?;
            join_all(tasks).await
        }
        Command::Submit {
            submission_id,
            user,
            language,
            tier,
        } => {
            let queue = RedisQueue::connect(config.redis_url.expose_secret(), config.queues.clone())
                .await?;
            let intake = Intake::new(Arc::new(queue));
            intake
                .submit(&Job::new(&submission_id, user, language, tier))
                .await?;
            println!("Queued: {submission_id} ({tier})");
            Ok(())
        }
        Command::Show { submission_id } => {
            let db = Db::connect(config.require_database_url()?.expose_secret()).await?;
            db.migrate().await?;
            match db.get(&submission_id).await? {
                Some(event) => {
                    println!("Submission: {}", event.submission_id);
                    println!("User:       {}", event.user_id);
                    println!("Tier:       {}", event.tier);
                    println!("Language:   {}", event.language);
                    println!("Status:     {}", event.status);
                    println!("Execution:  {} ms", event.execution_ms);
                    println!("Completed:  {}", event.completed_at);
                }
                None => println!("No result recorded for {submission_id}"),
            }
            Ok(())
        }
        Command::Stats => {
            let queue = RedisQueue::connect(config.redis_url.expose_secret(), config.queues.clone())
                .await?;
            for tier in Tier::ALL {
                println!(
                    "{:<24} {}",
                    config.queues.for_tier(tier),
                    queue.depth(tier).await?
                );
            }
            let stream = RedisStream::connect(config.redis_url.expose_secret()).await?;
            match stream
                .pending_count(&config.result_stream, &config.result_group)
                .await
            {
                Ok(n) => println!("{:<24} {n} pending", config.result_group),
                Err(e) => println!("{:<24} unavailable ({e})", config.result_group),
            }
            Ok(())
        }
    }
}

fn telemetry(config: &Config, service_name: &str) -> anyhow::Result<TelemetryGuard> {
    Ok(init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: service_name.to_string(),
        log_level: config.log_level.clone(),
    })?)
}

fn shutdown_on_ctrl_c() -> Shutdown {
    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutdown requested");
        trigger.trigger();
    });
    shutdown
}

/// Start `args.concurrency` worker loops. Each gets its own queue
/// connection; the result stream handle is shared since appends never block.
async fn spawn_workers(
    config: &Config,
    args: &WorkerArgs,
    shutdown: &Shutdown,
    tasks: &mut JoinSet<tierq::error::Result<()>>,
) -> anyhow::Result<()> {
    let redis_url = config.redis_url.expose_secret();
    let stream: Arc<dyn ResultStream> = Arc::new(RedisStream::connect(redis_url).await?);
    let strategies = Arc::new(StrategyRegistry::simulated());
    let worker_config = WorkerConfig {
        tiers: args.tiers.clone(),
        result_stream: config.result_stream.clone(),
        pop_timeout: Duration::from_secs(args.pop_timeout_secs),
        publish_mode: args.publish_mode,
        publish_attempts: args.publish_attempts,
        ..WorkerConfig::default()
    };

    for n in 0..args.concurrency.max(1) {
        let queue: Arc<dyn TieredQueue> =
            Arc::new(RedisQueue::connect(redis_url, config.queues.clone()).await?);
        let worker = Worker::new(
            format!("worker-{n}"),
            queue,
            stream.clone(),
            strategies.clone(),
            worker_config.clone(),
            shutdown.clone(),
        );
        tasks.spawn(async move { worker.run().await });
    }
    Ok(())
}

async fn build_consumer(
    config: &Config,
    args: &ConsumerArgs,
    shutdown: &Shutdown,
) -> anyhow::Result<ResultConsumer> {
    let db = Db::connect(config.require_database_url()?.expose_secret()).await?;
    db.migrate().await?;
    let store: Arc<dyn ResultStore> = Arc::new(db);
    let stream: Arc<dyn ResultStream> =
        Arc::new(RedisStream::connect(config.redis_url.expose_secret()).await?);

    let defaults = ConsumerConfig::default();
    let consumer_config = ConsumerConfig {
        stream: config.result_stream.clone(),
        group: config.result_group.clone(),
        consumer: args.consumer.clone().unwrap_or(defaults.consumer),
        batch: args.batch,
        block: Duration::from_millis(args.block_ms),
        reclaim_idle: Duration::from_secs(args.reclaim_idle_secs),
        max_deliveries: args.max_deliveries,
        dead_letter_stream: (!args.no_dead_letter).then(|| config.dead_letter_stream.clone()),
        error_backoff: defaults.error_backoff,
    };
    Ok(ResultConsumer::new(stream, store, consumer_config, shutdown.clone()))
}

async fn join_all(mut tasks: JoinSet<tierq::error::Result<()>>) -> anyhow::Result<()> {
    while let Some(joined) = tasks.join_next().await {
        joined??;
    }
    Ok(())
}
