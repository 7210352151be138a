use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tierq::consumer::{ConsumerConfig, ResultConsumer};
use tierq::error::{Error, Result};
use tierq::model::{Job, ResultEvent, Status, Tier};
use tierq::process::{ProcessingStrategy, Processed, SimulatedExecution, StrategyRegistry};
use tierq::queue::{InMemoryQueue, TieredQueue};
use tierq::shutdown::Shutdown;
use tierq::store::{InMemoryStore, ResultStore};
use tierq::stream::{EntryId, Fields, InMemoryStream, ResultStream, StreamEntry};
use tierq::worker::{PublishMode, ResultPublisher, Worker, WorkerConfig};

const STREAM: &str = "submission";
const GROUP: &str = "results_group";

fn fast_strategies() -> Arc<StrategyRegistry> {
    Arc::new(
        StrategyRegistry::new()
            .with(
                Tier::Free,
                Arc::new(SimulatedExecution::new(
                    "free",
                    Duration::from_millis(10),
                    Duration::from_millis(5),
                )),
            )
            .with(
                Tier::Premium,
                Arc::new(SimulatedExecution::new(
                    "premium",
                    Duration::from_millis(5),
                    Duration::ZERO,
                )),
            ),
    )
}

fn worker_config(mode: PublishMode) -> WorkerConfig {
    WorkerConfig {
        result_stream: STREAM.to_string(),
        pop_timeout: Duration::from_millis(20),
        publish_mode: mode,
        publish_backoff: Duration::from_millis(1),
        error_backoff: Duration::from_millis(10),
        ..WorkerConfig::default()
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn spawn_worker(
    queue: Arc<InMemoryQueue>,
    stream: Arc<dyn ResultStream>,
    strategies: Arc<StrategyRegistry>,
    config: WorkerConfig,
    shutdown: &Shutdown,
) -> tokio::task::JoinHandle<Result<()>> {
    let worker = Worker::new("w0", queue, stream, strategies, config, shutdown.clone());
    tokio::spawn(async move { worker.run().await })
}

#[tokio::test]
async fn premium_job_flows_to_the_store() {
    let queue = Arc::new(InMemoryQueue::new());
    let stream = Arc::new(InMemoryStream::new());
    let store = Arc::new(InMemoryStore::new());
    let shutdown = Shutdown::new();

    queue
        .push(&Job::new("s1", "u1", "rust", Tier::Premium))
        .await
        .unwrap();

    let worker = spawn_worker(
        queue.clone(),
        stream.clone(),
        fast_strategies(),
        worker_config(PublishMode::Inline),
        &shutdown,
    );
    let consumer = ResultConsumer::new(
        stream.clone(),
        store.clone(),
        ConsumerConfig {
            stream: STREAM.to_string(),
            group: GROUP.to_string(),
            consumer: "c1".to_string(),
            block: Duration::from_millis(20),
            ..ConsumerConfig::default()
        },
        shutdown.clone(),
    );
    let consumer = tokio::spawn(async move { consumer.run().await });

    eventually(|| store.len() == 1).await;
    shutdown.trigger();
    worker.await.unwrap().unwrap();
    consumer.await.unwrap().unwrap();

    let stored = store.get("s1").await.unwrap().unwrap();
    assert_eq!(stored.user_id, "u1");
    assert_eq!(stored.language, "rust");
    assert_eq!(stored.tier, Tier::Premium);
    assert_eq!(stored.status, Status::accepted());
    assert!(stored.execution_ms >= 5);
    assert_eq!(queue.depth(Tier::Premium).await.unwrap(), 0);
    assert_eq!(stream.pending_count(STREAM, GROUP).await.unwrap(), 0);
}

#[tokio::test]
async fn free_submission_is_recorded_once_across_replays() {
    let queue = Arc::new(InMemoryQueue::new());
    let stream = Arc::new(InMemoryStream::new());
    let store = Arc::new(InMemoryStore::new());
    let shutdown = Shutdown::new();

    let intake = tierq::intake::Intake::new(queue.clone());
    intake
        .submit(&Job::new("S1", "u1", "python", Tier::Free))
        .await
        .unwrap();
    assert_eq!(queue.depth(Tier::Free).await.unwrap(), 1);
    assert_eq!(queue.depth(Tier::Premium).await.unwrap(), 0);

    let worker = spawn_worker(
        queue.clone(),
        stream.clone(),
        fast_strategies(),
        worker_config(PublishMode::Inline),
        &shutdown,
    );
    eventually(|| stream.entries(STREAM).len() == 1).await;
    shutdown.trigger();
    worker.await.unwrap().unwrap();

    let entries = stream.entries(STREAM);
    let published = &entries[0].1;
    assert_eq!(published["submission_id"], "S1");
    assert_eq!(published["status"], "ACCEPTED");
    assert!(published["execution_ms"].parse::<u64>().unwrap() > 0);

    // Consume the stream twice from the start, through two groups.
    for group in [GROUP, "replay"] {
        let consumer = ResultConsumer::new(
            stream.clone(),
            store.clone(),
            ConsumerConfig {
                stream: STREAM.to_string(),
                group: group.to_string(),
                consumer: "c1".to_string(),
                block: Duration::from_millis(10),
                ..ConsumerConfig::default()
            },
            Shutdown::new(),
        );
        consumer.prepare().await.unwrap();
        consumer.poll_once().await.unwrap();
    }

    assert_eq!(store.len(), 1);
    assert_eq!(store.get("S1").await.unwrap().unwrap().tier, Tier::Free);
}

#[tokio::test]
async fn detached_publishes_are_drained_on_shutdown() {
    let queue = Arc::new(InMemoryQueue::new());
    let stream = Arc::new(InMemoryStream::new());
    let shutdown = Shutdown::new();

    for n in 0..4 {
        let tier = if n % 2 == 0 { Tier::Free } else { Tier::Premium };
        queue
            .push(&Job::new(format!("s{n}"), "u1", "go", tier))
            .await
            .unwrap();
    }

    let worker = spawn_worker(
        queue.clone(),
        stream.clone(),
        fast_strategies(),
        worker_config(PublishMode::Detached),
        &shutdown,
    );

    eventually(|| stream.entries(STREAM).len() == 4).await;
    shutdown.trigger();
    worker.await.unwrap().unwrap();

    let mut ids: Vec<String> = stream
        .entries(STREAM)
        .into_iter()
        .map(|(_, fields)| fields["submission_id"].clone())
        .collect();
    ids.sort();
    assert_eq!(ids, ["s0", "s1", "s2", "s3"]);
}

#[tokio::test]
async fn worker_only_pops_its_tiers() {
    let queue = Arc::new(InMemoryQueue::new());
    let stream = Arc::new(InMemoryStream::new());
    let shutdown = Shutdown::new();

    queue.push(&Job::new("p", "u", "c", Tier::Premium)).await.unwrap();
    queue.push(&Job::new("f", "u", "c", Tier::Free)).await.unwrap();

    let worker = spawn_worker(
        queue.clone(),
        stream.clone(),
        fast_strategies(),
        WorkerConfig {
            tiers: vec![Tier::Free],
            ..worker_config(PublishMode::Inline)
        },
        &shutdown,
    );

    eventually(|| stream.entries(STREAM).len() == 1).await;
    shutdown.trigger();
    worker.await.unwrap().unwrap();

    assert_eq!(stream.entries(STREAM)[0].1["submission_id"], "f");
    assert_eq!(queue.depth(Tier::Premium).await.unwrap(), 1);
}

#[tokio::test]
async fn malformed_entries_are_skipped() {
    let queue = Arc::new(InMemoryQueue::new());
    let stream = Arc::new(InMemoryStream::new());
    let shutdown = Shutdown::new();

    queue.push_raw(Tier::Free, "garbage");
    queue.push(&Job::new("ok", "u", "c", Tier::Free)).await.unwrap();

    let worker = spawn_worker(
        queue.clone(),
        stream.clone(),
        fast_strategies(),
        worker_config(PublishMode::Inline),
        &shutdown,
    );

    eventually(|| stream.entries(STREAM).len() == 1).await;
    shutdown.trigger();
    worker.await.unwrap().unwrap();

    assert_eq!(stream.entries(STREAM)[0].1["submission_id"], "ok");
    assert_eq!(queue.depth(Tier::Free).await.unwrap(), 0);
}

#[tokio::test]
async fn job_without_strategy_is_dropped() {
    let queue = Arc::new(InMemoryQueue::new());
    let stream = Arc::new(InMemoryStream::new());
    let shutdown = Shutdown::new();
    let free_only = Arc::new(
        StrategyRegistry::new().with(Tier::Free, Arc::new(SimulatedExecution::free())),
    );

    queue.push(&Job::new("p", "u", "c", Tier::Premium)).await.unwrap();
    let worker = spawn_worker(
        queue.clone(),
        stream.clone(),
        free_only,
        worker_config(PublishMode::Inline),
        &shutdown,
    );

    let depth_queue = queue.clone();
    for _ in 0..500 {
        if depth_queue.depth(Tier::Premium).await.unwrap() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown.trigger();
    worker.await.unwrap().unwrap();

    assert_eq!(queue.depth(Tier::Premium).await.unwrap(), 0);
    assert!(stream.entries(STREAM).is_empty());
}

/// Reports a fixed status without sleeping.
struct Verdict(&'static str);

#[async_trait]
impl ProcessingStrategy for Verdict {
    fn name(&self) -> &str {
        "verdict"
    }

    async fn process(&self, _job: &Job) -> Processed {
        Processed {
            duration: Duration::from_millis(1),
            status: Status::new(self.0),
        }
    }
}

#[tokio::test]
async fn strategy_status_reaches_the_stream() {
    let queue = Arc::new(InMemoryQueue::new());
    let stream = Arc::new(InMemoryStream::new());
    let shutdown = Shutdown::new();
    let registry =
        Arc::new(StrategyRegistry::new().with(Tier::Free, Arc::new(Verdict("WRONG_ANSWER"))));

    queue.push(&Job::new("s1", "u", "c", Tier::Free)).await.unwrap();
    let worker = spawn_worker(
        queue.clone(),
        stream.clone(),
        registry,
        worker_config(PublishMode::Inline),
        &shutdown,
    );

    eventually(|| stream.entries(STREAM).len() == 1).await;
    shutdown.trigger();
    worker.await.unwrap().unwrap();

    let entries = stream.entries(STREAM);
    let fields = &entries[0].1;
    assert_eq!(fields["status"], "WRONG_ANSWER");
    assert_eq!(fields["execution_ms"], "1");
}

/// Fails the first `failures` appends, then delegates.
struct Flaky {
    inner: InMemoryStream,
    failures: AtomicUsize,
}

impl Flaky {
    fn new(failures: usize) -> Self {
        Self {
            inner: InMemoryStream::new(),
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl ResultStream for Flaky {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        self.inner.ensure_group(stream, group).await
    }

    async fn append(&self, stream: &str, fields: &Fields) -> Result<EntryId> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Other("connection reset".to_string()));
        }
        self.inner.append(stream, fields).await
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        max_count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>> {
        self.inner
            .read_group(stream, group, consumer, max_count, block)
            .await
    }

    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        max_count: usize,
    ) -> Result<Vec<StreamEntry>> {
        self.inner
            .claim_idle(stream, group, consumer, min_idle, max_count)
            .await
    }

    async fn ack(&self, stream: &str, group: &str, id: &EntryId) -> Result<()> {
        self.inner.ack(stream, group, id).await
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64> {
        self.inner.pending_count(stream, group).await
    }
}

fn sample_event() -> ResultEvent {
    ResultEvent::completed(
        &Job::new("s1", "u1", "rust", Tier::Free),
        5100,
        Status::accepted(),
    )
}

#[tokio::test]
async fn publish_retries_transient_failures() {
    let flaky = Arc::new(Flaky::new(2));
    let publisher = ResultPublisher::new(flaky.clone(), STREAM);

    let id = publisher
        .publish_with_retry(&sample_event(), 3, Duration::from_millis(1))
        .await
        .unwrap();

    let entries = flaky.inner.entries(STREAM);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, id);
}

#[tokio::test]
async fn publish_gives_up_after_attempts() {
    let flaky = Arc::new(Flaky::new(5));
    let publisher = ResultPublisher::new(flaky.clone(), STREAM);

    let published = publisher
        .publish_with_retry(&sample_event(), 3, Duration::from_millis(1))
        .await;
    assert!(published.is_err());
    assert!(flaky.inner.entries(STREAM).is_empty());
}

#[tokio::test]
async fn inline_worker_survives_lost_publish() {
    let queue = Arc::new(InMemoryQueue::new());
    let flaky = Arc::new(Flaky::new(2));
    let shutdown = Shutdown::new();

    queue.push(&Job::new("lost", "u", "c", Tier::Premium)).await.unwrap();
    queue.push(&Job::new("kept", "u", "c", Tier::Premium)).await.unwrap();

    let worker = spawn_worker(
        queue.clone(),
        flaky.clone(),
        fast_strategies(),
        WorkerConfig {
            publish_attempts: 2,
            ..worker_config(PublishMode::Inline)
        },
        &shutdown,
    );

    eventually(|| flaky.inner.entries(STREAM).len() == 1).await;
    shutdown.trigger();
    worker.await.unwrap().unwrap();

    assert_eq!(flaky.inner.entries(STREAM)[0].1["submission_id"], "kept");
}

#[test]
fn publish_mode_parses() {
    assert_eq!("inline".parse::<PublishMode>().unwrap(), PublishMode::Inline);
    assert_eq!("detached".parse::<PublishMode>().unwrap(), PublishMode::Detached);
    assert!("sometimes".parse::<PublishMode>().is_err());
    assert_eq!(PublishMode::default(), PublishMode::Inline);
}

#[test]
fn simulated_registry_covers_every_tier() {
    let registry = StrategyRegistry::simulated();
    for tier in Tier::ALL {
        assert!(registry.for_tier(tier).is_some(), "{tier} has no strategy");
    }
}
