//! Queue and stream behaviour against a live Redis.
//!
//! Run with:
//! ```sh
//! REDIS_URL=redis://localhost:6379 cargo test --test redis_test -- --ignored
//! ```

use std::time::Duration;
use tierq::model::{Job, Tier};
use tierq::queue::{QueueNames, RedisQueue, TieredQueue};
use tierq::stream::{Fields, RedisStream, ResultStream};

fn redis_url() -> String {
    dotenvy::dotenv().ok();
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

/// Fresh key names so runs do not interfere.
fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

#[tokio::test]
#[ignore] // Requires running Redis
async fn queue_pops_across_tiers() {
    let names = QueueNames {
        free: unique("test-free"),
        premium: unique("test-premium"),
    };
    let queue = RedisQueue::connect(&redis_url(), names).await.unwrap();

    queue
        .push(&Job::new("f1", "u", "c", Tier::Free))
        .await
        .unwrap();
    queue
        .push(&Job::new("p1", "u", "c", Tier::Premium))
        .await
        .unwrap();
    queue
        .push(&Job::new("f2", "u", "c", Tier::Free))
        .await
        .unwrap();
    assert_eq!(queue.depth(Tier::Free).await.unwrap(), 2);

    let timeout = Duration::from_secs(1);
    let mut order = Vec::new();
    while let Some(job) = queue.pop_blocking(&Tier::ALL, timeout).await.unwrap() {
        order.push(job.submission_id);
    }
    assert_eq!(order, ["p1", "f1", "f2"]);
}

#[tokio::test]
#[ignore] // Requires running Redis
async fn pop_times_out_on_empty_lists() {
    let names = QueueNames {
        free: unique("test-free"),
        premium: unique("test-premium"),
    };
    let queue = RedisQueue::connect(&redis_url(), names).await.unwrap();
    let popped = queue
        .pop_blocking(&Tier::ALL, Duration::from_millis(200))
        .await
        .unwrap();
    assert!(popped.is_none());
}

#[tokio::test]
#[ignore] // Requires running Redis
async fn stream_group_read_claim_ack() {
    let stream_name = unique("test-submission");
    let group = "results_group";
    let stream = RedisStream::connect(&redis_url()).await.unwrap();

    stream.ensure_group(&stream_name, group).await.unwrap();
    stream.ensure_group(&stream_name, group).await.unwrap();

    let fields = Fields::from([("submission_id".to_string(), "s1".to_string())]);
    let id = stream.append(&stream_name, &fields).await.unwrap();

    let batch = stream
        .read_group(&stream_name, group, "c1", 10, Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, id);
    assert_eq!(batch[0].fields["submission_id"], "s1");
    assert_eq!(stream.pending_count(&stream_name, group).await.unwrap(), 1);

    let claimed = stream
        .claim_idle(&stream_name, group, "c2", Duration::ZERO, 10)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].deliveries, 2);

    stream.ack(&stream_name, group, &id).await.unwrap();
    assert_eq!(stream.pending_count(&stream_name, group).await.unwrap(), 0);

    let empty = stream
        .read_group(&stream_name, group, "c1", 10, Duration::from_millis(100))
        .await
        .unwrap();
    assert!(empty.is_empty());
}
