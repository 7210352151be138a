use std::sync::Arc;
use std::time::Duration;
use tierq::stream::{EntryId, Fields, InMemoryStream, ResultStream};

const STREAM: &str = "submission";
const GROUP: &str = "results_group";

fn entry(n: u32) -> Fields {
    Fields::from([("n".to_string(), n.to_string())])
}

async fn stream_with(count: u32) -> InMemoryStream {
    let stream = InMemoryStream::new();
    stream.ensure_group(STREAM, GROUP).await.unwrap();
    for n in 0..count {
        stream.append(STREAM, &entry(n)).await.unwrap();
    }
    stream
}

#[tokio::test]
async fn group_starts_at_beginning_of_stream() {
    let stream = InMemoryStream::new();
    stream.append(STREAM, &entry(0)).await.unwrap();
    stream.append(STREAM, &entry(1)).await.unwrap();
    stream.ensure_group(STREAM, GROUP).await.unwrap();

    let batch = stream
        .read_group(STREAM, GROUP, "c1", 10, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].fields["n"], "0");
    assert_eq!(batch[1].fields["n"], "1");
}

#[tokio::test]
async fn ensure_group_is_idempotent_and_keeps_state() {
    let stream = stream_with(3).await;
    let first = stream
        .read_group(STREAM, GROUP, "c1", 2, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(first.len(), 2);

    stream.ensure_group(STREAM, GROUP).await.unwrap();

    assert_eq!(stream.pending_count(STREAM, GROUP).await.unwrap(), 2);
    let rest = stream
        .read_group(STREAM, GROUP, "c1", 10, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].fields["n"], "2");
}

#[tokio::test]
async fn entries_are_delivered_once_per_group_in_order() {
    let stream = stream_with(5).await;

    let a = stream
        .read_group(STREAM, GROUP, "a", 3, Duration::ZERO)
        .await
        .unwrap();
    let b = stream
        .read_group(STREAM, GROUP, "b", 3, Duration::ZERO)
        .await
        .unwrap();

    let ids: Vec<&EntryId> = a.iter().chain(b.iter()).map(|e| &e.id).collect();
    assert_eq!(ids.len(), 5);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    assert!(a.iter().chain(b.iter()).all(|e| e.deliveries == 1));

    let again = stream
        .read_group(STREAM, GROUP, "a", 10, Duration::ZERO)
        .await
        .unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn separate_groups_see_every_entry() {
    let stream = stream_with(2).await;
    stream.ensure_group(STREAM, "audit").await.unwrap();

    for group in [GROUP, "audit"] {
        let batch = stream
            .read_group(STREAM, group, "c1", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(batch.len(), 2, "group {group}");
    }
}

#[tokio::test]
async fn ack_clears_pending() {
    let stream = stream_with(2).await;
    let batch = stream
        .read_group(STREAM, GROUP, "c1", 10, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(stream.pending_count(STREAM, GROUP).await.unwrap(), 2);

    stream.ack(STREAM, GROUP, &batch[0].id).await.unwrap();
    assert_eq!(stream.pending_count(STREAM, GROUP).await.unwrap(), 1);
    assert!(stream.pending_owner(STREAM, GROUP, &batch[0].id).is_none());
    assert_eq!(
        stream.pending_owner(STREAM, GROUP, &batch[1].id).as_deref(),
        Some("c1")
    );

    // Acking twice is harmless.
    stream.ack(STREAM, GROUP, &batch[0].id).await.unwrap();
    assert_eq!(stream.pending_count(STREAM, GROUP).await.unwrap(), 1);
}

#[tokio::test]
async fn read_without_group_fails() {
    let stream = InMemoryStream::new();
    stream.append(STREAM, &entry(0)).await.unwrap();
    let read = stream
        .read_group(STREAM, "missing", "c1", 10, Duration::ZERO)
        .await;
    assert!(read.is_err());
}

#[tokio::test]
async fn blocked_read_wakes_on_append() {
    let stream = Arc::new(stream_with(0).await);
    let reader = {
        let stream = stream.clone();
        tokio::spawn(async move {
            stream
                .read_group(STREAM, GROUP, "c1", 10, Duration::from_secs(5))
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    stream.append(STREAM, &entry(7)).await.unwrap();

    let batch = reader.await.unwrap().unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].fields["n"], "7");
}

#[tokio::test]
async fn blocked_read_times_out_empty() {
    let stream = stream_with(0).await;
    let batch = stream
        .read_group(STREAM, GROUP, "c1", 10, Duration::from_millis(30))
        .await
        .unwrap();
    assert!(batch.is_empty());
}

#[tokio::test(start_paused = true)]
async fn idle_pending_entries_move_to_claimer() {
    let stream = stream_with(2).await;
    let delivered = stream
        .read_group(STREAM, GROUP, "crashed", 10, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(delivered.len(), 2);

    let too_soon = stream
        .claim_idle(STREAM, GROUP, "live", Duration::from_secs(30), 10)
        .await
        .unwrap();
    assert!(too_soon.is_empty());

    tokio::time::advance(Duration::from_secs(31)).await;

    let claimed = stream
        .claim_idle(STREAM, GROUP, "live", Duration::from_secs(30), 1)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, delivered[0].id);
    assert_eq!(claimed[0].deliveries, 2);
    assert_eq!(
        stream.pending_owner(STREAM, GROUP, &claimed[0].id).as_deref(),
        Some("live")
    );
    assert_eq!(
        stream.pending_owner(STREAM, GROUP, &delivered[1].id).as_deref(),
        Some("crashed")
    );

    // A fresh claim resets the idle clock.
    let immediate = stream
        .claim_idle(STREAM, GROUP, "other", Duration::from_secs(30), 10)
        .await
        .unwrap();
    assert_eq!(immediate.len(), 1);
    assert_eq!(immediate[0].id, delivered[1].id);
}

#[tokio::test]
async fn claim_on_missing_stream_is_empty() {
    let stream = InMemoryStream::new();
    let claimed = stream
        .claim_idle("nothing", GROUP, "c1", Duration::ZERO, 10)
        .await
        .unwrap();
    assert!(claimed.is_empty());
}
