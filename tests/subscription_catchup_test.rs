//! Catch-up seam stress: continuity while appends race the replay, and
//! duplicate suppression when the clock-skew overlap is widest or absent.

mod common;

use std::time::Duration;

use serde_json::json;
use tidelog::{
    Event, ExpectedRevision, MemoryEventStore, ReadPosition, ReadRevision, SqliteEventStore,
    StoreConfig, SubscribableEventStore,
};

const TOTAL: u64 = 30;
const HISTORICAL: u64 = 15;

async fn append_numbered<S: SubscribableEventStore>(store: &S, range: std::ops::Range<u64>) {
    for n in range {
        store
            .append_to_stream(
                "s",
                vec![Event::new("E", json!({ "n": n }))],
                ExpectedRevision::Any,
            )
            .await
            .unwrap();
    }
}

/// Small replay pages force many replay/feed boundary crossings while a
/// writer keeps appending; delivery must still be gapless and duplicate-free.
#[tokio::test]
async fn sqlite_delivery_is_continuous_under_small_batches() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StoreConfig::default();
    config.subscription.batch_size = 2;
    config.subscription.poll_interval = Duration::from_millis(1);
    let store =
        SqliteEventStore::open_with_config(dir.path().join("continuity.db"), config).unwrap();

    append_numbered(&store, 0..HISTORICAL).await;

    let mut sub = store.subscribe("s", Some(ReadRevision::Start)).await.unwrap();

    let writer = store.clone();
    let appender = tokio::spawn(async move {
        append_numbered(&writer, HISTORICAL..TOTAL).await;
    });

    for expected in 0..TOTAL {
        let event = common::next_within(&mut sub).await.unwrap().unwrap();
        assert_eq!(event.revision, expected, "gap or duplicate at revision {expected}");
    }
    appender.await.unwrap();
}

#[tokio::test]
async fn memory_delivery_is_continuous_while_appends_race() {
    let store = MemoryEventStore::new();

    append_numbered(&store, 0..HISTORICAL).await;

    let mut sub = store.subscribe("s", Some(ReadRevision::Start)).await.unwrap();

    let writer = store.clone();
    let appender = tokio::spawn(async move {
        append_numbered(&writer, HISTORICAL..TOTAL).await;
    });

    for expected in 0..TOTAL {
        let event = common::next_within(&mut sub).await.unwrap().unwrap();
        assert_eq!(event.revision, expected, "gap or duplicate at revision {expected}");
    }
    appender.await.unwrap();
}

/// With a zero skew window the global feed opens right at "now", the worst
/// case for the seam: events committed in the same millisecond as the
/// subscribe sit on both sides of it and must be delivered exactly once.
#[tokio::test]
async fn sqlite_global_seam_with_zero_skew_has_no_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StoreConfig::default();
    config.subscription.clock_skew = Duration::ZERO;
    config.subscription.poll_interval = Duration::from_millis(1);
    let store = SqliteEventStore::open_with_config(dir.path().join("zero-skew.db"), config).unwrap();

    append_numbered(&store, 0..HISTORICAL).await;

    let mut sub = store
        .subscribe_to_all(Some(ReadPosition::Start))
        .await
        .unwrap();

    append_numbered(&store, HISTORICAL..TOTAL).await;

    let mut last_position = None;
    for expected in 0..TOTAL {
        let event = common::next_within(&mut sub).await.unwrap().unwrap();
        assert_eq!(event.event.revision, expected, "gap or duplicate at revision {expected}");
        if let Some(last) = &last_position {
            assert!(event.position > *last, "positions must strictly increase");
        }
        last_position = Some(event.position);
    }
}

/// The widest overlap: the feed starts a full hour back and replays events
/// the historical phase already delivered; identity dedup must drop them.
#[tokio::test]
async fn sqlite_global_seam_with_wide_skew_has_no_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StoreConfig::default();
    config.subscription.clock_skew = Duration::from_secs(3600);
    config.subscription.poll_interval = Duration::from_millis(1);
    let store = SqliteEventStore::open_with_config(dir.path().join("wide-skew.db"), config).unwrap();

    append_numbered(&store, 0..HISTORICAL).await;

    let mut sub = store
        .subscribe_to_all(Some(ReadPosition::Start))
        .await
        .unwrap();

    append_numbered(&store, HISTORICAL..TOTAL).await;

    for expected in 0..TOTAL {
        let event = common::next_within(&mut sub).await.unwrap().unwrap();
        assert_eq!(event.event.revision, expected, "gap or duplicate at revision {expected}");
    }
}
