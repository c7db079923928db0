//! Backend-agnostic behavioral suite. Each function asserts one piece of the
//! store contract against whatever backend the caller passes in; the
//! per-backend test files instantiate the whole suite.
#![allow(dead_code)]

use std::time::Duration;

use futures::TryStreamExt;
use serde_json::json;
use tidelog::{
    Error, Event, ExpectedRevision, ReadAllOptions, ReadDirection, ReadPosition, ReadRevision,
    ReadStreamOptions, StoreAllEvent, StoreEvent, SubscribableEventStore, Subscription,
};

const WAIT: Duration = Duration::from_secs(5);

/// Appends the canonical three-event fixture: Created, Updated, Updated.
pub async fn write_default_events<S: SubscribableEventStore>(store: &S, stream: &str) {
    let events = vec![
        Event::new("Created", json!({ "n": 0 })),
        Event::new("Updated", json!({ "n": 1 })),
        Event::new("Updated", json!({ "n": 2 })),
    ];
    store
        .append_to_stream(stream, events, ExpectedRevision::NoStream)
        .await
        .expect("fixture append");
}

/// Receives the next subscription item, failing the test on a stall.
pub async fn next_within<T>(sub: &mut Subscription<T>) -> Option<tidelog::Result<T>> {
    tokio::time::timeout(WAIT, sub.next())
        .await
        .expect("timed out waiting for subscription item")
}

async fn collect_stream<S: SubscribableEventStore>(
    store: &S,
    stream: &str,
    options: ReadStreamOptions,
) -> Vec<StoreEvent> {
    store
        .read_stream(stream, options)
        .try_collect()
        .await
        .expect("read_stream")
}

async fn collect_all<S: SubscribableEventStore>(
    store: &S,
    options: ReadAllOptions,
) -> Vec<StoreAllEvent> {
    store.read_all(options).try_collect().await.expect("read_all")
}

fn revisions(events: &[StoreEvent]) -> Vec<u64> {
    events.iter().map(|e| e.revision).collect()
}

// =============================================================================
// Append
// =============================================================================

pub async fn append_assigns_consecutive_revisions<S: SubscribableEventStore>(store: &S) {
    let first = store
        .append_to_stream(
            "s",
            vec![Event::new("A", json!({})), Event::new("B", json!({}))],
            ExpectedRevision::NoStream,
        )
        .await
        .unwrap();
    assert_eq!(first.revision, 1);

    let second = store
        .append_to_stream(
            "s",
            vec![Event::new("C", json!({}))],
            ExpectedRevision::Exact(first.revision),
        )
        .await
        .unwrap();
    assert_eq!(second.revision, 2);

    let events = collect_stream(store, "s", ReadStreamOptions::default()).await;
    assert_eq!(revisions(&events), vec![0, 1, 2]);
}

pub async fn append_any_skips_the_concurrency_check<S: SubscribableEventStore>(store: &S) {
    for n in 0..3 {
        store
            .append_to_stream(
                "s",
                vec![Event::new("E", json!({ "n": n }))],
                ExpectedRevision::Any,
            )
            .await
            .unwrap();
    }
    let events = collect_stream(store, "s", ReadStreamOptions::default()).await;
    assert_eq!(revisions(&events), vec![0, 1, 2]);
}

pub async fn no_stream_rejects_an_existing_stream<S: SubscribableEventStore>(store: &S) {
    write_default_events(store, "s").await;

    let err = store
        .append_to_stream(
            "s",
            vec![Event::new("E", json!({}))],
            ExpectedRevision::NoStream,
        )
        .await
        .unwrap_err();
    match err {
        Error::RevisionMismatch {
            stream,
            expected,
            actual,
        } => {
            assert_eq!(stream, "s");
            assert_eq!(expected, ExpectedRevision::NoStream);
            assert_eq!(actual, tidelog::CurrentRevision::Revision(2));
        }
        other => panic!("expected RevisionMismatch, got {other}"),
    }
}

pub async fn stale_expected_revision_appends_nothing<S: SubscribableEventStore>(store: &S) {
    write_default_events(store, "s").await;

    let err = store
        .append_to_stream(
            "s",
            vec![Event::new("A", json!({})), Event::new("B", json!({}))],
            ExpectedRevision::Exact(0),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RevisionMismatch { .. }));

    // All-or-nothing: the losing batch must leave no trace.
    let events = collect_stream(store, "s", ReadStreamOptions::default()).await;
    assert_eq!(events.len(), 3);
}

pub async fn empty_append_is_rejected<S: SubscribableEventStore>(store: &S) {
    let err = store
        .append_to_stream("s", Vec::new(), ExpectedRevision::Any)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EmptyAppend));
}

// =============================================================================
// Stream Reads
// =============================================================================

pub async fn reading_an_absent_stream_fails<S: SubscribableEventStore>(store: &S) {
    let err = store
        .read_stream("missing", ReadStreamOptions::default())
        .try_collect::<Vec<_>>()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StreamNotFound { .. }));
}

pub async fn reads_preserve_append_order<S: SubscribableEventStore>(store: &S) {
    write_default_events(store, "s").await;

    let events = collect_stream(store, "s", ReadStreamOptions::default()).await;
    assert_eq!(revisions(&events), vec![0, 1, 2]);
    assert_eq!(events[0].event.event_type, "Created");
    assert_eq!(events[2].event.data, json!({ "n": 2 }));
    assert!(events.iter().all(|e| e.stream == "s"));
}

pub async fn from_revision_is_exclusive_forwards<S: SubscribableEventStore>(store: &S) {
    write_default_events(store, "s").await;

    let opts = ReadStreamOptions::default().from_revision(ReadRevision::Revision(0));
    let events = collect_stream(store, "s", opts).await;
    assert_eq!(revisions(&events), vec![1, 2]);
}

pub async fn forwards_from_end_is_empty<S: SubscribableEventStore>(store: &S) {
    write_default_events(store, "s").await;

    let opts = ReadStreamOptions::default().from_revision(ReadRevision::End);
    let events = collect_stream(store, "s", opts).await;
    assert!(events.is_empty());
}

pub async fn backwards_from_end_reverses<S: SubscribableEventStore>(store: &S) {
    write_default_events(store, "s").await;

    let opts = ReadStreamOptions::default()
        .from_revision(ReadRevision::End)
        .direction(ReadDirection::Backwards);
    let events = collect_stream(store, "s", opts).await;
    assert_eq!(revisions(&events), vec![2, 1, 0]);
}

pub async fn backwards_from_start_is_empty<S: SubscribableEventStore>(store: &S) {
    write_default_events(store, "s").await;

    let opts = ReadStreamOptions::default()
        .from_revision(ReadRevision::Start)
        .direction(ReadDirection::Backwards);
    let events = collect_stream(store, "s", opts).await;
    assert!(events.is_empty());
}

pub async fn from_revision_is_exclusive_backwards<S: SubscribableEventStore>(store: &S) {
    write_default_events(store, "s").await;

    let opts = ReadStreamOptions::default()
        .from_revision(ReadRevision::Revision(2))
        .direction(ReadDirection::Backwards);
    let events = collect_stream(store, "s", opts).await;
    assert_eq!(revisions(&events), vec![1, 0]);
}

pub async fn max_count_caps_both_directions<S: SubscribableEventStore>(store: &S) {
    write_default_events(store, "s").await;

    let forwards = collect_stream(store, "s", ReadStreamOptions::default().max_count(2)).await;
    assert_eq!(revisions(&forwards), vec![0, 1]);

    let opts = ReadStreamOptions::default()
        .from_revision(ReadRevision::End)
        .direction(ReadDirection::Backwards)
        .max_count(2);
    let backwards = collect_stream(store, "s", opts).await;
    assert_eq!(revisions(&backwards), vec![2, 1]);
}

// =============================================================================
// Global Reads
// =============================================================================

pub async fn read_all_interleaves_streams_in_append_order<S: SubscribableEventStore>(store: &S) {
    store
        .append_to_stream("a", vec![Event::new("E", json!({ "n": 0 }))], ExpectedRevision::Any)
        .await
        .unwrap();
    store
        .append_to_stream("b", vec![Event::new("E", json!({ "n": 1 }))], ExpectedRevision::Any)
        .await
        .unwrap();
    store
        .append_to_stream("a", vec![Event::new("E", json!({ "n": 2 }))], ExpectedRevision::Any)
        .await
        .unwrap();

    let all = collect_all(store, ReadAllOptions::default()).await;
    assert_eq!(
        all.iter().map(|e| e.event.stream.as_str()).collect::<Vec<_>>(),
        vec!["a", "b", "a"]
    );
    assert!(all.windows(2).all(|w| w[0].position < w[1].position));
}

pub async fn read_all_from_position_is_exclusive<S: SubscribableEventStore>(store: &S) {
    write_default_events(store, "s").await;

    let all = collect_all(store, ReadAllOptions::default()).await;
    let cursor = all[0].position.clone();

    let opts = ReadAllOptions::default().from_position(ReadPosition::Position(cursor));
    let rest = collect_all(store, opts).await;
    assert_eq!(
        rest.iter().map(|e| e.event.revision).collect::<Vec<_>>(),
        vec![1, 2]
    );
}

pub async fn read_all_backwards_reverses<S: SubscribableEventStore>(store: &S) {
    write_default_events(store, "s").await;

    let opts = ReadAllOptions::default()
        .from_position(ReadPosition::End)
        .direction(ReadDirection::Backwards);
    let all = collect_all(store, opts).await;
    assert_eq!(
        all.iter().map(|e| e.event.revision).collect::<Vec<_>>(),
        vec![2, 1, 0]
    );
}

pub async fn read_all_never_raises_not_found<S: SubscribableEventStore>(store: &S) {
    let all = collect_all(store, ReadAllOptions::default()).await;
    assert!(all.is_empty());
}

pub async fn read_all_max_count_caps<S: SubscribableEventStore>(store: &S) {
    write_default_events(store, "s").await;

    let all = collect_all(store, ReadAllOptions::default().max_count(2)).await;
    assert_eq!(all.len(), 2);
    assert_eq!(all[1].event.revision, 1);
}

// =============================================================================
// Delete
// =============================================================================

pub async fn delete_stream_round_trip<S: SubscribableEventStore>(store: &S) {
    write_default_events(store, "doomed").await;
    write_default_events(store, "kept").await;

    store.delete_stream("doomed").await.unwrap();

    let err = store
        .read_stream("doomed", ReadStreamOptions::default())
        .try_collect::<Vec<_>>()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StreamNotFound { .. }));

    // Other streams are untouched.
    let kept = collect_stream(store, "kept", ReadStreamOptions::default()).await;
    assert_eq!(kept.len(), 3);

    // Idempotent: deleting again (or deleting the never-existing) succeeds.
    store.delete_stream("doomed").await.unwrap();
    store.delete_stream("never-existed").await.unwrap();

    // The stream can be recreated; revisions restart at zero.
    write_default_events(store, "doomed").await;
    let reborn = collect_stream(store, "doomed", ReadStreamOptions::default()).await;
    assert_eq!(revisions(&reborn), vec![0, 1, 2]);
}

// =============================================================================
// Stream Subscriptions
// =============================================================================

pub async fn catch_up_delivers_history_then_live<S: SubscribableEventStore>(store: &S) {
    write_default_events(store, "s").await;

    let mut sub = store
        .subscribe("s", Some(ReadRevision::Start))
        .await
        .unwrap();
    for expected in 0..3u64 {
        let event = next_within(&mut sub).await.unwrap().unwrap();
        assert_eq!(event.revision, expected);
    }

    store
        .append_to_stream(
            "s",
            vec![Event::new("Updated", json!({ "n": 3 }))],
            ExpectedRevision::Exact(2),
        )
        .await
        .unwrap();

    let event = next_within(&mut sub).await.unwrap().unwrap();
    assert_eq!(event.revision, 3);
    assert_eq!(event.event.data, json!({ "n": 3 }));
}

pub async fn catch_up_from_revision_skips_earlier_events<S: SubscribableEventStore>(store: &S) {
    write_default_events(store, "s").await;

    let mut sub = store
        .subscribe("s", Some(ReadRevision::Revision(0)))
        .await
        .unwrap();
    let event = next_within(&mut sub).await.unwrap().unwrap();
    assert_eq!(event.revision, 1);
    let event = next_within(&mut sub).await.unwrap().unwrap();
    assert_eq!(event.revision, 2);
}

pub async fn live_only_skips_history<S: SubscribableEventStore>(store: &S) {
    write_default_events(store, "s").await;

    let mut sub = store.subscribe("s", None).await.unwrap();
    store
        .append_to_stream(
            "s",
            vec![Event::new("Updated", json!({ "n": 3 }))],
            ExpectedRevision::Exact(2),
        )
        .await
        .unwrap();

    let event = next_within(&mut sub).await.unwrap().unwrap();
    assert_eq!(event.revision, 3);
}

pub async fn subscribing_to_an_absent_stream_waits_live<S: SubscribableEventStore>(store: &S) {
    let mut sub = store
        .subscribe("later", Some(ReadRevision::Start))
        .await
        .unwrap();

    write_default_events(store, "later").await;

    let event = next_within(&mut sub).await.unwrap().unwrap();
    assert_eq!(event.revision, 0);
}

pub async fn subscription_ignores_other_streams<S: SubscribableEventStore>(store: &S) {
    let mut sub = store.subscribe("mine", Some(ReadRevision::Start)).await.unwrap();

    write_default_events(store, "other").await;
    write_default_events(store, "mine").await;

    for expected in 0..3u64 {
        let event = next_within(&mut sub).await.unwrap().unwrap();
        assert_eq!(event.stream, "mine");
        assert_eq!(event.revision, expected);
    }
}

pub async fn cancellation_is_silent<S: SubscribableEventStore>(store: &S) {
    write_default_events(store, "s").await;

    let mut sub = store.subscribe("s", None).await.unwrap();
    sub.cancel();
    assert!(next_within(&mut sub).await.is_none());

    // The store keeps working after the subscriber is gone.
    store
        .append_to_stream(
            "s",
            vec![Event::new("Updated", json!({ "n": 3 }))],
            ExpectedRevision::Exact(2),
        )
        .await
        .unwrap();
}

// =============================================================================
// Global Subscriptions
// =============================================================================

pub async fn global_catch_up_spans_streams<S: SubscribableEventStore>(store: &S) {
    write_default_events(store, "a").await;
    write_default_events(store, "b").await;

    let mut sub = store
        .subscribe_to_all(Some(ReadPosition::Start))
        .await
        .unwrap();

    let mut seen = Vec::new();
    for _ in 0..6 {
        let event = next_within(&mut sub).await.unwrap().unwrap();
        seen.push(event);
    }
    assert!(seen.windows(2).all(|w| w[0].position < w[1].position));
    assert_eq!(seen.iter().filter(|e| e.event.stream == "a").count(), 3);
    assert_eq!(seen.iter().filter(|e| e.event.stream == "b").count(), 3);

    // The live phase follows without a gap.
    store
        .append_to_stream("c", vec![Event::new("E", json!({}))], ExpectedRevision::Any)
        .await
        .unwrap();
    let event = next_within(&mut sub).await.unwrap().unwrap();
    assert_eq!(event.event.stream, "c");
    assert!(event.position > seen[5].position);
}

pub async fn global_subscription_resumes_from_position<S: SubscribableEventStore>(store: &S) {
    write_default_events(store, "s").await;

    let all = collect_all(store, ReadAllOptions::default()).await;
    let checkpoint = all[1].position.clone();

    let mut sub = store
        .subscribe_to_all(Some(ReadPosition::Position(checkpoint)))
        .await
        .unwrap();
    let event = next_within(&mut sub).await.unwrap().unwrap();
    assert_eq!(event.event.revision, 2);
}

pub async fn global_live_only_skips_history<S: SubscribableEventStore>(store: &S) {
    write_default_events(store, "s").await;

    let mut sub = store.subscribe_to_all(None).await.unwrap();
    store
        .append_to_stream("t", vec![Event::new("E", json!({}))], ExpectedRevision::Any)
        .await
        .unwrap();

    let event = next_within(&mut sub).await.unwrap().unwrap();
    assert_eq!(event.event.stream, "t");
}

pub async fn global_subscription_on_empty_store_goes_live<S: SubscribableEventStore>(store: &S) {
    let mut sub = store
        .subscribe_to_all(Some(ReadPosition::Start))
        .await
        .unwrap();

    write_default_events(store, "s").await;

    let event = next_within(&mut sub).await.unwrap().unwrap();
    assert_eq!(event.event.revision, 0);
}

/// No gap, no duplicate across the catch-up seam while appends race the
/// replay.
pub async fn seam_has_no_gap_and_no_duplicate<S: SubscribableEventStore>(store: &S) {
    for n in 0..10u64 {
        store
            .append_to_stream(
                "s",
                vec![Event::new("E", json!({ "n": n }))],
                ExpectedRevision::Any,
            )
            .await
            .unwrap();
    }

    let mut sub = store.subscribe("s", Some(ReadRevision::Start)).await.unwrap();

    // Race the historical replay with more appends.
    for n in 10..20u64 {
        store
            .append_to_stream(
                "s",
                vec![Event::new("E", json!({ "n": n }))],
                ExpectedRevision::Any,
            )
            .await
            .unwrap();
    }

    for expected in 0..20u64 {
        let event = next_within(&mut sub).await.unwrap().unwrap();
        assert_eq!(event.revision, expected, "gap or duplicate at the seam");
    }
}
