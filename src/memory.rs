//! # In-Memory Backend
//!
//! [`MemoryEventStore`] keeps the whole log in process memory: a `BTreeMap`
//! per stream keyed by revision, one global `BTreeMap` keyed by sequence
//! number, and a monotonic counter minting positions. Everything is gone when
//! the store is dropped; positions are meaningless across restarts.
//!
//! It exists for tests and prototypes, but it honors the full contract,
//! including the optimistic-concurrency check and gapless catch-up
//! subscriptions, so code developed against it moves to the durable backend
//! unchanged.
//!
//! ## Concurrency Model
//!
//! A single `std::sync::Mutex` guards the state. Appends validate the
//! expected revision, assign revisions and positions, and publish to the
//! live broadcast channel all inside one critical section, so broadcast
//! order always equals position order. The lock is never held across an
//! `.await`.
//!
//! ## Catch-Up Seam
//!
//! A catch-up subscription attaches its broadcast receiver *before* taking
//! the historical snapshot. Every append therefore lands in the snapshot, in
//! the receiver, or in both; the boundary revision (or position) recorded
//! with the snapshot filters the overlap out of the live phase. No gap, no
//! duplicate.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::store::{
    AllEventStream, EventStore, EventStream, ReadAllOptions, ReadStreamOptions,
    SubscribableEventStore,
};
use crate::subscription::{self, Subscription, SubscriptionConfig};
use crate::types::{
    now_ms, AppendResult, CurrentRevision, Event, ExpectedRevision, Position, ReadDirection,
    ReadPosition, ReadRevision, StoreAllEvent, StoreEvent,
};

// =============================================================================
// State
// =============================================================================

#[derive(Default)]
struct State {
    /// Last minted sequence number; 0 means nothing was ever appended.
    sequence: u64,

    /// The global log, keyed by sequence number.
    all: BTreeMap<u64, StoreAllEvent>,

    /// Per-stream logs, keyed by revision.
    streams: BTreeMap<String, BTreeMap<u64, StoreAllEvent>>,
}

impl State {
    fn current_revision(&self, stream: &str) -> CurrentRevision {
        self.streams
            .get(stream)
            .and_then(|log| log.keys().next_back().copied())
            .into()
    }
}

struct Inner {
    state: Mutex<State>,
    live: broadcast::Sender<StoreAllEvent>,
    config: SubscriptionConfig,
}

// =============================================================================
// Store
// =============================================================================

/// A volatile event store holding all events in process memory.
///
/// Cloning is cheap and every clone shares the same log.
#[derive(Clone)]
pub struct MemoryEventStore {
    inner: Arc<Inner>,
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEventStore {
    /// Creates an empty store with default subscription tuning.
    pub fn new() -> Self {
        Self::with_config(SubscriptionConfig::default())
    }

    /// Creates an empty store with explicit subscription tuning. The
    /// broadcast buffer size is taken from `channel_capacity`; a consumer
    /// that falls further behind than that observes
    /// [`SubscriptionLagged`](Error::SubscriptionLagged).
    pub fn with_config(config: SubscriptionConfig) -> Self {
        let (live, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                live,
                config,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock means an append panicked mid-update; the state is
        // unrecoverable either way.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Selects the stream window for `(cursor, direction)`, oldest-first input.
fn stream_window(
    log: &BTreeMap<u64, StoreAllEvent>,
    from: ReadRevision,
    direction: ReadDirection,
    max_count: Option<usize>,
) -> Vec<StoreEvent> {
    let events = log.values().map(|e| e.event.clone());
    let limit = max_count.unwrap_or(usize::MAX);
    match direction {
        ReadDirection::Forwards => {
            let skip_through = match from {
                ReadRevision::Start => None,
                ReadRevision::End => return Vec::new(),
                ReadRevision::Revision(n) => Some(n),
            };
            events
                .filter(|e| match skip_through {
                    None => true,
                    Some(n) => e.revision > n,
                })
                .take(limit)
                .collect()
        }
        ReadDirection::Backwards => {
            let stop_at = match from {
                ReadRevision::Start => return Vec::new(),
                ReadRevision::End => None,
                ReadRevision::Revision(n) => Some(n),
            };
            events
                .rev()
                .filter(|e| match stop_at {
                    None => true,
                    Some(n) => e.revision < n,
                })
                .take(limit)
                .collect()
        }
    }
}

/// Selects the global window for `(cursor, direction)`, oldest-first input.
fn all_window(
    log: &BTreeMap<u64, StoreAllEvent>,
    from: &ReadPosition,
    direction: ReadDirection,
    max_count: Option<usize>,
) -> Vec<StoreAllEvent> {
    let limit = max_count.unwrap_or(usize::MAX);
    match direction {
        ReadDirection::Forwards => {
            let after: Option<&Position> = match from {
                ReadPosition::Start => None,
                ReadPosition::End => return Vec::new(),
                ReadPosition::Position(p) => Some(p),
            };
            log.values()
                .filter(|e| after.map_or(true, |p| e.position > *p))
                .take(limit)
                .cloned()
                .collect()
        }
        ReadDirection::Backwards => {
            let before: Option<&Position> = match from {
                ReadPosition::Start => return Vec::new(),
                ReadPosition::End => None,
                ReadPosition::Position(p) => Some(p),
            };
            log.values()
                .rev()
                .filter(|e| before.map_or(true, |p| e.position < *p))
                .take(limit)
                .cloned()
                .collect()
        }
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append_to_stream(
        &self,
        stream: &str,
        events: Vec<Event>,
        expected: ExpectedRevision,
    ) -> Result<AppendResult> {
        if events.is_empty() {
            return Err(Error::EmptyAppend);
        }

        let mut state = self.lock();

        let current = state.current_revision(stream);
        if !current.satisfies(expected) {
            debug!(stream, %expected, %current, "append rejected");
            return Err(Error::RevisionMismatch {
                stream: stream.to_string(),
                expected,
                actual: current,
            });
        }

        let timestamp = now_ms();
        let mut revision = current.next();
        let count = events.len();

        for event in events {
            state.sequence += 1;
            let sequence = state.sequence;
            let stored = StoreAllEvent {
                event: StoreEvent {
                    event,
                    stream: stream.to_string(),
                    revision,
                    timestamp,
                },
                position: Position::from_sequence(sequence),
            };
            state
                .streams
                .entry(stream.to_string())
                .or_default()
                .insert(revision, stored.clone());
            state.all.insert(sequence, stored.clone());
            // Publishing inside the critical section keeps broadcast order
            // identical to position order. Send only fails when nobody is
            // subscribed.
            let _ = self.inner.live.send(stored);
            revision += 1;
        }

        let result = AppendResult {
            revision: revision - 1,
        };
        trace!(stream, count, revision = result.revision, "append committed");
        Ok(result)
    }

    fn read_stream(&self, stream: &str, options: ReadStreamOptions) -> EventStream {
        let state = self.lock();
        match state.streams.get(stream) {
            None => {
                let err = Error::StreamNotFound {
                    stream: stream.to_string(),
                };
                Box::pin(stream::once(async move { Err::<StoreEvent, _>(err) }))
            }
            Some(log) => {
                let window =
                    stream_window(log, options.from_revision, options.direction, options.max_count);
                Box::pin(stream::iter(window.into_iter().map(Ok)))
            }
        }
    }

    fn read_all(&self, options: ReadAllOptions) -> AllEventStream {
        let state = self.lock();
        let window = all_window(
            &state.all,
            &options.from_position,
            options.direction,
            options.max_count,
        );
        Box::pin(stream::iter(window.into_iter().map(Ok)))
    }

    async fn delete_stream(&self, stream: &str) -> Result<()> {
        let mut state = self.lock();
        if let Some(log) = state.streams.remove(stream) {
            for event in log.values() {
                if let Some(sequence) = event.position.sequence() {
                    state.all.remove(&sequence);
                }
            }
            debug!(stream, "stream deleted");
        }
        Ok(())
    }
}

#[async_trait]
impl SubscribableEventStore for MemoryEventStore {
    async fn subscribe(
        &self,
        stream: &str,
        from_revision: Option<ReadRevision>,
    ) -> Result<Subscription<StoreEvent>> {
        let (mut tx, sub) = subscription::channel(self.inner.config.channel_capacity);
        let stream_name = stream.to_string();

        // Receiver first, snapshot second: an append between the two shows
        // up in both and is deduplicated by the boundary revision.
        let mut live = self.inner.live.subscribe();

        let (history, boundary) = match from_revision {
            // Live-only: nothing historical, deliver strictly after "now".
            None => {
                let state = self.lock();
                (Vec::new(), state.current_revision(&stream_name))
            }
            Some(from) => {
                let state = self.lock();
                let boundary = state.current_revision(&stream_name);
                let history = state
                    .streams
                    .get(&stream_name)
                    .map(|log| stream_window(log, from, ReadDirection::Forwards, None))
                    .unwrap_or_default();
                (history, boundary)
            }
        };

        debug!(
            stream = %stream_name,
            replay = history.len(),
            %boundary,
            "stream subscription attached"
        );

        tokio::spawn(async move {
            for event in history {
                if !tx.send(Ok(event)).await {
                    return;
                }
            }
            let floor = match boundary {
                CurrentRevision::NoStream => None,
                CurrentRevision::Revision(n) => Some(n),
            };
            loop {
                let received = tokio::select! {
                    received = live.recv() => received,
                    _ = tx.cancelled() => return,
                };
                match received {
                    Ok(event) => {
                        let event = event.event;
                        if event.stream != stream_name {
                            continue;
                        }
                        if let Some(n) = floor {
                            if event.revision <= n {
                                continue;
                            }
                        }
                        if !tx.send(Ok(event)).await {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        let _ = tx.send(Err(Error::SubscriptionLagged(missed))).await;
                        return;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Ok(sub)
    }

    async fn subscribe_to_all(
        &self,
        from_position: Option<ReadPosition>,
    ) -> Result<Subscription<StoreAllEvent>> {
        let (mut tx, sub) = subscription::channel(self.inner.config.channel_capacity);

        let mut live = self.inner.live.subscribe();

        let (history, boundary) = match from_position {
            None => {
                let state = self.lock();
                (Vec::new(), state.sequence)
            }
            Some(from) => {
                let state = self.lock();
                let history = all_window(&state.all, &from, ReadDirection::Forwards, None);
                (history, state.sequence)
            }
        };

        debug!(replay = history.len(), boundary, "global subscription attached");

        tokio::spawn(async move {
            for event in history {
                if !tx.send(Ok(event)).await {
                    return;
                }
            }
            let floor = Position::from_sequence(boundary);
            loop {
                let received = tokio::select! {
                    received = live.recv() => received,
                    _ = tx.cancelled() => return,
                };
                match received {
                    Ok(event) => {
                        if event.position <= floor {
                            continue;
                        }
                        if !tx.send(Ok(event)).await {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        let _ = tx.send(Err(Error::SubscriptionLagged(missed))).await;
                        return;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Ok(sub)
    }
}

// =============================================================================
// Tests
// =============================================================================
