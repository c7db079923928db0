//! # SQLite Backend
//!
//! [`SqliteEventStore`] ties the durable pieces together: one writer thread
//! owning the write connection, a pool of reader threads behind a request
//! queue, and poll-based change feeds for live subscription delivery.
//!
//! ## Catch-Up Subscriptions
//!
//! A catch-up subscription runs a three-phase state machine:
//!
//! 1. **Historical**: page through the log strictly after the caller's
//!    cursor, up to the boundary (stream revision or global position)
//!    current at subscribe time.
//! 2. **Transition**: the feed's start is resolved *before* the boundary is
//!    read, so an append racing the subscribe lands either at or below the
//!    boundary (replayed) or above the feed watermark (fed live). For the
//!    global seam the feed opens at `max(lastEventTimestamp, floor) - skew`
//!    when the replay ended near the present; the overlap this creates is
//!    removed by event identity against the last replayed event, with the
//!    boundary position as a second guard.
//! 3. **Live**: tail the feed until the consumer cancels.
//!
//! The clock-skew window is a tunable policy heuristic
//! ([`SubscriptionConfig::clock_skew`]): it bounds how far apart the wall
//! clocks of out-of-process writers may drift before a freshly attached
//! global subscription could miss their events. Stream-scoped seams do not
//! depend on it; the exact `revision > boundary` filter does the
//! deduplication there.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, TryStreamExt};
use tracing::debug;

use crate::error::{Error, Result};
use crate::feed::Feed;
use crate::reader::{spawn_readers, ReadClient};
use crate::schema::Database;
use crate::store::{
    AllEventStream, EventStore, EventStream, ReadAllOptions, ReadStreamOptions,
    SubscribableEventStore,
};
use crate::subscription::{self, Subscription, SubscriptionConfig, SubscriptionSender};
use crate::types::{
    now_ms, AppendResult, CurrentRevision, Event, ExpectedRevision, ReadDirection, ReadPosition,
    ReadRevision, StoreAllEvent, StoreEvent,
};
use crate::writer::{spawn_writer, WriterHandle};

// =============================================================================
// Configuration
// =============================================================================

/// Construction options for [`SqliteEventStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Number of reader threads (each with its own read-only connection).
    pub reader_threads: usize,

    /// Subscription delivery tuning.
    pub subscription: SubscriptionConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            reader_threads: 2,
            subscription: SubscriptionConfig::default(),
        }
    }
}

// =============================================================================
// Store
// =============================================================================

/// A durable event store on a single SQLite database file.
///
/// Cloning is cheap; clones share the writer thread and reader pool.
/// Positions issued by this backend survive process restarts and remain
/// valid resume cursors.
#[derive(Clone)]
pub struct SqliteEventStore {
    writer: WriterHandle,
    reader: ReadClient,
    config: Arc<StoreConfig>,
}

impl SqliteEventStore {
    /// Opens (creating if needed) the store at `path` with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Opens the store with explicit options.
    pub fn open_with_config(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        let path = path.as_ref();
        let db = Database::open(path)?;
        let writer = spawn_writer(db.into_connection())?;
        let reader = spawn_readers(path.to_path_buf(), config.reader_threads)?;
        Ok(Self {
            writer,
            reader,
            config: Arc::new(config),
        })
    }

    /// Stops the writer thread after the requests already queued. Reads and
    /// subscriptions keep working until the store (and its clones) drop.
    pub async fn shutdown(&self) {
        self.writer.shutdown().await;
    }

    fn batch_size(&self) -> usize {
        self.config.subscription.batch_size.max(1)
    }
}

// =============================================================================
// Paged Reads
// =============================================================================

enum StreamCursor {
    Forwards(Option<u64>),
    Backwards(Option<u64>),
    /// Structurally empty window (e.g. forwards from `End`); only the
    /// not-found check remains.
    Empty,
}

struct StreamPager {
    client: ReadClient,
    stream: String,
    cursor: StreamCursor,
    remaining: Option<usize>,
    batch: usize,
    delivered: bool,
}

async fn next_stream_page(mut pager: StreamPager) -> Result<Option<(Vec<StoreEvent>, StreamPager)>> {
    let limit = match pager.remaining {
        Some(n) => n.min(pager.batch),
        None => pager.batch,
    };
    let page = if limit == 0 {
        Vec::new()
    } else {
        match &pager.cursor {
            StreamCursor::Empty => Vec::new(),
            StreamCursor::Forwards(after) => {
                pager
                    .client
                    .stream_forwards(pager.stream.clone(), *after, limit)
                    .await?
            }
            StreamCursor::Backwards(before) => {
                pager
                    .client
                    .stream_backwards(pager.stream.clone(), *before, limit)
                    .await?
            }
        }
    };
    if page.is_empty() {
        // Not-found is decided lazily, once the window is known to be empty.
        if !pager.delivered && !pager.client.stream_exists(pager.stream.clone()).await? {
            return Err(Error::StreamNotFound {
                stream: pager.stream,
            });
        }
        return Ok(None);
    }

    pager.delivered = true;
    if let Some(remaining) = &mut pager.remaining {
        *remaining -= page.len();
    }
    let last = page.last().map(|e| e.revision);
    match &mut pager.cursor {
        StreamCursor::Forwards(after) => *after = last,
        StreamCursor::Backwards(before) => *before = last,
        StreamCursor::Empty => {}
    }
    Ok(Some((page, pager)))
}

enum AllCursor {
    Forwards(Option<u64>),
    Backwards(Option<u64>),
    Empty,
}

struct AllPager {
    client: ReadClient,
    cursor: AllCursor,
    remaining: Option<usize>,
    batch: usize,
}

async fn next_all_page(mut pager: AllPager) -> Result<Option<(Vec<StoreAllEvent>, AllPager)>> {
    let limit = match pager.remaining {
        Some(n) => n.min(pager.batch),
        None => pager.batch,
    };
    let page = if limit == 0 {
        Vec::new()
    } else {
        match &pager.cursor {
            AllCursor::Empty => Vec::new(),
            AllCursor::Forwards(after) => pager.client.all_forwards(*after, None, limit).await?,
            AllCursor::Backwards(before) => pager.client.all_backwards(*before, limit).await?,
        }
    };
    if page.is_empty() {
        return Ok(None);
    }

    if let Some(remaining) = &mut pager.remaining {
        *remaining -= page.len();
    }
    let last = page.last().and_then(|e| e.position.sequence());
    match &mut pager.cursor {
        AllCursor::Forwards(after) => *after = last,
        AllCursor::Backwards(before) => *before = last,
        AllCursor::Empty => {}
    }
    Ok(Some((page, pager)))
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn append_to_stream(
        &self,
        stream: &str,
        events: Vec<Event>,
        expected: ExpectedRevision,
    ) -> Result<AppendResult> {
        self.writer.append(stream.to_string(), events, expected).await
    }

    fn read_stream(&self, stream: &str, options: ReadStreamOptions) -> EventStream {
        let cursor = match options.direction {
            ReadDirection::Forwards => match options.from_revision {
                ReadRevision::Start => StreamCursor::Forwards(None),
                ReadRevision::End => StreamCursor::Empty,
                ReadRevision::Revision(n) => StreamCursor::Forwards(Some(n)),
            },
            ReadDirection::Backwards => match options.from_revision {
                ReadRevision::End => StreamCursor::Backwards(None),
                ReadRevision::Start => StreamCursor::Empty,
                ReadRevision::Revision(n) => StreamCursor::Backwards(Some(n)),
            },
        };
        let pager = StreamPager {
            client: self.reader.clone(),
            stream: stream.to_string(),
            cursor,
            remaining: options.max_count,
            batch: self.batch_size(),
            delivered: false,
        };
        Box::pin(
            stream::try_unfold(pager, next_stream_page)
                .map_ok(|page| stream::iter(page.into_iter().map(Ok)))
                .try_flatten(),
        )
    }

    fn read_all(&self, options: ReadAllOptions) -> AllEventStream {
        // A token this store never issued decodes to no sequence and matches
        // nothing.
        let cursor = match options.direction {
            ReadDirection::Forwards => match &options.from_position {
                ReadPosition::Start => AllCursor::Forwards(None),
                ReadPosition::End => AllCursor::Empty,
                ReadPosition::Position(p) => match p.sequence() {
                    Some(sequence) => AllCursor::Forwards(Some(sequence)),
                    None => AllCursor::Empty,
                },
            },
            ReadDirection::Backwards => match &options.from_position {
                ReadPosition::End => AllCursor::Backwards(None),
                ReadPosition::Start => AllCursor::Empty,
                ReadPosition::Position(p) => match p.sequence() {
                    Some(sequence) => AllCursor::Backwards(Some(sequence)),
                    None => AllCursor::Empty,
                },
            },
        };
        let pager = AllPager {
            client: self.reader.clone(),
            cursor,
            remaining: options.max_count,
            batch: self.batch_size(),
        };
        Box::pin(
            stream::try_unfold(pager, next_all_page)
                .map_ok(|page| stream::iter(page.into_iter().map(Ok)))
                .try_flatten(),
        )
    }

    async fn delete_stream(&self, stream: &str) -> Result<()> {
        self.writer.delete(stream.to_string()).await
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

/// Drives a feed until cancellation, handing each page to `deliver`.
/// `deliver` returns `false` when the consumer is gone.
async fn run_live<T, F>(mut feed: Feed, tx: &mut SubscriptionSender<T>, mut deliver: F)
where
    F: FnMut(Vec<StoreAllEvent>) -> Vec<Result<T>>,
{
    loop {
        let page = tokio::select! {
            page = feed.next_page() => page,
            _ = tx.cancelled() => return,
        };
        let page = match page {
            Ok(page) => page,
            Err(err) => {
                let _ = tx.send(Err(err)).await;
                return;
            }
        };
        for item in deliver(page) {
            if !tx.send(item).await {
                return;
            }
        }
    }
}

#[async_trait]
impl SubscribableEventStore for SqliteEventStore {
    async fn subscribe(
        &self,
        stream: &str,
        from_revision: Option<ReadRevision>,
    ) -> Result<Subscription<StoreEvent>> {
        let config = self.config.subscription.clone();
        let (mut tx, sub) = subscription::channel(config.channel_capacity);
        let client = self.reader.clone();
        let stream_name = stream.to_string();

        let skew_ms = config.clock_skew.as_millis() as u64;
        // Feed watermark before boundary revision: an append racing this
        // subscribe lands at or below the boundary (replayed) or above the
        // watermark (fed live).
        let feed = Feed::from_timestamp(
            client.clone(),
            now_ms().saturating_sub(skew_ms),
            &config,
        )
        .await?;
        let boundary = client.current_revision(stream_name.clone()).await?;
        let floor = match boundary {
            CurrentRevision::NoStream => None,
            CurrentRevision::Revision(n) => Some(n),
        };

        // `End` replays nothing, same as a live-only subscribe.
        let replay_after = match from_revision {
            None | Some(ReadRevision::End) => None,
            Some(ReadRevision::Start) => Some(None),
            Some(ReadRevision::Revision(n)) => Some(Some(n)),
        };

        debug!(stream = %stream_name, %boundary, catch_up = replay_after.is_some(), "stream subscription attached");

        let batch = self.batch_size();
        tokio::spawn(async move {
            if let (Some(mut after), Some(boundary)) = (replay_after, floor) {
                'replay: loop {
                    if tx.is_cancelled() {
                        return;
                    }
                    let page = match client
                        .stream_forwards(stream_name.clone(), after, batch)
                        .await
                    {
                        Ok(page) => page,
                        Err(err) => {
                            let _ = tx.send(Err(err)).await;
                            return;
                        }
                    };
                    if page.is_empty() {
                        break;
                    }
                    for event in page {
                        // Appends racing the replay are above the boundary;
                        // they arrive through the feed.
                        if event.revision > boundary {
                            break 'replay;
                        }
                        after = Some(event.revision);
                        if !tx.send(Ok(event)).await {
                            return;
                        }
                    }
                }
            }

            run_live(feed, &mut tx, |page| {
                page.into_iter()
                    .map(|e| e.event)
                    .filter(|e| e.stream == stream_name)
                    .filter(|e| match floor {
                        None => true,
                        Some(boundary) => e.revision > boundary,
                    })
                    .map(Ok)
                    .collect()
            })
            .await;
        });

        Ok(sub)
    }

    async fn subscribe_to_all(
        &self,
        from_position: Option<ReadPosition>,
    ) -> Result<Subscription<StoreAllEvent>> {
        let config = self.config.subscription.clone();
        let (mut tx, sub) = subscription::channel(config.channel_capacity);
        let client = self.reader.clone();
        let batch = self.batch_size();

        let t0 = now_ms();
        let skew_ms = config.clock_skew.as_millis() as u64;
        let floor_ts = config.subscribe_floor_ms;

        // `End` and unrecognized tokens replay nothing, same as live-only.
        let replay_after = match from_position {
            None | Some(ReadPosition::End) => None,
            Some(ReadPosition::Start) => Some(0),
            Some(ReadPosition::Position(p)) => p.sequence(),
        };

        let Some(after) = replay_after else {
            // Live-only: exact positional attach, no clock involvement.
            let head = client
                .last_event()
                .await?
                .and_then(|e| e.position.sequence())
                .unwrap_or(0);
            let feed = Feed::after_position(client, head, &config);
            debug!(head, "global subscription attached live");
            tokio::spawn(async move {
                run_live(feed, &mut tx, |page| page.into_iter().map(Ok).collect()).await;
            });
            return Ok(sub);
        };

        let Some(last) = client.last_event().await? else {
            // Empty log: nothing to replay, go live from now (minus skew;
            // the log being empty, the overlap can produce no duplicates).
            let feed = Feed::from_timestamp(
                client,
                t0.max(floor_ts).saturating_sub(skew_ms),
                &config,
            )
            .await?;
            debug!("global subscription attached on empty log");
            tokio::spawn(async move {
                run_live(feed, &mut tx, |page| page.into_iter().map(Ok).collect()).await;
            });
            return Ok(sub);
        };

        // Boundary of the historical phase: the store head at subscribe
        // time. Replay stops here; the feed takes over.
        let boundary = last.position.sequence().unwrap_or(0);
        let last_id = last.event.event.id;
        let recent = last.event.timestamp.saturating_add(skew_ms) > t0;
        let feed_ts = if recent {
            last.event.timestamp.max(floor_ts).saturating_sub(skew_ms)
        } else {
            t0.max(floor_ts).saturating_sub(skew_ms)
        };
        let feed = Feed::from_timestamp(client.clone(), feed_ts, &config).await?;

        debug!(after, boundary, recent, "global subscription catching up");

        tokio::spawn(async move {
            let mut cursor = after;
            while cursor < boundary {
                if tx.is_cancelled() {
                    return;
                }
                let page = match client
                    .all_forwards(Some(cursor), Some(boundary), batch)
                    .await
                {
                    Ok(page) => page,
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                };
                if page.is_empty() {
                    break;
                }
                for event in page {
                    cursor = event.position.sequence().unwrap_or(cursor);
                    if !tx.send(Ok(event)).await {
                        return;
                    }
                }
            }

            // Seam: when the replay ended near the present the feed starts
            // inside the skew window and overlaps it. Skip until the last
            // replayed event is seen, identified by id; the boundary
            // position is the guard for a feed that starts past it.
            let mut live = !recent;
            run_live(feed, &mut tx, move |page| {
                let mut out = Vec::new();
                for event in page {
                    let sequence = event.position.sequence().unwrap_or(u64::MAX);
                    if !live {
                        if event.event.event.id == last_id {
                            live = true;
                            continue;
                        }
                        if sequence <= boundary {
                            continue;
                        }
                        live = true;
                    }
                    if sequence <= boundary {
                        continue;
                    }
                    out.push(Ok(event));
                }
                out
            })
            .await;
        });

        Ok(sub)
    }
}

// =============================================================================
// Tests
// =============================================================================
