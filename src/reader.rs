//! # Read Path
//!
//! Two layers. The bottom layer is plain functions over a `&Connection`:
//! paged stream and global reads, revision and existence lookups, feed
//! positioning. The writer thread reuses [`current_revision`] inside its
//! transaction, so the check and the reads share one definition.
//!
//! The top layer is a small pool of reader threads, each owning a read-only
//! connection, pulling requests from a shared queue and answering on
//! oneshots. WAL mode lets all of them run concurrently with the writer.
//! [`ReadClient`] is the async-side handle.
//!
//! All paging here is in raw sequence numbers (`u64` rowids); translating
//! opaque [`Position`](crate::Position) tokens to sequences happens in the
//! backend facade.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::schema::Database;
use crate::types::{CurrentRevision, Event, Position, StoreAllEvent, StoreEvent};

const SELECT_COLUMNS: &str =
    "event_id, event_type, data, metadata, stream, revision, timestamp_ms, position";

// =============================================================================
// Row Decoding
// =============================================================================

/// Raw column values, decoded inside the rusqlite row closure where only
/// `rusqlite::Error` may escape. JSON and UUID parsing happen afterwards.
struct RawRow {
    event_id: String,
    event_type: String,
    data: String,
    metadata: String,
    stream: String,
    revision: i64,
    timestamp_ms: i64,
    position: i64,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            event_id: row.get(0)?,
            event_type: row.get(1)?,
            data: row.get(2)?,
            metadata: row.get(3)?,
            stream: row.get(4)?,
            revision: row.get(5)?,
            timestamp_ms: row.get(6)?,
            position: row.get(7)?,
        })
    }

    fn decode(self) -> Result<StoreAllEvent> {
        Ok(StoreAllEvent {
            event: StoreEvent {
                event: Event {
                    id: Uuid::parse_str(&self.event_id)?,
                    event_type: self.event_type,
                    data: serde_json::from_str(&self.data)?,
                    metadata: serde_json::from_str(&self.metadata)?,
                },
                stream: self.stream,
                revision: self.revision as u64,
                timestamp: self.timestamp_ms as u64,
            },
            position: Position::from_sequence(self.position as u64),
        })
    }
}

fn collect_rows(rows: Vec<RawRow>) -> Result<Vec<StoreAllEvent>> {
    rows.into_iter().map(RawRow::decode).collect()
}

// =============================================================================
// Queries
// =============================================================================

/// The stream's current revision, or `NoStream` when it has zero events.
pub(crate) fn current_revision(conn: &Connection, stream: &str) -> Result<CurrentRevision> {
    let last: Option<i64> = conn
        .query_row(
            "SELECT revision FROM events WHERE stream = ?1 ORDER BY revision DESC LIMIT 1",
            [stream],
            |row| row.get(0),
        )
        .optional()?;
    Ok(last.map(|n| n as u64).into())
}

pub(crate) fn stream_exists(conn: &Connection, stream: &str) -> Result<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM events WHERE stream = ?1)",
        [stream],
        |row| row.get(0),
    )?;
    Ok(exists != 0)
}

/// One page of a stream, ascending, strictly after `after` (None = from the
/// first event).
pub(crate) fn stream_forwards(
    conn: &Connection,
    stream: &str,
    after: Option<u64>,
    limit: usize,
) -> Result<Vec<StoreEvent>> {
    let floor = after.map(|n| n as i64).unwrap_or(-1);
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {SELECT_COLUMNS} FROM events
         WHERE stream = ?1 AND revision > ?2
         ORDER BY revision ASC LIMIT ?3"
    ))?;
    let rows = stmt
        .query_map(params![stream, floor, limit as i64], RawRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(collect_rows(rows)?.into_iter().map(|e| e.event).collect())
}

/// One page of a stream, descending, strictly before `before` (None = from
/// the last event).
pub(crate) fn stream_backwards(
    conn: &Connection,
    stream: &str,
    before: Option<u64>,
    limit: usize,
) -> Result<Vec<StoreEvent>> {
    let ceiling = before.map(|n| n as i64).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {SELECT_COLUMNS} FROM events
         WHERE stream = ?1 AND revision < ?2
         ORDER BY revision DESC LIMIT ?3"
    ))?;
    let rows = stmt
        .query_map(params![stream, ceiling, limit as i64], RawRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(collect_rows(rows)?.into_iter().map(|e| e.event).collect())
}

/// One page of the global log, ascending, strictly after `after` and (when
/// given) at or below `up_to`. The upper bound serves catch-up replay, which
/// must stop exactly at the boundary recorded at subscribe time.
pub(crate) fn all_forwards(
    conn: &Connection,
    after: Option<u64>,
    up_to: Option<u64>,
    limit: usize,
) -> Result<Vec<StoreAllEvent>> {
    let floor = after.map(|n| n as i64).unwrap_or(0);
    let ceiling = up_to.map(|n| n as i64).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {SELECT_COLUMNS} FROM events
         WHERE position > ?1 AND position <= ?2
         ORDER BY position ASC LIMIT ?3"
    ))?;
    let rows = stmt
        .query_map(params![floor, ceiling, limit as i64], RawRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    collect_rows(rows)
}

/// One page of the global log, descending, strictly before `before`.
pub(crate) fn all_backwards(
    conn: &Connection,
    before: Option<u64>,
    limit: usize,
) -> Result<Vec<StoreAllEvent>> {
    let ceiling = before.map(|n| n as i64).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {SELECT_COLUMNS} FROM events
         WHERE position < ?1
         ORDER BY position DESC LIMIT ?2"
    ))?;
    let rows = stmt
        .query_map(params![ceiling, limit as i64], RawRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    collect_rows(rows)
}

/// The most recent event in the whole store, if any.
pub(crate) fn last_event(conn: &Connection) -> Result<Option<StoreAllEvent>> {
    let row = conn
        .query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM events ORDER BY position DESC LIMIT 1"),
            [],
            RawRow::from_row,
        )
        .optional()?;
    row.map(RawRow::decode).transpose()
}

/// Resolves a wall-clock instant to a position watermark for the live feed:
/// the first position whose timestamp is at or after `timestamp_ms`, or one
/// past the end of the log when no stored event qualifies. Events appended
/// later always land above the watermark regardless of their timestamps.
pub(crate) fn feed_start(conn: &Connection, timestamp_ms: u64) -> Result<u64> {
    let watermark: i64 = conn.query_row(
        "SELECT COALESCE(
             (SELECT MIN(position) FROM events WHERE timestamp_ms >= ?1),
             (SELECT COALESCE(MAX(position), 0) + 1 FROM events))",
        [timestamp_ms as i64],
        |row| row.get(0),
    )?;
    Ok(watermark as u64)
}

// =============================================================================
// Reader Pool
// =============================================================================

enum ReadRequest {
    CurrentRevision {
        stream: String,
        response: oneshot::Sender<Result<CurrentRevision>>,
    },
    StreamExists {
        stream: String,
        response: oneshot::Sender<Result<bool>>,
    },
    StreamForwards {
        stream: String,
        after: Option<u64>,
        limit: usize,
        response: oneshot::Sender<Result<Vec<StoreEvent>>>,
    },
    StreamBackwards {
        stream: String,
        before: Option<u64>,
        limit: usize,
        response: oneshot::Sender<Result<Vec<StoreEvent>>>,
    },
    AllForwards {
        after: Option<u64>,
        up_to: Option<u64>,
        limit: usize,
        response: oneshot::Sender<Result<Vec<StoreAllEvent>>>,
    },
    AllBackwards {
        before: Option<u64>,
        limit: usize,
        response: oneshot::Sender<Result<Vec<StoreAllEvent>>>,
    },
    LastEvent {
        response: oneshot::Sender<Result<Option<StoreAllEvent>>>,
    },
    FeedStart {
        timestamp_ms: u64,
        response: oneshot::Sender<Result<u64>>,
    },
}

fn handle_request(conn: &Connection, request: ReadRequest) {
    match request {
        ReadRequest::CurrentRevision { stream, response } => {
            let _ = response.send(current_revision(conn, &stream));
        }
        ReadRequest::StreamExists { stream, response } => {
            let _ = response.send(stream_exists(conn, &stream));
        }
        ReadRequest::StreamForwards {
            stream,
            after,
            limit,
            response,
        } => {
            let _ = response.send(stream_forwards(conn, &stream, after, limit));
        }
        ReadRequest::StreamBackwards {
            stream,
            before,
            limit,
            response,
        } => {
            let _ = response.send(stream_backwards(conn, &stream, before, limit));
        }
        ReadRequest::AllForwards {
            after,
            up_to,
            limit,
            response,
        } => {
            let _ = response.send(all_forwards(conn, after, up_to, limit));
        }
        ReadRequest::AllBackwards {
            before,
            limit,
            response,
        } => {
            let _ = response.send(all_backwards(conn, before, limit));
        }
        ReadRequest::LastEvent { response } => {
            let _ = response.send(last_event(conn));
        }
        ReadRequest::FeedStart {
            timestamp_ms,
            response,
        } => {
            let _ = response.send(feed_start(conn, timestamp_ms));
        }
    }
}

/// Async-side handle to the reader pool. Cloneable; all clones feed the same
/// queue.
#[derive(Clone)]
pub(crate) struct ReadClient {
    tx: mpsc::Sender<ReadRequest>,
}

macro_rules! dispatch {
    ($self:expr, $variant:ident { $($field:ident: $value:expr),* $(,)? }) => {{
        let (response, rx) = oneshot::channel();
        $self
            .tx
            .send(ReadRequest::$variant { $($field: $value,)* response })
            .await
            .map_err(|_| Error::Closed("reader pool has shut down"))?;
        rx.await
            .map_err(|_| Error::Closed("reader pool dropped the request"))?
    }};
}

impl ReadClient {
    pub(crate) async fn current_revision(&self, stream: String) -> Result<CurrentRevision> {
        dispatch!(self, CurrentRevision { stream: stream })
    }

    pub(crate) async fn stream_exists(&self, stream: String) -> Result<bool> {
        dispatch!(self, StreamExists { stream: stream })
    }

    pub(crate) async fn stream_forwards(
        &self,
        stream: String,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<StoreEvent>> {
        dispatch!(self, StreamForwards { stream: stream, after: after, limit: limit })
    }

    pub(crate) async fn stream_backwards(
        &self,
        stream: String,
        before: Option<u64>,
        limit: usize,
    ) -> Result<Vec<StoreEvent>> {
        dispatch!(self, StreamBackwards { stream: stream, before: before, limit: limit })
    }

    pub(crate) async fn all_forwards(
        &self,
        after: Option<u64>,
        up_to: Option<u64>,
        limit: usize,
    ) -> Result<Vec<StoreAllEvent>> {
        dispatch!(self, AllForwards { after: after, up_to: up_to, limit: limit })
    }

    pub(crate) async fn all_backwards(
        &self,
        before: Option<u64>,
        limit: usize,
    ) -> Result<Vec<StoreAllEvent>> {
        dispatch!(self, AllBackwards { before: before, limit: limit })
    }

    pub(crate) async fn last_event(&self) -> Result<Option<StoreAllEvent>> {
        dispatch!(self, LastEvent {})
    }

    pub(crate) async fn feed_start(&self, timestamp_ms: u64) -> Result<u64> {
        dispatch!(self, FeedStart { timestamp_ms: timestamp_ms })
    }
}

/// Spawns `threads` reader threads over read-only connections to `path`.
///
/// The threads share one request queue behind a mutex; a thread holds the
/// lock only while waiting for the next request, so queries themselves run
/// in parallel. The pool winds down when every [`ReadClient`] clone is
/// dropped.
pub(crate) fn spawn_readers(path: PathBuf, threads: usize) -> Result<ReadClient> {
    let (tx, rx) = mpsc::channel::<ReadRequest>(256);
    let rx = Arc::new(Mutex::new(rx));

    for index in 0..threads.max(1) {
        let conn = Database::open_read_only(&path)?;
        let rx = Arc::clone(&rx);
        let spawned = std::thread::Builder::new()
            .name(format!("tidelog-reader-{index}"))
            .spawn(move || loop {
                let request = {
                    let mut rx = match rx.lock() {
                        Ok(rx) => rx,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    rx.blocking_recv()
                };
                match request {
                    Some(request) => handle_request(&conn, request),
                    None => break,
                }
            });
        if let Err(err) = spawned {
            warn!(%err, "failed to spawn reader thread");
            return Err(err.into());
        }
    }
    debug!(threads = threads.max(1), "reader pool started");

    Ok(ReadClient { tx })
}

// =============================================================================
// Tests
// =============================================================================
