//! # Writer Thread
//!
//! SQLite allows one writer at a time, so the durable backend funnels every
//! mutation through a single dedicated OS thread that owns the write
//! connection. Async callers talk to it over a bounded channel and get their
//! result back on a oneshot; the thread itself never touches the async
//! runtime.
//!
//! ## Conflict Detection, Twice
//!
//! The expected-revision check runs inside an IMMEDIATE transaction, which
//! takes the database write lock up front. Within one process that check is
//! authoritative: requests are serialized by the channel anyway. When a
//! *second process* writes the same database file, the `(stream, revision)`
//! unique index is the backstop: the losing insert fails with a constraint
//! violation, which this module translates into the same
//! [`RevisionMismatch`](Error::RevisionMismatch) the up-front check would
//! have produced, carrying the revision observed before the write.

use rusqlite::{params, Connection, ErrorCode, TransactionBehavior};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace};

use crate::error::{Error, Result};
use crate::reader;
use crate::types::{now_ms, AppendResult, Event, ExpectedRevision};

const REQUEST_QUEUE_DEPTH: usize = 256;

// =============================================================================
// Requests
// =============================================================================

enum WriteRequest {
    Append {
        stream: String,
        events: Vec<Event>,
        expected: ExpectedRevision,
        response: oneshot::Sender<Result<AppendResult>>,
    },
    Delete {
        stream: String,
        response: oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

// =============================================================================
// Handle
// =============================================================================

/// Async-side handle to the writer thread. Cloneable; all clones feed the
/// same queue.
#[derive(Clone)]
pub(crate) struct WriterHandle {
    tx: mpsc::Sender<WriteRequest>,
}

impl WriterHandle {
    pub(crate) async fn append(
        &self,
        stream: String,
        events: Vec<Event>,
        expected: ExpectedRevision,
    ) -> Result<AppendResult> {
        let (response, rx) = oneshot::channel();
        self.tx
            .send(WriteRequest::Append {
                stream,
                events,
                expected,
                response,
            })
            .await
            .map_err(|_| Error::Closed("writer thread has shut down"))?;
        rx.await
            .map_err(|_| Error::Closed("writer thread dropped the request"))?
    }

    pub(crate) async fn delete(&self, stream: String) -> Result<()> {
        let (response, rx) = oneshot::channel();
        self.tx
            .send(WriteRequest::Delete { stream, response })
            .await
            .map_err(|_| Error::Closed("writer thread has shut down"))?;
        rx.await
            .map_err(|_| Error::Closed("writer thread dropped the request"))?
    }

    /// Asks the thread to exit after the requests already queued. Requests
    /// sent afterwards fail with [`Error::Closed`].
    pub(crate) async fn shutdown(&self) {
        let _ = self.tx.send(WriteRequest::Shutdown).await;
    }
}

/// Spawns the writer thread over an initialized write connection.
pub(crate) fn spawn_writer(mut conn: Connection) -> std::io::Result<WriterHandle> {
    let (tx, mut rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);

    std::thread::Builder::new()
        .name("tidelog-writer".to_string())
        .spawn(move || {
            while let Some(request) = rx.blocking_recv() {
                match request {
                    WriteRequest::Append {
                        stream,
                        events,
                        expected,
                        response,
                    } => {
                        let result = execute_append(&mut conn, &stream, &events, expected);
                        let _ = response.send(result);
                    }
                    WriteRequest::Delete { stream, response } => {
                        let _ = response.send(execute_delete(&conn, &stream));
                    }
                    WriteRequest::Shutdown => break,
                }
            }
            debug!("writer thread exiting");
        })?;

    Ok(WriterHandle { tx })
}

// =============================================================================
// Execution
// =============================================================================

fn execute_append(
    conn: &mut Connection,
    stream: &str,
    events: &[Event],
    expected: ExpectedRevision,
) -> Result<AppendResult> {
    if events.is_empty() {
        return Err(Error::EmptyAppend);
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let current = reader::current_revision(&tx, stream)?;
    if !current.satisfies(expected) {
        debug!(stream, %expected, %current, "append rejected");
        // Dropping the transaction rolls it back.
        return Err(Error::RevisionMismatch {
            stream: stream.to_string(),
            expected,
            actual: current,
        });
    }

    let timestamp = now_ms();
    let mut revision = current.next();
    {
        let mut insert = tx.prepare_cached(
            "INSERT INTO events (event_id, event_type, data, metadata, stream, revision, timestamp_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for event in events {
            let data = serde_json::to_string(&event.data)?;
            let metadata = serde_json::to_string(&event.metadata)?;
            let inserted = insert.execute(params![
                event.id.to_string(),
                event.event_type,
                data,
                metadata,
                stream,
                revision as i64,
                timestamp as i64,
            ]);
            match inserted {
                Ok(_) => revision += 1,
                // An out-of-process writer won the race after our check; the
                // unique index caught it. Report the revision we observed
                // before the write, as the up-front check would have.
                Err(err) if is_constraint_violation(&err) => {
                    debug!(stream, %expected, %current, "append lost cross-process race");
                    return Err(Error::RevisionMismatch {
                        stream: stream.to_string(),
                        expected,
                        actual: current,
                    });
                }
                Err(err) => {
                    error!(stream, %err, "append insert failed");
                    return Err(err.into());
                }
            }
        }
    }
    tx.commit()?;

    let result = AppendResult {
        revision: revision - 1,
    };
    trace!(stream, count = events.len(), revision = result.revision, "append committed");
    Ok(result)
}

fn execute_delete(conn: &Connection, stream: &str) -> Result<()> {
    let removed = conn.execute("DELETE FROM events WHERE stream = ?1", [stream])?;
    if removed > 0 {
        debug!(stream, removed, "stream deleted");
    }
    Ok(())
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

// =============================================================================
// Tests
// =============================================================================
