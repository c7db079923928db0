//! # Error Handling for Tidelog
//!
//! A single error enum covers every failure mode of the store, so callers
//! can match uniformly and `?` propagates across backends.
//!
//! ## Taxonomy
//!
//! | Category   | Variant                         | Typical response            |
//! |------------|---------------------------------|-----------------------------|
//! | Conflict   | [`Error::RevisionMismatch`]     | Re-read, rebuild, retry     |
//! | Absent     | [`Error::StreamNotFound`]       | Treat as empty / create     |
//! | Overrun    | [`Error::SubscriptionLagged`]   | Resubscribe from checkpoint |
//! | Transport  | [`Error::Sqlite`], [`Error::Json`] | Log and investigate     |
//! | Lifecycle  | [`Error::Closed`]               | Stop, store is shut down    |
//!
//! Cancellation is deliberately absent from this list: cancelling a read or
//! subscription is a clean terminal state and ends the sequence without an
//! error item.
//!
//! The store never retries a conflicted write on the caller's behalf; retry
//! policy belongs to the command-handling layer above.

use thiserror::Error;

use crate::types::{CurrentRevision, ExpectedRevision};

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in Tidelog operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Optimistic-concurrency conflict: the stream's current revision does
    /// not match the writer's [`ExpectedRevision`].
    ///
    /// The failed batch is never partially persisted. Recovery is always
    /// possible: re-read the stream, recompute, retry with the fresh
    /// revision.
    #[error("revision mismatch on stream '{stream}': expected {expected}, found {actual}")]
    RevisionMismatch {
        /// The stream where the conflict occurred.
        stream: String,
        /// The revision the writer asserted.
        expected: ExpectedRevision,
        /// The revision the store actually observed.
        actual: CurrentRevision,
    },

    /// The stream has zero events.
    ///
    /// Raised only when the stream is truly absent (never written, or
    /// deleted). A present stream whose read window matches zero rows yields
    /// an empty sequence instead.
    #[error("stream '{stream}' not found")]
    StreamNotFound {
        /// The stream key that was requested.
        stream: String,
    },

    /// A live subscriber fell behind the in-memory broadcast buffer and
    /// missed this many events.
    ///
    /// The subscription cannot resume transparently: the consumer should
    /// resubscribe from its last processed revision or position.
    #[error("subscription lagged: {0} events were dropped")]
    SubscriptionLagged(u64),

    /// The append was called with an empty event batch.
    #[error("append requires at least one event")]
    EmptyAppend,

    /// The database on disk was written by an incompatible schema layout.
    #[error("schema version mismatch: database has {found}, this build expects {expected}")]
    SchemaVersion {
        /// Version recorded in the database.
        found: String,
        /// Version this build writes.
        expected: i64,
    },

    /// SQLite operation failed (durable backend only).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Event payload or metadata could not be encoded or decoded.
    #[error("payload codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored event id was not a valid UUID.
    #[error("invalid event id: {0}")]
    InvalidEventId(#[from] uuid::Error),

    /// An OS-level failure, e.g. spawning a worker thread.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The store has shut down; its worker threads no longer accept requests.
    #[error("store closed: {0}")]
    Closed(&'static str),
}

/// A `Result` alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================
