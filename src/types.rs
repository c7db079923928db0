//! # Domain Types for Tidelog
//!
//! This module defines the core vocabulary used throughout Tidelog: events,
//! stored-event envelopes, revisions, positions, and the sentinel values the
//! store contract is written in terms of.
//!
//! ## The Two Axes
//!
//! Every stored event sits on two independent axes:
//!
//! - **Revision**: its zero-based sequence number *within its stream*.
//!   Revisions are gapless: a stream with N events holds revisions `0..=N-1`.
//! - **Position**: its place in the *global* log across all streams. Positions
//!   are opaque tokens that are totally ordered and strictly increasing, but
//!   not gapless (deletes leave holes, positions are never reused).
//!
//! ```text
//!                 global position axis ────────────────────────►
//!   stream "a":   [rev 0]      [rev 1]              [rev 2]
//!   stream "b":           [rev 0]       [rev 1]
//! ```
//!
//! ## Invariants
//!
//! - An [`Event`] is immutable once constructed; its `id` is assigned exactly
//!   once and never reassigned.
//! - [`StoreEvent::revision`] values form a contiguous range per stream,
//!   assigned at append time in append order.
//! - [`Position`] ordering is consistent with real append order; two events
//!   appended in the same batch get distinct, order-preserving positions.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// =============================================================================
// Events
// =============================================================================

/// An immutable domain event, before it has been appended anywhere.
///
/// This is the "input" form: what a writer hands to
/// [`append_to_stream`](crate::EventStore::append_to_stream). It carries no
/// stream, revision, or position; those are assigned at append time.
///
/// # Fields
///
/// - `id`: unique event identity, defaulting to a random UUID. The durable
///   backend enforces uniqueness: inserting the same id twice fails rather
///   than silently merging.
/// - `event_type`: classification string (e.g. `"OrderCreated"`).
/// - `data`: the payload as a structured JSON value.
/// - `metadata`: cross-cutting context (correlation ids, causation ids).
///   Defaults to an empty object.
///
/// # Example
///
/// ```rust
/// use tidelog::Event;
/// use serde_json::json;
///
/// let ev = Event::new("OrderCreated", json!({ "total": 42 }))
///     .with_metadata(json!({ "correlationId": "abc" }));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identity of this event, assigned once at creation.
    pub id: Uuid,

    /// The event type, for filtering and routing.
    #[serde(rename = "type")]
    pub event_type: String,

    /// The event payload.
    pub data: Value,

    /// Additional context that should not live in the domain payload.
    pub metadata: Value,
}

impl Event {
    /// Creates a new event with a random id and empty metadata.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            data,
            metadata: Value::Object(Map::new()),
        }
    }

    /// Replaces the generated id with an explicit one (builder pattern).
    ///
    /// Useful for deterministic tests and for idempotent re-publication,
    /// where the caller controls event identity.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Attaches metadata to this event (builder pattern).
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// An event as persisted in a stream: the stored-event envelope.
///
/// This is the "output" form produced by
/// [`read_stream`](crate::EventStore::read_stream) and stream-scoped
/// subscriptions. It wraps the original [`Event`] with the coordinates the
/// store assigned at append time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreEvent {
    /// The event as the writer supplied it.
    pub event: Event,

    /// The stream this event belongs to.
    pub stream: String,

    /// Zero-based revision of this event within its stream.
    pub revision: u64,

    /// When the append was executed (Unix milliseconds). All events of one
    /// batch share the same timestamp.
    pub timestamp: u64,
}

/// A stored event plus its place in the global log.
///
/// Produced by [`read_all`](crate::EventStore::read_all) and
/// [`subscribe_to_all`](crate::SubscribableEventStore::subscribe_to_all),
/// where events of many streams interleave and only [`Position`] gives a
/// total order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreAllEvent {
    /// The stored event.
    pub event: StoreEvent,

    /// Opaque cursor into the global log. See [`Position`].
    pub position: Position,
}

// =============================================================================
// Positions
// =============================================================================

/// An opaque, totally ordered cursor into the global event log.
///
/// # Opacity
///
/// Consumers must treat positions as uninterpreted tokens: compare them,
/// store them, hand them back to [`read_all`](crate::EventStore::read_all) or
/// [`subscribe_to_all`](crate::SubscribableEventStore::subscribe_to_all) to
/// resume. The internal encoding belongs to the backend and may change.
///
/// # Guarantees
///
/// - Total order, consistent with real append order.
/// - Strictly increasing; never reused, even after stream deletion.
/// - Durable backend: tokens remain valid resume cursors across process
///   restarts. In-memory backend: tokens are undefined across restarts (the
///   store itself does not survive one).
///
/// Positions serialize as plain strings, so they can be checkpointed anywhere
/// a string fits.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(String);

/// Width of the encoded token. Fixed-width encoding makes the derived
/// lexicographic `Ord` agree with numeric order.
const POSITION_WIDTH: usize = 20;

impl Position {
    /// Builds a position token from a backend sequence number.
    pub(crate) fn from_sequence(sequence: u64) -> Self {
        Self(format!("{:0width$}", sequence, width = POSITION_WIDTH))
    }

    /// Recovers the backend sequence number, if this token carries one.
    ///
    /// Foreign tokens (hand-crafted strings) decode to `None` and simply
    /// match nothing.
    pub(crate) fn sequence(&self) -> Option<u64> {
        self.0.parse().ok()
    }

    /// Returns the token as a string slice, for checkpointing.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Position {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for Position {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

// =============================================================================
// Revision Sentinels
// =============================================================================

/// The concurrency assertion a writer makes when appending.
///
/// # Optimistic Concurrency
///
/// Rather than locking a stream around a read-modify-write cycle, the writer
/// states what it believes the stream's current revision is. The store
/// verifies the claim at write time and fails with
/// [`RevisionMismatch`](crate::Error::RevisionMismatch) if another writer got
/// there first. The loser re-reads and retries; the store itself never
/// retries on the caller's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpectedRevision {
    /// No concurrency check: append after whatever is current.
    #[default]
    Any,

    /// Assert the stream has zero events (this append creates it).
    NoStream,

    /// Assert the stream's current revision is exactly this value.
    Exact(u64),
}

impl fmt::Display for ExpectedRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedRevision::Any => f.write_str("any"),
            ExpectedRevision::NoStream => f.write_str("no stream"),
            ExpectedRevision::Exact(revision) => write!(f, "{}", revision),
        }
    }
}

/// A stream's current revision: the revision of its last event, or
/// [`NoStream`](CurrentRevision::NoStream) when it has zero events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentRevision {
    /// The stream has no events (absent or deleted).
    NoStream,

    /// The revision of the stream's last event.
    Revision(u64),
}

impl CurrentRevision {
    /// The revision the next appended event will receive.
    pub fn next(&self) -> u64 {
        match self {
            CurrentRevision::NoStream => 0,
            CurrentRevision::Revision(revision) => revision + 1,
        }
    }

    /// Whether an append with `expected` may proceed against this state.
    pub fn satisfies(&self, expected: ExpectedRevision) -> bool {
        match expected {
            ExpectedRevision::Any => true,
            ExpectedRevision::NoStream => matches!(self, CurrentRevision::NoStream),
            ExpectedRevision::Exact(revision) => *self == CurrentRevision::Revision(revision),
        }
    }
}

impl From<Option<u64>> for CurrentRevision {
    fn from(revision: Option<u64>) -> Self {
        match revision {
            None => CurrentRevision::NoStream,
            Some(revision) => CurrentRevision::Revision(revision),
        }
    }
}

impl fmt::Display for CurrentRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurrentRevision::NoStream => f.write_str("none"),
            CurrentRevision::Revision(revision) => write!(f, "{}", revision),
        }
    }
}

// =============================================================================
// Read Cursors
// =============================================================================

/// Where a stream read starts. The cursor is *exclusive*: reading forwards
/// yields events strictly after it, reading backwards strictly before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadRevision {
    /// Before the first event. Forwards from here yields everything;
    /// backwards yields nothing.
    #[default]
    Start,

    /// After the last event. Backwards from here yields everything in
    /// reverse; forwards yields nothing.
    End,

    /// An explicit revision, excluded from the result.
    Revision(u64),
}

/// Where a global read starts. Same exclusivity rules as [`ReadRevision`],
/// on the position axis.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReadPosition {
    /// Before the first event in the global log.
    #[default]
    Start,

    /// After the last event in the global log.
    End,

    /// An explicit position, excluded from the result.
    Position(Position),
}

/// Direction of a bounded read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadDirection {
    #[default]
    Forwards,
    Backwards,
}

// =============================================================================
// Append Results
// =============================================================================

/// The outcome of a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendResult {
    /// The revision assigned to the last event of the batch: the stream's
    /// new current revision. Thread this into the next append's
    /// [`ExpectedRevision::Exact`] to chain writes without conflicts.
    pub revision: u64,
}

// =============================================================================
// Time
// =============================================================================

/// Current wall-clock time as Unix milliseconds.
///
/// Clock regressions are clamped to zero rather than panicking; timestamps
/// feed the subscription clock-skew heuristic, which tolerates slop by
/// design.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =============================================================================
// Tests
// =============================================================================
