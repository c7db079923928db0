//! # The Store Contract
//!
//! Backend-agnostic traits every event store implements. Application code is
//! written against [`EventStore`] and [`SubscribableEventStore`]; which
//! backend sits behind them is a wiring decision.
//!
//! ## Reads Are Streams
//!
//! `read_stream` and `read_all` return boxed [`futures::Stream`]s rather than
//! collected vectors. The sequence is lazy and pull-based: a consumer that
//! stops polling stops the work, and a bounded read over a large log never
//! materializes more than one page at a time. Errors travel as items, so a
//! mid-read transport failure surfaces instead of silently truncating.
//!
//! ## Trait Split
//!
//! [`SubscribableEventStore`] extends [`EventStore`] rather than merging into
//! it: a projection host needs subscriptions, a command handler only needs
//! append and read. Accepting the narrower trait keeps that distinction
//! visible in signatures.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::subscription::Subscription;
use crate::types::{
    AppendResult, Event, ExpectedRevision, ReadDirection, ReadPosition, ReadRevision, StoreAllEvent,
    StoreEvent,
};

/// A lazy, finite sequence of stream-scoped events.
pub type EventStream = BoxStream<'static, Result<StoreEvent>>;

/// A lazy, finite sequence of globally positioned events.
pub type AllEventStream = BoxStream<'static, Result<StoreAllEvent>>;

// =============================================================================
// Read Options
// =============================================================================

/// Options for [`EventStore::read_stream`].
///
/// The default reads the whole stream forwards:
///
/// ```rust
/// use tidelog::ReadStreamOptions;
///
/// let opts = ReadStreamOptions::default();
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReadStreamOptions {
    /// Exclusive starting cursor on the revision axis.
    pub from_revision: ReadRevision,

    /// Read direction. Backwards yields events in descending revision order.
    pub direction: ReadDirection,

    /// Maximum number of events to yield. `None` reads to the boundary.
    pub max_count: Option<usize>,
}

impl ReadStreamOptions {
    /// Starts the read strictly after (or before, backwards) this cursor.
    pub fn from_revision(mut self, from: ReadRevision) -> Self {
        self.from_revision = from;
        self
    }

    /// Sets the read direction.
    pub fn direction(mut self, direction: ReadDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Caps the number of yielded events.
    pub fn max_count(mut self, max: usize) -> Self {
        self.max_count = Some(max);
        self
    }
}

/// Options for [`EventStore::read_all`]. Same shape as [`ReadStreamOptions`],
/// on the position axis.
#[derive(Debug, Clone, Default)]
pub struct ReadAllOptions {
    /// Exclusive starting cursor on the position axis.
    pub from_position: ReadPosition,

    /// Read direction. Backwards yields events in descending position order.
    pub direction: ReadDirection,

    /// Maximum number of events to yield. `None` reads to the boundary.
    pub max_count: Option<usize>,
}

impl ReadAllOptions {
    /// Starts the read strictly after (or before, backwards) this cursor.
    pub fn from_position(mut self, from: ReadPosition) -> Self {
        self.from_position = from;
        self
    }

    /// Sets the read direction.
    pub fn direction(mut self, direction: ReadDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Caps the number of yielded events.
    pub fn max_count(mut self, max: usize) -> Self {
        self.max_count = Some(max);
        self
    }
}

// =============================================================================
// Store Traits
// =============================================================================

/// The core event-store contract: append, read, delete.
///
/// # Semantics
///
/// - **Append** is all-or-nothing per batch and serialized per stream; the
///   [`ExpectedRevision`] assertion is checked atomically with the write.
/// - **Read cursors are exclusive** in both directions: `Forwards` from
///   `Start` yields everything, from `End` nothing; `Backwards` from `End`
///   yields everything reversed, from `Start` nothing.
/// - **`StreamNotFound`** is raised only for a stream with zero events, and
///   only once the filtered result would otherwise be empty. A present stream
///   whose window matches nothing yields an empty sequence.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a non-empty batch of events to `stream`, subject to the
    /// optimistic-concurrency assertion `expected`.
    ///
    /// On success the events receive consecutive revisions continuing the
    /// stream, a shared batch timestamp, and distinct increasing global
    /// positions; live subscribers observe them in append order. The returned
    /// [`AppendResult`] carries the stream's new current revision.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyAppend`](crate::Error::EmptyAppend) when `events` is
    ///   empty.
    /// - [`Error::RevisionMismatch`](crate::Error::RevisionMismatch) when
    ///   `expected` does not hold; nothing is persisted.
    async fn append_to_stream(
        &self,
        stream: &str,
        events: Vec<Event>,
        expected: ExpectedRevision,
    ) -> Result<AppendResult>;

    /// Reads a window of one stream as a lazy sequence.
    ///
    /// See the trait-level notes for cursor and not-found semantics.
    fn read_stream(&self, stream: &str, options: ReadStreamOptions) -> EventStream;

    /// Reads a window of the global log, interleaving all streams in
    /// position order. Never raises `StreamNotFound`; an empty store yields
    /// an empty sequence.
    fn read_all(&self, options: ReadAllOptions) -> AllEventStream;

    /// Removes every event of `stream`. Idempotent: deleting an absent
    /// stream succeeds silently. Afterwards the stream is indistinguishable
    /// from one that never existed, but its positions are never reused.
    async fn delete_stream(&self, stream: &str) -> Result<()>;
}

/// An [`EventStore`] that can also push events to consumers as they are
/// appended.
#[async_trait]
pub trait SubscribableEventStore: EventStore {
    /// Subscribes to one stream.
    ///
    /// With `from_revision = None` the subscription is live-only: it delivers
    /// events appended after the call, nothing historical. With a cursor it
    /// is a catch-up subscription: replay strictly after the cursor up to the
    /// revision current at subscribe time, then switch to live delivery with
    /// no gap and no duplicate.
    ///
    /// Subscribing to an absent stream does not error; the historical phase
    /// is empty and the subscription waits for the stream's first event.
    async fn subscribe(
        &self,
        stream: &str,
        from_revision: Option<ReadRevision>,
    ) -> Result<Subscription<StoreEvent>>;

    /// Subscribes to the global log across all streams, with the same
    /// live-only / catch-up split on the position axis. The positions carried
    /// by delivered events are valid cursors for resuming after a restart
    /// (durable backend).
    async fn subscribe_to_all(
        &self,
        from_position: Option<ReadPosition>,
    ) -> Result<Subscription<StoreAllEvent>>;
}
