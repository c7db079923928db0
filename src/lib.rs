//! # Tidelog
//!
//! An event store with optimistic concurrency and catch-up subscriptions:
//! append-only, per-stream logs of immutable events, globally ordered across
//! streams, behind one contract and two backends.
//!
//! ## The Contract
//!
//! - [`EventStore`]: append with an [`ExpectedRevision`] assertion, read one
//!   stream or the whole log as lazy [`futures::Stream`]s, delete streams.
//! - [`SubscribableEventStore`]: live and catch-up subscriptions, per stream
//!   or across the global log, with no gap and no duplicate at the seam
//!   between historical replay and live delivery.
//!
//! ## The Backends
//!
//! - [`MemoryEventStore`]: everything in process memory. For tests and
//!   prototypes; honors the full contract.
//! - [`SqliteEventStore`]: durable single-file storage. One writer thread, a
//!   reader pool over read-only WAL connections, and a polling change feed
//!   for live delivery. Positions survive restarts and resume subscriptions.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tidelog::{Event, EventStore, ExpectedRevision, ReadStreamOptions, SqliteEventStore};
//! use futures::TryStreamExt;
//! use serde_json::json;
//!
//! # async fn demo() -> tidelog::Result<()> {
//! let store = SqliteEventStore::open("orders.db")?;
//!
//! let result = store
//!     .append_to_stream(
//!         "order-42",
//!         vec![Event::new("OrderCreated", json!({ "total": 99 }))],
//!         ExpectedRevision::NoStream,
//!     )
//!     .await?;
//! assert_eq!(result.revision, 0);
//!
//! let events: Vec<_> = store
//!     .read_stream("order-42", ReadStreamOptions::default())
//!     .try_collect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod store;
pub mod subscription;
pub mod types;

pub mod memory;
pub mod schema;
pub mod sqlite;

mod feed;
mod reader;
mod writer;

pub use error::{Error, Result};
pub use memory::MemoryEventStore;
pub use schema::Database;
pub use sqlite::{SqliteEventStore, StoreConfig};
pub use store::{
    AllEventStream, EventStore, EventStream, ReadAllOptions, ReadStreamOptions,
    SubscribableEventStore,
};
pub use subscription::{Subscription, SubscriptionConfig};
pub use types::{
    AppendResult, CurrentRevision, Event, ExpectedRevision, Position, ReadDirection, ReadPosition,
    ReadRevision, StoreAllEvent, StoreEvent,
};
