//! # Subscription Handles
//!
//! A [`Subscription`] is the consumer's end of a push feed: a bounded channel
//! of `Result<T>` items plus a cancellation signal. The producing task lives
//! inside the backend; this module only defines the seam between the two.
//!
//! ## Backpressure
//!
//! The channel is bounded. A producer awaiting `send` on a full channel is
//! paused until the consumer catches up, so a slow projection throttles its
//! own feed instead of ballooning memory. The in-memory backend's broadcast
//! fan-out has a fixed buffer behind this channel; overrunning *that* is
//! reported as [`SubscriptionLagged`](crate::Error::SubscriptionLagged).
//!
//! ## Cancellation
//!
//! Cancellation is cooperative and silent. Calling [`Subscription::cancel`]
//! (or dropping the handle) flips a `watch` flag that every producer checks
//! on each send; the producer winds down promptly and the sequence simply
//! ends. No error is ever surfaced for a cancellation.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::{mpsc, watch};

use crate::error::Result;

// =============================================================================
// Configuration
// =============================================================================

/// Tuning knobs for subscription delivery.
///
/// The defaults suit a single-process deployment; the clock-skew window in
/// particular is a policy heuristic for the durable backend's catch-up seam,
/// not a correctness guarantee, and should be widened when writers with badly
/// skewed clocks share the store.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// How far behind "now" the durable backend opens its live feed when the
    /// historical replay ended near the present, so that writes committed
    /// with a skewed clock are not missed. Duplicates introduced by the
    /// overlap are removed by event identity.
    pub clock_skew: Duration,

    /// Minimum timestamp (Unix milliseconds) a global live feed may start
    /// at. Zero means no floor.
    pub subscribe_floor_ms: u64,

    /// How long the durable backend's feed sleeps between polls when it
    /// finds no new events.
    pub poll_interval: Duration,

    /// Page size for historical replay and feed polling.
    pub batch_size: usize,

    /// Capacity of the subscription's delivery channel.
    pub channel_capacity: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            clock_skew: Duration::from_secs(60),
            subscribe_floor_ms: 0,
            poll_interval: Duration::from_millis(20),
            batch_size: 1000,
            channel_capacity: 1024,
        }
    }
}

// =============================================================================
// Consumer Handle
// =============================================================================

/// A live or catch-up subscription, consumed by pulling items.
///
/// Implements [`Stream`], so it composes with the `futures` combinators; the
/// inherent [`next`](Subscription::next) method avoids the `StreamExt` import
/// for the common loop:
///
/// ```rust,no_run
/// # async fn demo(mut sub: tidelog::Subscription<tidelog::StoreEvent>) -> tidelog::Result<()> {
/// while let Some(event) = sub.next().await {
///     let event = event?;
///     println!("rev {} on {}", event.revision, event.stream);
/// }
/// # Ok(())
/// # }
/// ```
///
/// Dropping the handle cancels the subscription.
pub struct Subscription<T> {
    rx: mpsc::Receiver<Result<T>>,
    cancel: watch::Sender<bool>,
}

impl<T> Subscription<T> {
    /// Receives the next item, or `None` once the subscription has ended
    /// (cancelled, or the store shut down).
    pub async fn next(&mut self) -> Option<Result<T>> {
        self.rx.recv().await
    }

    /// Cancels the subscription.
    ///
    /// The producer stops at its next send; items it already buffered can
    /// still be drained with [`next`](Subscription::next), after which the
    /// sequence ends. Safe to call more than once.
    pub fn cancel(&mut self) {
        let _ = self.cancel.send(true);
        self.rx.close();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

// Dropping the watch sender closes it; producers observe the closure the
// same way they observe an explicit cancel.

// =============================================================================
// Producer Handle
// =============================================================================

/// The producing side of a subscription, held by a backend task.
pub(crate) struct SubscriptionSender<T> {
    tx: mpsc::Sender<Result<T>>,
    cancel_rx: watch::Receiver<bool>,
}

impl<T> SubscriptionSender<T> {
    /// Delivers one item, honoring backpressure and cancellation.
    ///
    /// Returns `false` when the producer should stop: the consumer cancelled
    /// or dropped the subscription.
    pub(crate) async fn send(&mut self, item: Result<T>) -> bool {
        if *self.cancel_rx.borrow() {
            return false;
        }
        tokio::select! {
            sent = self.tx.send(item) => sent.is_ok(),
            _ = self.cancel_rx.changed() => false,
        }
    }

    /// Whether the consumer has cancelled. Cheap; useful between sends in
    /// tight replay loops.
    pub(crate) fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow() || self.cancel_rx.has_changed().is_err()
    }

    /// Resolves once the consumer cancels or drops the subscription. Lets a
    /// producer that is idle (no item to send) still wind down promptly.
    pub(crate) async fn cancelled(&mut self) {
        loop {
            if *self.cancel_rx.borrow() {
                return;
            }
            if self.cancel_rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Creates a connected subscription pair.
pub(crate) fn channel<T>(capacity: usize) -> (SubscriptionSender<T>, Subscription<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    let (cancel, cancel_rx) = watch::channel(false);
    (SubscriptionSender { tx, cancel_rx }, Subscription { rx, cancel })
}

// =============================================================================
// Tests
// =============================================================================
