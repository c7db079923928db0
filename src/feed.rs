//! # Change Feed
//!
//! The durable backend's substitute for push notifications: a [`Feed`] tails
//! the events table in position order, paging forward through the reader
//! pool and sleeping briefly whenever it reaches the head of the log.
//!
//! A feed is opened either at an explicit position cursor or at a wall-clock
//! instant. The instant is resolved to a position watermark exactly once, up
//! front; from then on the feed advances purely by position, so events
//! committed later with skewed timestamps are never skipped. Whether events
//! *below* the watermark should have been seen is the subscription seam's
//! problem, handled by the clock-skew overlap in the backend facade.

use std::time::Duration;

use tokio::time::sleep;
use tracing::trace;

use crate::error::Result;
use crate::reader::ReadClient;
use crate::subscription::SubscriptionConfig;
use crate::types::StoreAllEvent;

/// A tailing cursor over the global log.
pub(crate) struct Feed {
    client: ReadClient,
    /// Exclusive: the feed delivers positions strictly above this.
    cursor: u64,
    batch_size: usize,
    poll_interval: Duration,
}

impl Feed {
    /// Opens a feed delivering events with positions strictly after `after`.
    pub(crate) fn after_position(client: ReadClient, after: u64, config: &SubscriptionConfig) -> Self {
        Self {
            client,
            cursor: after,
            batch_size: config.batch_size.max(1),
            poll_interval: config.poll_interval,
        }
    }

    /// Opens a feed at a wall-clock instant: the first delivered event is
    /// the earliest stored event whose timestamp is at or after
    /// `timestamp_ms`, or the next event appended if none qualifies yet.
    pub(crate) async fn from_timestamp(
        client: ReadClient,
        timestamp_ms: u64,
        config: &SubscriptionConfig,
    ) -> Result<Self> {
        let watermark = client.feed_start(timestamp_ms).await?;
        trace!(timestamp_ms, watermark, "feed positioned");
        Ok(Self::after_position(client, watermark.saturating_sub(1), config))
    }

    /// Waits for and returns the next non-empty page, advancing the cursor
    /// past it. Pends indefinitely at an idle head; callers race this
    /// against their cancellation signal.
    pub(crate) async fn next_page(&mut self) -> Result<Vec<StoreAllEvent>> {
        loop {
            let page = self
                .client
                .all_forwards(Some(self.cursor), None, self.batch_size)
                .await?;
            if let Some(last) = page.last() {
                // Store-issued positions always decode.
                if let Some(sequence) = last.position.sequence() {
                    self.cursor = sequence;
                }
                return Ok(page);
            }
            sleep(self.poll_interval).await;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
