//! # Cache Event Bus
//!
//! Publish/subscribe channel for cache mutations, built on
//! `tokio::sync::broadcast`. Every component that changes cache state emits a
//! [`CacheEvent`]; observers (the live hash-set watcher, UI layers, metrics
//! collectors) subscribe independently and never block the publisher.
//!
//! Slow subscribers receive `RecvError::Lagged` rather than stalling the
//! cache; treat `RecvError::Closed` as shutdown.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tracing::debug;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Why a cached track was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// The record's TTL elapsed.
    Expired,
    /// Removed under size pressure by the LRU sweep.
    LruPressure,
    /// Removed by an explicit evict call.
    Explicit,
    /// Metadata pointed at a missing or empty blob and was healed away.
    SelfHealed,
}

/// Events emitted on every cache mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// A track finished downloading and entered the cache.
    TrackCached {
        /// Hash identifying the track.
        track_hash: String,
        /// Size of the stored blob in bytes.
        file_size_bytes: u64,
    },
    /// A track left the cache.
    TrackEvicted {
        /// Hash identifying the track.
        track_hash: String,
        /// Why it was removed.
        reason: EvictionReason,
    },
    /// A valid replay moved a track to a higher retention tier, or slid its
    /// expiry forward within the current tier.
    ReplayRecorded {
        /// Hash identifying the track.
        track_hash: String,
        /// Tier name after the update (stable lowercase identifier).
        tier: String,
        /// Replay count after the update.
        replay_count: u32,
        /// Whether the tier changed with this replay.
        upgraded: bool,
    },
    /// The whole cache was cleared.
    CacheCleared {
        /// Number of metadata rows removed.
        tracks_removed: u64,
    },
}

impl CacheEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &'static str {
        match self {
            CacheEvent::TrackCached { .. } => "Track cached",
            CacheEvent::TrackEvicted { .. } => "Track evicted",
            CacheEvent::ReplayRecorded { .. } => "Replay recorded",
            CacheEvent::CacheCleared { .. } => "Cache cleared",
        }
    }
}

/// Central event bus for publishing and subscribing to cache events.
///
/// Cloning the bus yields another publisher handle; every `subscribe()` call
/// creates an independent receiver. Past events are not replayed.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CacheEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// when there are none.
    pub fn emit(&self, event: CacheEvent) -> Result<usize, SendError<CacheEvent>> {
        let description = event.description();
        match self.sender.send(event) {
            Ok(received) => {
                debug!(event = description, subscribers = received, "Event published");
                Ok(received)
            }
            Err(err) => {
                debug!(event = description, "Event dropped, no subscribers");
                Err(err)
            }
        }
    }

    /// Creates a new subscriber that receives all future events.
    pub fn subscribe(&self) -> Receiver<CacheEvent> {
        debug!(
            subscribers = self.sender.receiver_count() + 1,
            "Event subscriber added"
        );
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&CacheEvent) -> bool + Send + Sync>;

/// A receiver wrapper that skips events failing a predicate.
pub struct EventStream {
    receiver: Receiver<CacheEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<CacheEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Adds a filter; only matching events are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CacheEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n`
    /// events, `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CacheEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            if filter(&event) {
                return Ok(event);
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
