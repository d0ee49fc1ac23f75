//! Bounded event buffer between the broker client and the dispatcher lanes.
//!
//! Capacity counts messages from enqueue until acknowledgment: every message
//! carries a permit from a shared semaphore and the permit is released only
//! after the dispatcher has acknowledged it. A producer that finds no free
//! permit suspends in [`BufferSender::send`] until one is released.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError, mpsc};

use omnilog_api::{Event, InboundMessage};

/// Which event attribute selects the lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartitionKey {
    /// All events of one type share a lane (per-type ordering).
    #[default]
    EventType,
    /// Events spread by id (no ordering across events).
    EventId,
}

impl PartitionKey {
    fn key<'a>(&self, event: &'a Event) -> &'a str {
        match self {
            PartitionKey::EventType => &event.event_type,
            PartitionKey::EventId => &event.id,
        }
    }
}

/// A buffered message together with its share of the in-flight budget.
pub struct Slot {
    pub message: InboundMessage,
    pub(crate) permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot").field("message", &self.message).finish()
    }
}

/// The buffer no longer accepts messages (pipeline stopped). The rejected
/// message is handed back unacknowledged.
#[derive(Debug, thiserror::Error)]
#[error("event buffer closed")]
pub struct BufferClosed(pub InboundMessage);

/// Non-blocking enqueue failure.
#[derive(Debug, thiserror::Error)]
pub enum TrySendError {
    #[error("event buffer full")]
    Full(InboundMessage),
    #[error("event buffer closed")]
    Closed(InboundMessage),
}

/// Producer half. Cheap to clone; all clones share one in-flight budget.
#[derive(Clone)]
pub struct BufferSender {
    lanes: Vec<mpsc::Sender<Slot>>,
    permits: Arc<Semaphore>,
    capacity: usize,
    partition_by: PartitionKey,
}

impl std::fmt::Debug for BufferSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferSender")
            .field("lanes", &self.lanes.len())
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}

impl BufferSender {
    /// Enqueue a message, suspending while `capacity` messages are in flight.
    pub async fn send(&self, message: InboundMessage) -> Result<(), BufferClosed> {
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => return Err(BufferClosed(message)),
        };
        let lane = self.lane_for(&message.event);
        self.lanes[lane]
            .send(Slot { message, permit })
            .await
            .map_err(|e| BufferClosed(e.0.message))
    }

    /// Enqueue without waiting; fails with `Full` when the budget is exhausted.
    pub fn try_send(&self, message: InboundMessage) -> Result<(), TrySendError> {
        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(TryAcquireError::NoPermits) => return Err(TrySendError::Full(message)),
            Err(TryAcquireError::Closed) => return Err(TrySendError::Closed(message)),
        };
        let lane = self.lane_for(&message.event);
        // Lane channels are sized to the whole budget, so a held permit
        // guarantees room.
        self.lanes[lane]
            .try_send(Slot { message, permit })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(slot) => TrySendError::Full(slot.message),
                mpsc::error::TrySendError::Closed(slot) => TrySendError::Closed(slot.message),
            })
    }

    /// Maximum number of unacknowledged messages.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Messages enqueued but not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed() || self.lanes.iter().all(|l| l.is_closed())
    }

    /// Stop accepting messages. Pending and future `send` calls fail.
    pub fn close(&self) {
        self.permits.close();
    }

    fn lane_for(&self, event: &Event) -> usize {
        if self.lanes.len() == 1 {
            return 0;
        }
        let mut hasher = DefaultHasher::new();
        self.partition_by.key(event).hash(&mut hasher);
        (hasher.finish() % self.lanes.len() as u64) as usize
    }
}

/// Consumer half for one dispatcher lane.
#[derive(Debug)]
pub struct LaneReceiver {
    lane: usize,
    rx: mpsc::Receiver<Slot>,
}

impl LaneReceiver {
    pub fn lane(&self) -> usize {
        self.lane
    }

    pub async fn recv(&mut self) -> Option<Slot> {
        self.rx.recv().await
    }
}

/// Create a buffer with `capacity` in-flight slots shared by `lanes` lanes.
///
/// # Panics
///
/// Panics if `capacity` or `lanes` is zero (rejected earlier by config validation).
pub fn bounded(
    capacity: usize,
    lanes: usize,
    partition_by: PartitionKey,
) -> (BufferSender, Vec<LaneReceiver>) {
    assert!(capacity > 0, "buffer capacity must be positive");
    assert!(lanes > 0, "lane count must be positive");

    let mut senders = Vec::with_capacity(lanes);
    let mut receivers = Vec::with_capacity(lanes);
    for lane in 0..lanes {
        let (tx, rx) = mpsc::channel(capacity);
        senders.push(tx);
        receivers.push(LaneReceiver { lane, rx });
    }

    let sender = BufferSender {
        lanes: senders,
        permits: Arc::new(Semaphore::new(capacity)),
        capacity,
        partition_by,
    };
    (sender, receivers)
}
