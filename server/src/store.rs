//! Bounded in-memory store of received events.
//!
//! The store keeps the most recent `capacity` events; older ones are evicted
//! first. It is cheap to clone and shared between route handlers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use aiko_monitor::Event;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An accepted event together with its receipt metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// When the server accepted the event.
    pub received_at: DateTime<Utc>,

    /// Value of the `X-Client-IP` header, if the monitor sent one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,

    pub event: Event,
}

#[derive(Debug)]
struct Shared {
    events: Mutex<VecDeque<StoredEvent>>,
    total_received: AtomicU64,
    capacity: usize,
}

/// Thread-safe ring buffer of [`StoredEvent`]s.
#[derive(Debug, Clone)]
pub struct EventStore {
    shared: Arc<Shared>,
}

impl EventStore {
    /// Creates a store holding at most `capacity` events (minimum one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
                total_received: AtomicU64::new(0),
                capacity,
            }),
        }
    }

    /// Appends an event, evicting the oldest one when full.
    pub fn push(&self, event: Event, client_ip: Option<String>) {
        let stored = StoredEvent {
            received_at: Utc::now(),
            client_ip,
            event,
        };

        let mut events = self.lock();
        if events.len() == self.shared.capacity {
            events.pop_front();
        }
        events.push_back(stored);
        self.shared.total_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the retained events, oldest first.
    ///
    /// With `limit`, only the newest `limit` events are returned.
    #[must_use]
    pub fn snapshot(&self, limit: Option<usize>) -> Vec<StoredEvent> {
        let events = self.lock();
        let skip = limit.map_or(0, |n| events.len().saturating_sub(n));
        events.iter().skip(skip).cloned().collect()
    }

    /// Removes every retained event and returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut events = self.lock();
        let removed = events.len();
        events.clear();
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Events accepted since startup, including evicted ones.
    #[must_use]
    pub fn total_received(&self) -> u64 {
        self.shared.total_received.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<StoredEvent>> {
        self.shared
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
