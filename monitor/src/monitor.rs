//! The dispatcher: a bounded event queue drained by one background loop.
//!
//! Producers call [`Monitor::enqueue`], which never blocks. A single dispatch
//! loop pulls events off the queue and hands each one to its own delivery
//! task, with at most `max_concurrent_sends` tasks in flight. Shutdown closes
//! the queue, lets the loop finish everything already buffered, and waits for
//! the in-flight deliveries up to a deadline.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use aiko_monitor::{Config, Event, Monitor};
//!
//! #[tokio::main]
//! async fn main() -> aiko_monitor::Result<()> {
//!     let monitor = Monitor::new(Config::from_env()?)?;
//!
//!     monitor.enqueue(Event::new("GET", "/health", 200));
//!
//!     monitor.shutdown(Duration::from_secs(5)).await?;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, info, warn};

use crate::config::{Config, SDK_VERSION};
use crate::error::{MonitorError, Result, ShutdownError};
use crate::sender::Sender;
use crate::types::Event;

/// What happened to an event handed to [`Monitor::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Buffered for delivery.
    Queued,

    /// The queue was full; the event was discarded.
    DroppedQueueFull,

    /// The monitor is disabled or shutting down.
    Ignored,
}

/// Snapshot of the monitor's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub enqueued: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    /// Events accepted but not yet finished (queued or in flight).
    pending: AtomicUsize,
}

/// State shared by every clone of an enabled monitor.
struct Inner {
    /// Producer side of the queue. Taken on shutdown, which closes the queue.
    queue: RwLock<Option<mpsc::Sender<Event>>>,
    drained: watch::Receiver<bool>,
    counters: Arc<Counters>,
    queue_size: usize,
}

/// Handle to the capture pipeline.
///
/// Cheap to clone; all clones feed the same queue. A disabled monitor accepts
/// and discards everything.
#[derive(Clone)]
pub struct Monitor {
    inner: Option<Arc<Inner>>,
    sdk_version: Arc<str>,
}

impl Monitor {
    /// Validates `config` and starts the dispatch loop.
    ///
    /// A disabled config yields a no-op monitor without validation.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Config`] for invalid keys or endpoint, and
    /// [`MonitorError::NoRuntime`] when called outside a Tokio runtime.
    pub fn new(config: Config) -> Result<Self> {
        if !config.enabled {
            debug!("Monitor disabled, events will be discarded");
            return Ok(Self::disabled(&config.sdk_version));
        }

        let validated = config.validate()?;
        let handle = Handle::try_current().map_err(|_| MonitorError::NoRuntime)?;

        let (tx, rx) = mpsc::channel(validated.queue_size);
        let (drained_tx, drained_rx) = watch::channel(false);
        let counters = Arc::new(Counters::default());

        info!(
            endpoint = %validated.sender.endpoint,
            queue_size = validated.queue_size,
            max_concurrent_sends = validated.max_concurrent_sends,
            "Monitor started"
        );

        let sender = Arc::new(Sender::new(validated.sender, validated.client));
        handle.spawn(dispatch_loop(
            rx,
            sender,
            validated.max_concurrent_sends,
            Arc::clone(&counters),
            drained_tx,
        ));

        Ok(Self {
            inner: Some(Arc::new(Inner {
                queue: RwLock::new(Some(tx)),
                drained: drained_rx,
                counters,
                queue_size: validated.queue_size,
            })),
            sdk_version: Arc::from(validated.sdk_version),
        })
    }

    /// A monitor that discards every event.
    #[must_use]
    pub fn noop() -> Self {
        Self::disabled(SDK_VERSION)
    }

    fn disabled(sdk_version: &str) -> Self {
        Self {
            inner: None,
            sdk_version: Arc::from(sdk_version),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Value for the `x-aiko-version` header.
    #[must_use]
    pub fn sdk_version(&self) -> &str {
        &self.sdk_version
    }

    /// Offers an event to the queue without blocking.
    ///
    /// A full queue drops the event and logs a warning. After shutdown, and on
    /// a disabled monitor, the event is silently ignored.
    pub fn enqueue(&self, event: Event) -> EnqueueOutcome {
        let Some(inner) = &self.inner else {
            return EnqueueOutcome::Ignored;
        };

        let queue = inner.queue.read().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = queue.as_ref() else {
            return EnqueueOutcome::Ignored;
        };

        // Counted before the send so a fast delivery cannot underflow it.
        inner.counters.pending.fetch_add(1, Ordering::SeqCst);
        match tx.try_send(event) {
            Ok(()) => {
                inner.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                EnqueueOutcome::Queued
            }
            Err(TrySendError::Full(_)) => {
                inner.counters.pending.fetch_sub(1, Ordering::SeqCst);
                inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(capacity = inner.queue_size, "Event queue is full, dropping event");
                EnqueueOutcome::DroppedQueueFull
            }
            Err(TrySendError::Closed(_)) => {
                inner.counters.pending.fetch_sub(1, Ordering::SeqCst);
                EnqueueOutcome::Ignored
            }
        }
    }

    /// Closes the queue and waits up to `deadline` for it to drain.
    ///
    /// Safe to call any number of times, from any clone. Every buffered event
    /// is still dispatched. If the deadline passes first, the remaining
    /// deliveries are left running and `ShutdownError::Timeout` is returned.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::Timeout`] when the deadline elapses first.
    pub async fn shutdown(&self, deadline: Duration) -> std::result::Result<(), ShutdownError> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };
        inner.close_queue();

        match tokio::time::timeout(deadline, inner.wait_drained()).await {
            Ok(()) => Ok(()),
            Err(_) => {
                let pending = inner.counters.pending.load(Ordering::SeqCst);
                warn!(pending, "Shutdown deadline elapsed before queue drained");
                Err(ShutdownError::Timeout { pending })
            }
        }
    }

    /// Closes the queue and waits, without a deadline, for it to drain.
    pub async fn close(&self) {
        if let Some(inner) = &self.inner {
            inner.close_queue();
            inner.wait_drained().await;
        }
    }

    #[must_use]
    pub fn stats(&self) -> MonitorStats {
        let Some(inner) = &self.inner else {
            return MonitorStats::default();
        };
        let c = &inner.counters;
        MonitorStats {
            enqueued: c.enqueued.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("enabled", &self.is_enabled())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Inner {
    /// Drops the only queue sender. Later calls find it already gone.
    fn close_queue(&self) {
        let taken = self
            .queue
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if taken.is_some() {
            info!(
                pending = self.counters.pending.load(Ordering::SeqCst),
                "Monitor shutting down"
            );
        }
    }

    async fn wait_drained(&self) {
        let mut drained = self.drained.clone();
        // An error means the loop is gone, so nothing is left to wait for.
        let _ = drained.wait_for(|done| *done).await;
    }
}

/// Pulls events until the queue is closed and empty, then waits for every
/// in-flight delivery before flagging the drain as complete.
async fn dispatch_loop(
    mut rx: mpsc::Receiver<Event>,
    sender: Arc<Sender>,
    max_concurrent_sends: usize,
    counters: Arc<Counters>,
    drained: watch::Sender<bool>,
) {
    let semaphore = Arc::new(Semaphore::new(max_concurrent_sends));

    while let Some(event) = rx.recv().await {
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        let sender = Arc::clone(&sender);
        let counters = Arc::clone(&counters);

        tokio::spawn(async move {
            let _permit = permit;
            match sender.deliver(&event).await {
                Ok(attempts) => {
                    counters.delivered.fetch_add(1, Ordering::Relaxed);
                    debug!(attempts, endpoint = %event.endpoint, "Event delivered");
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, endpoint = %event.endpoint, "Dropping event after failed delivery");
                }
            }
            counters.pending.fetch_sub(1, Ordering::SeqCst);
        });
    }

    let permits = u32::try_from(max_concurrent_sends).unwrap_or(u32::MAX);
    let _all = semaphore.acquire_many(permits).await;

    info!("Event queue drained");
    let _ = drained.send(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::RetryPolicy;

    const PROJECT_KEY: &str = "pk_AAAAAAAAAAAAAAAAAAAAAA";
    const SECRET_KEY: &str = "BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB";

    /// Nothing listens on port 9 locally, so deliveries fail fast.
    fn unreachable_config() -> Config {
        Config::new(PROJECT_KEY, SECRET_KEY)
            .with_endpoint("http://127.0.0.1:9/api/monitor/ingest")
            .with_retry_policy(RetryPolicy {
                max_attempts: 1,
                ..RetryPolicy::fast_for_tests()
            })
            .with_http_timeout(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_noop_discards_and_shuts_down_immediately() {
        let monitor = Monitor::noop();
        assert!(!monitor.is_enabled());
        assert_eq!(
            monitor.enqueue(Event::new("GET", "/", 200)),
            EnqueueOutcome::Ignored
        );
        assert_eq!(monitor.shutdown(Duration::ZERO).await, Ok(()));
        assert_eq!(monitor.stats(), MonitorStats::default());
    }

    #[tokio::test]
    async fn test_disabled_config_skips_validation() {
        let monitor = Monitor::new(Config::new("garbage", "x").with_enabled(false)).unwrap();
        assert!(!monitor.is_enabled());
    }

    #[test]
    fn test_enabled_monitor_needs_runtime() {
        let err = Monitor::new(unreachable_config()).unwrap_err();
        assert!(matches!(err, MonitorError::NoRuntime));
    }

    #[tokio::test]
    async fn test_invalid_config_fails_fast() {
        let err = Monitor::new(Config::new(PROJECT_KEY, "short")).unwrap_err();
        assert!(matches!(err, MonitorError::Config(_)));
    }

    #[tokio::test]
    async fn test_overflow_keeps_exactly_capacity() {
        // The current-thread test runtime does not run the dispatch loop
        // until this test yields, so the queue cannot drain in between.
        let monitor = Monitor::new(unreachable_config().with_queue_size(4)).unwrap();

        let outcomes: Vec<_> = (0..10)
            .map(|i| monitor.enqueue(Event::new("GET", format!("/items/{i}"), 200)))
            .collect();

        let queued = outcomes.iter().filter(|o| **o == EnqueueOutcome::Queued).count();
        let dropped = outcomes
            .iter()
            .filter(|o| **o == EnqueueOutcome::DroppedQueueFull)
            .count();
        assert_eq!(queued, 4);
        assert_eq!(dropped, 6);

        let stats = monitor.stats();
        assert_eq!(stats.enqueued, 4);
        assert_eq!(stats.dropped, 6);

        monitor.shutdown(Duration::from_secs(5)).await.unwrap();
        let stats = monitor.stats();
        assert_eq!(stats.delivered + stats.failed, 4);
    }

    #[tokio::test]
    async fn test_shutdown_twice_and_enqueue_after() {
        let monitor = Monitor::new(unreachable_config()).unwrap();
        let clone = monitor.clone();

        assert_eq!(monitor.shutdown(Duration::from_secs(5)).await, Ok(()));
        assert_eq!(clone.shutdown(Duration::from_secs(5)).await, Ok(()));
        assert_eq!(
            clone.enqueue(Event::new("GET", "/late", 200)),
            EnqueueOutcome::Ignored
        );
        monitor.close().await;
    }

    #[tokio::test]
    async fn test_sdk_version_defaults_to_crate_version() {
        let monitor = Monitor::new(unreachable_config()).unwrap();
        assert_eq!(monitor.sdk_version(), SDK_VERSION);
        assert!(monitor.sdk_version().starts_with("rust:"));

        let custom = Monitor::new(Config::disabled().with_sdk_version("rust:test")).unwrap();
        assert_eq!(custom.sdk_version(), "rust:test");
        monitor.close().await;
    }
}
