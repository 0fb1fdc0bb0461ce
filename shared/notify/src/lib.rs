//! Sniper Notify - Lifecycle notifications
//!
//! Producers hand events to a [`Notifier`] and move on. Delivery happens on a
//! background task; a slow, full or failing sink never blocks or fails a trade.

pub mod telegram;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sniper_types::{EventKind, LifecycleEvent};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use telegram::TelegramSink;

/// Notification delivery errors
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

/// Fire-and-forget event publisher
pub trait Notifier: Send + Sync {
    fn notify(&self, event: LifecycleEvent);
}

/// Destination for lifecycle events
#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, event: &LifecycleEvent) -> Result<(), NotifyError>;
}

/// Cloneable producer side of the dispatch queue
#[derive(Clone)]
pub struct NotifierHandle {
    tx: mpsc::Sender<LifecycleEvent>,
}

impl Notifier for NotifierHandle {
    fn notify(&self, event: LifecycleEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(kind = ?event.kind, pair = ?event.pair, "Notification queue full, event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!(kind = ?event.kind, "Notification dispatcher stopped, event dropped");
            }
        }
    }
}

/// Start the dispatcher task. It runs until every handle is dropped and the
/// queue is drained.
pub fn spawn_dispatcher(
    sinks: Vec<Arc<dyn EventSink>>,
    capacity: usize,
    delivery_timeout: Duration,
) -> (NotifierHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<LifecycleEvent>(capacity.max(1));

    info!(
        "Notifier dispatching to {} sink(s): {}",
        sinks.len(),
        sinks.iter().map(|s| s.name()).collect::<Vec<_>>().join(", ")
    );

    let task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            for sink in &sinks {
                match tokio::time::timeout(delivery_timeout, sink.deliver(&event)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(sink = sink.name(), "Notification delivery failed: {}", e),
                    Err(_) => warn!(sink = sink.name(), "Notification delivery timed out"),
                }
            }
        }
        debug!("Notifier dispatcher drained");
    });

    (NotifierHandle { tx }, task)
}

/// Writes every event to the tracing log
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, event: &LifecycleEvent) -> Result<(), NotifyError> {
        match event.kind {
            EventKind::SwapFailed => tracing::error!(
                target: "sniper::events",
                pair = ?event.pair,
                "[{:?}] {}: {}",
                event.kind,
                event.target,
                event.details
            ),
            EventKind::AttemptFailed => tracing::warn!(
                target: "sniper::events",
                pair = ?event.pair,
                "[{:?}] {}: {}",
                event.kind,
                event.target,
                event.details
            ),
            _ => tracing::info!(
                target: "sniper::events",
                pair = ?event.pair,
                "[{:?}] {}: {}",
                event.kind,
                event.target,
                event.details
            ),
        }
        Ok(())
    }
}

/// Keeps events in memory, for inspection in tests and dry runs
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(|e| e.kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: LifecycleEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers_core::types::Address;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        delivered: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl EventSink for CountingSink {
        fn name(&self) -> &str {
            "counting"
        }

        async fn deliver(&self, _event: &LifecycleEvent) -> Result<(), NotifyError> {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(NotifyError::DeliveryFailed("sink down".to_string()));
            }
            Ok(())
        }
    }

    struct StuckSink;

    #[async_trait]
    impl EventSink for StuckSink {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn deliver(&self, _event: &LifecycleEvent) -> Result<(), NotifyError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn event(kind: EventKind) -> LifecycleEvent {
        LifecycleEvent::new(kind, Address::zero(), "test", "details")
    }

    #[tokio::test]
    async fn test_dispatch_reaches_all_sinks_despite_failures() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let sinks: Vec<Arc<dyn EventSink>> = vec![
            Arc::new(CountingSink { delivered: delivered.clone(), fail: true }),
            Arc::new(StuckSink),
            Arc::new(CountingSink { delivered: delivered.clone(), fail: false }),
        ];
        let (handle, task) = spawn_dispatcher(sinks, 8, Duration::from_millis(20));

        handle.notify(event(EventKind::WatchStarted));
        handle.notify(event(EventKind::TriggerHit));
        drop(handle);
        task.await.unwrap();

        assert_eq!(delivered.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = NotifierHandle { tx };

        handle.notify(event(EventKind::SwapSubmitted));
        // Queue is full now; this must return immediately
        handle.notify(event(EventKind::SwapConfirmed));
    }

    #[test]
    fn test_recording_notifier() {
        let recorder = RecordingNotifier::new();
        recorder.notify(event(EventKind::TriggerHit));
        recorder.notify(event(EventKind::SwapFailed));

        assert_eq!(recorder.kinds(), vec![EventKind::TriggerHit, EventKind::SwapFailed]);
        assert_eq!(recorder.count(EventKind::SwapFailed), 1);
    }
}
