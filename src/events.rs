//! Lightweight pub/sub event bus (§3's "Subscription", §4.9).
//!
//! Built on `tokio::sync::watch`: each receiver independently tracks
//! whether it has observed the latest value, which is exactly the
//! "at most one pending notification, multiple emits between reads
//! collapse into one" contract the design calls for — no custom
//! single-slot channel needed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct EventBus {
    tx: watch::Sender<u64>,
    counter: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            tx,
            counter: AtomicU64::new(0),
        }
    }

    /// Wakes every subscriber without blocking. Additional emits before a
    /// subscriber reads collapse into the single pending notification.
    pub fn emit(&self) {
        let next = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        // `send` never blocks; it only fails if every receiver was dropped,
        // which is not an error condition for the emitter.
        let _ = self.tx.send(next);
    }

    /// Returns a handle the caller can poll manually with `recv`.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: Mutex::new(self.tx.subscribe()),
            cancelled: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Convenience: spawns a task that calls `handler` on every
    /// notification (and immediately, if `fire_now`), stopping when the
    /// returned subscription is cancelled or the bus is dropped.
    pub fn watch<F>(&self, handler: F, fire_now: bool) -> Arc<Subscription>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let sub = Arc::new(self.subscribe());
        let cancelled = sub.cancelled.clone();
        let mut rx = self.tx.subscribe();
        let handler = Arc::new(handler);

        let task = tokio::spawn(async move {
            if fire_now {
                handler();
            }
            loop {
                if cancelled.load(Ordering::SeqCst) {
                    break;
                }
                match rx.changed().await {
                    Ok(()) => {
                        if cancelled.load(Ordering::SeqCst) {
                            break;
                        }
                        handler();
                    }
                    Err(_) => break, // bus dropped
                }
            }
        });

        *sub.task.lock() = Some(task);
        sub
    }
}

/// A one-slot subscription handle. Dropping it does not cancel the
/// `watch` task by itself (the task holds its own clone of the cancel
/// flag inside the `Arc<Subscription>`); call `cancel` explicitly.
pub struct Subscription {
    rx: Mutex<watch::Receiver<u64>>,
    cancelled: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Subscription {
    /// Waits for the next notification. Resolves immediately if one or
    /// more emits happened since the last `recv`.
    pub async fn recv(&self) {
        let mut rx = self.rx.lock().clone();
        let _ = rx.changed().await;
        *self.rx.lock() = rx;
    }

    /// Idempotent unsubscribe: safe to call more than once or after the
    /// `watch` task has already finished on its own.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}
