//! Timestamp-ordered event queue and its single consumer.
//!
//! Producers push from anywhere; a binary heap keyed on the event
//! timestamp decides processing order among currently-enqueued items. A
//! counting semaphore is the wake-up signal: one permit per push, plus one
//! extra on shutdown so a blocked consumer always observes cancellation.

use crate::applier::AccrualApplier;
use crate::entities::SupportEvent;
use crate::events::{ProcessedEvent, ProcessedSender};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Semaphore, watch};
use tracing::{debug, error, info};

struct ByTimestamp(SupportEvent);

impl PartialEq for ByTimestamp {
    fn eq(&self, other: &Self) -> bool {
        self.0.occurred_at == other.0.occurred_at
    }
}
impl Eq for ByTimestamp {}
impl PartialOrd for ByTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ByTimestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.occurred_at.cmp(&other.0.occurred_at)
    }
}

struct QueueInner {
    heap: Mutex<BinaryHeap<Reverse<ByTimestamp>>>,
    signal: Semaphore,
}

/// Cloneable producer/consumer handle over the shared queue state.
#[derive(Clone)]
pub struct EventQueue {
    inner: Arc<QueueInner>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                heap: Mutex::new(BinaryHeap::new()),
                signal: Semaphore::new(0),
            }),
        }
    }

    /// Enqueue an event and signal the consumer.
    pub fn push(&self, event: SupportEvent) {
        if let Ok(mut heap) = self.inner.heap.lock() {
            heap.push(Reverse(ByTimestamp(event)));
        }
        self.inner.signal.add_permits(1);
    }

    /// Release the signal once more so a consumer blocked on an empty
    /// queue wakes up and can observe shutdown.
    pub fn wake(&self) {
        self.inner.signal.add_permits(1);
    }

    pub fn len(&self) -> usize {
        self.inner.heap.lock().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pop_earliest(&self) -> Option<SupportEvent> {
        self.inner
            .heap
            .lock()
            .ok()
            .and_then(|mut heap| heap.pop())
            .map(|Reverse(ByTimestamp(event))| event)
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// The single consumer: pops the earliest-timestamped event, applies it,
/// and fans out the processed notification.
pub struct QueueProcessor {
    queue: EventQueue,
    applier: AccrualApplier,
    processed_tx: ProcessedSender,
}

impl QueueProcessor {
    pub fn new(queue: EventQueue, applier: AccrualApplier, processed_tx: ProcessedSender) -> Self {
        Self {
            queue,
            applier,
            processed_tx,
        }
    }

    /// Run until shutdown. A failed apply drops the event and keeps the
    /// loop alive; the countdown's liveness beats completeness.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("QueueProcessor started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("QueueProcessor received shutdown signal");
                        break;
                    }
                }

                permit = self.queue.inner.signal.acquire() => {
                    match permit {
                        Ok(permit) => permit.forget(),
                        Err(_) => break,
                    }
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    let Some(event) = self.queue.pop_earliest() else {
                        // Spurious wake (shutdown permit without shutdown
                        // flag, or a raced pop); nothing to do.
                        continue;
                    };
                    self.handle(event).await;
                }
            }
        }

        info!("QueueProcessor shutdown complete");
    }

    async fn handle(&self, event: SupportEvent) {
        debug!(event = %event.id, kind = %event.kind, "Processing event");
        match self.applier.apply(&event).await {
            Ok(report) => {
                let notification = ProcessedEvent {
                    event,
                    effective: report.effective,
                    totals: report.totals,
                };
                if self.processed_tx.send(notification).is_err() {
                    debug!("No processed-event subscribers");
                }
            }
            Err(error) => {
                // Dropped without retry; the loop must outlive any single
                // event's failure.
                error!(event = %event.id, %error, "Failed to apply event, dropping");
            }
        }
    }
}
