//! Channel factories and handles for the pipeline's notification flows.
//!
//! All cross-cutting notification goes through channels owned by the
//! composition root; there are no process-wide static event handlers.

use super::types::{ErrorCategory, ErrorEvent, ProcessedEvent};
use crate::entities::SupportEvent;
use time::OffsetDateTime;
use tokio::sync::{broadcast, mpsc};

/// Buffer for the ingress feed from platform connectors.
pub const INGRESS_BUFFER: usize = 256;
/// Buffer for broadcast fan-outs; slow subscribers lag rather than block.
pub const FANOUT_BUFFER: usize = 512;

/// Sender handle for raw events entering the pipeline.
pub type IngressSender = mpsc::Sender<SupportEvent>;
/// Receiver handle for raw events entering the pipeline.
pub type IngressReceiver = mpsc::Receiver<SupportEvent>;

/// Sender handle for processed-event fan-out.
pub type ProcessedSender = broadcast::Sender<ProcessedEvent>;
/// Receiver handle for processed-event fan-out.
pub type ProcessedReceiver = broadcast::Receiver<ProcessedEvent>;

/// Receiver handle for the error-notification surface.
pub type ErrorEventReceiver = broadcast::Receiver<ErrorEvent>;

/// Sender handle for overlay refresh broadcasts.
pub type OverlayRefreshSender = broadcast::Sender<()>;
/// Receiver handle for overlay refresh broadcasts.
pub type OverlayRefreshReceiver = broadcast::Receiver<()>;

/// Create the channel connectors push raw events into.
pub fn ingress_channel() -> (IngressSender, IngressReceiver) {
    mpsc::channel(INGRESS_BUFFER)
}

/// Create the processed-event fan-out channel.
pub fn processed_channel() -> (ProcessedSender, ProcessedReceiver) {
    broadcast::channel(FANOUT_BUFFER)
}

/// Create the error-notification channel and its reporting handle.
pub fn error_channel() -> (ErrorSink, ErrorEventReceiver) {
    let (tx, rx) = broadcast::channel(FANOUT_BUFFER);
    (ErrorSink { tx }, rx)
}

/// Create the overlay refresh channel. Refresh commands bypass the queue
/// and go straight here.
pub fn overlay_refresh_channel() -> (OverlayRefreshSender, OverlayRefreshReceiver) {
    broadcast::channel(16)
}

/// Cloneable handle every component uses to report non-fatal failures.
#[derive(Clone)]
pub struct ErrorSink {
    tx: broadcast::Sender<ErrorEvent>,
}

impl ErrorSink {
    /// A sink with no subscribers, for tests and offline tools.
    pub fn disconnected() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn report(&self, category: ErrorCategory, source: &'static str, message: impl Into<String>) {
        let event = ErrorEvent {
            category,
            source,
            message: message.into(),
            at: OffsetDateTime::now_utc(),
        };
        // Nobody listening is fine; the error is still logged by the caller.
        let _ = self.tx.send(event);
    }

    pub fn rejected(&self, source: &'static str, message: impl Into<String>) {
        self.report(ErrorCategory::RejectedInput, source, message);
    }

    pub fn transient(&self, source: &'static str, message: impl Into<String>) {
        self.report(ErrorCategory::TransientExternal, source, message);
    }

    pub fn consistency(&self, source: &'static str, message: impl Into<String>) {
        self.report(ErrorCategory::Consistency, source, message);
    }

    pub fn subscribe(&self) -> ErrorEventReceiver {
        self.tx.subscribe()
    }
}
