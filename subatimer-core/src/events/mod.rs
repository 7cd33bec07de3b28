//! In-process notification types and channel factories.

pub mod channels;
pub mod types;

pub use channels::{
    ErrorEventReceiver, ErrorSink, IngressReceiver, IngressSender, OverlayRefreshReceiver,
    OverlayRefreshSender, ProcessedReceiver, ProcessedSender, error_channel, ingress_channel,
    overlay_refresh_channel, processed_channel,
};
pub use types::{AccrualSnapshot, ErrorCategory, ErrorEvent, ProcessedEvent};
