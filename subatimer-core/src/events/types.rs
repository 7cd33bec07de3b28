//! Notification payloads flowing between pipeline components.

use crate::entities::SupportEvent;
use time::OffsetDateTime;

/// Running totals of the active accrual, captured right after an apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccrualSnapshot {
    pub remaining_seconds: i64,
    pub points: i64,
}

/// Raised by the queue processor after an event has gone through the
/// accrual applier. Fans out to the notifier and to overlay observers.
#[derive(Debug, Clone)]
pub struct ProcessedEvent {
    pub event: SupportEvent,
    /// Whether the application actually changed the accrual (delta != 0).
    pub effective: bool,
    /// Totals after the apply; absent when no accrual was touched.
    pub totals: Option<AccrualSnapshot>,
}

/// Classification of a reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed command, out-of-range parameter, unknown currency.
    RejectedInput,
    /// Rate-feed fetch or webhook delivery failure.
    TransientExternal,
    /// No active accrual, duplicate identity.
    Consistency,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::RejectedInput => "rejected_input",
            ErrorCategory::TransientExternal => "transient_external",
            ErrorCategory::Consistency => "consistency",
        };
        write!(f, "{name}")
    }
}

/// A non-fatal failure surfaced to whatever UI layer is listening.
///
/// The core never presents anything itself; it only reports here.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub category: ErrorCategory,
    /// Component that raised the error.
    pub source: &'static str,
    pub message: String,
    pub at: OffsetDateTime,
}
