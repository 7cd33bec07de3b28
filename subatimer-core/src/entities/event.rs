//! The canonical support event.
//!
//! Every platform occurrence and every accepted operator command is
//! normalized into a [`SupportEvent`] before it touches the queue. The
//! multiplier snapshots are captured when the event is resolved, so a
//! power-hour change between enqueue and apply never rewrites history.

use crate::catalog::{CommandKind, EventKind, Platform};
use compact_str::CompactString;
use rust_decimal::Decimal;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Composite identity of an event: the platform-supplied (or content-derived)
/// id can repeat across platforms without colliding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventId {
    pub external_id: CompactString,
    pub platform: Platform,
}

impl EventId {
    pub fn new(external_id: impl Into<CompactString>, platform: Platform) -> Self {
        Self {
            external_id: external_id.into(),
            platform,
        }
    }

    /// Derive an id from event content for platforms that do not supply one.
    pub fn derived(platform: Platform, parts: &[&str]) -> Self {
        let mut hasher = std::hash::DefaultHasher::new();
        for part in parts {
            part.hash(&mut hasher);
        }
        Self {
            external_id: CompactString::from(format!("{:016x}", hasher.finish())),
            platform,
        }
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.platform, self.external_id)
    }
}

/// The normalized unit of work flowing through the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct SupportEvent {
    pub id: EventId,
    pub occurred_at: time::OffsetDateTime,
    pub kind: EventKind,
    /// Set only for `EventKind::ChatCommand`.
    pub command: Option<CommandKind>,
    /// Raw value string: a tier code, an amount string, or a command payload.
    pub value: CompactString,
    /// Configured seconds per unit, resolved pre-multiplier.
    pub seconds_value: Option<i64>,
    /// Configured points per unit, resolved pre-multiplier.
    pub points_value: Option<i64>,
    /// Repeat count for batched gifts, bits/100 for cheers, normalized
    /// money units for monetary events, 1 otherwise.
    pub amount: f64,
    /// ISO code, or a sentinel: "bits", "sub", or empty.
    pub currency: CompactString,
    /// Money delta in the base currency, set at resolution for monetary events.
    pub money: Option<Decimal>,
    /// Multiplier snapshot for the time dimension, captured at resolution.
    pub seconds_multiplier: f64,
    /// Multiplier snapshot for the points dimension, captured at resolution.
    pub points_multiplier: f64,
    /// Once true the event is immutable and must never be applied again.
    pub applied: bool,
    /// The accrual record the event was applied to, if any.
    pub accrual_id: Option<Uuid>,
}

impl SupportEvent {
    /// A bare event with neutral multipliers and nothing resolved yet.
    pub fn new(id: EventId, kind: EventKind, occurred_at: time::OffsetDateTime) -> Self {
        Self {
            id,
            occurred_at,
            kind,
            command: None,
            value: CompactString::const_new(""),
            seconds_value: None,
            points_value: None,
            amount: 1.0,
            currency: CompactString::const_new(""),
            money: None,
            seconds_multiplier: 1.0,
            points_multiplier: 1.0,
            applied: false,
            accrual_id: None,
        }
    }

    /// Whether the event came from an operator command. Manual events are
    /// exempt from the power-hour multiplier.
    pub fn is_manual(&self) -> bool {
        self.kind == EventKind::ChatCommand
    }

    /// Final seconds to accrue:
    /// `ceil(amount * seconds_value * multiplier)`, with the multiplier
    /// forced to 1 for operator commands.
    pub fn final_seconds(&self) -> i64 {
        let per_unit = self.seconds_value.unwrap_or(0) as f64;
        let multiplier = if self.is_manual() {
            1.0
        } else {
            self.seconds_multiplier
        };
        (self.amount * per_unit * multiplier).ceil() as i64
    }

    /// Final points to accrue:
    /// `floor(amount * points_value * round(multiplier + 0.001))`, with the
    /// multiplier forced to 1 for operator commands.
    ///
    /// The `+ 0.001` nudge before rounding is kept exactly as the overlay
    /// expects it; values just under .5 round up.
    pub fn final_points(&self) -> i64 {
        let per_unit = self.points_value.unwrap_or(0) as f64;
        let multiplier = if self.is_manual() {
            1.0
        } else {
            (self.points_multiplier + 0.001).round()
        };
        (self.amount * per_unit * multiplier).floor() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn event(kind: EventKind) -> SupportEvent {
        SupportEvent::new(
            EventId::new("e1", kind.facts().platform),
            kind,
            OffsetDateTime::UNIX_EPOCH,
        )
    }

    #[test]
    fn final_seconds_ceils_through_the_multiplier() {
        let mut ev = event(EventKind::GiftedSub);
        ev.amount = 2.0;
        ev.seconds_value = Some(60);
        ev.seconds_multiplier = 2.0;
        assert_eq!(ev.final_seconds(), 240);
    }

    #[test]
    fn final_points_rounds_the_multiplier_with_a_nudge() {
        let mut ev = event(EventKind::GiftedSub);
        ev.amount = 2.0;
        ev.points_value = Some(1);
        ev.points_multiplier = 1.4999;
        // round(1.4999 + 0.001) = 2, floor(2 * 1 * 2) = 4
        assert_eq!(ev.final_points(), 4);
    }

    #[test]
    fn manual_events_bypass_the_multiplier() {
        let mut ev = event(EventKind::ChatCommand);
        ev.command = Some(CommandKind::AddTime);
        ev.seconds_value = Some(600);
        ev.seconds_multiplier = 3.0;
        ev.points_multiplier = 3.0;
        ev.points_value = Some(5);
        assert_eq!(ev.final_seconds(), 600);
        assert_eq!(ev.final_points(), 5);
    }

    #[test]
    fn derived_ids_are_stable_and_scoped_by_platform() {
        let a = EventId::derived(Platform::Twitch, &["user", "addtime", "10m"]);
        let b = EventId::derived(Platform::Twitch, &["user", "addtime", "10m"]);
        let c = EventId::derived(Platform::Manual, &["user", "addtime", "10m"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
