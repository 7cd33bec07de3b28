//! The accrual record and its embedded power-hour multiplier.

use rust_decimal::Decimal;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// A power-hour multiplier owned by one accrual record.
#[derive(Debug, Clone, PartialEq)]
pub struct Multiplier {
    /// Neutral is 1.0.
    pub magnitude: f64,
    /// Absent means the multiplier runs until explicitly stopped.
    pub duration: Option<Duration>,
    pub started_at: Option<OffsetDateTime>,
    pub applies_to_time: bool,
    pub applies_to_points: bool,
    /// True when a platform event (hype train) started it, false for
    /// operator commands. Decides whether a new command may override it.
    pub from_automatic_source: bool,
}

impl Multiplier {
    pub const NEUTRAL: Multiplier = Multiplier {
        magnitude: 1.0,
        duration: None,
        started_at: None,
        applies_to_time: false,
        applies_to_points: false,
        from_automatic_source: false,
    };

    /// A multiplier is running iff its magnitude differs from 1 and it
    /// applies to at least one dimension.
    pub fn is_running(&self, now: OffsetDateTime) -> bool {
        if (self.magnitude - 1.0).abs() <= f64::EPSILON {
            return false;
        }
        if !self.applies_to_time && !self.applies_to_points {
            return false;
        }
        match (self.started_at, self.duration) {
            (Some(started), Some(duration)) => now < started + duration,
            _ => true,
        }
    }
}

impl Default for Multiplier {
    fn default() -> Self {
        Multiplier::NEUTRAL
    }
}

/// The singleton running total for the live subathon.
///
/// Exactly one record may be active at a time; that is defended at the
/// query layer, not by the storage engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Accrual {
    pub id: Uuid,
    /// Total time budget accumulated from events, in seconds.
    pub cumulative_seconds: i64,
    /// Time already counted down, in seconds.
    pub elapsed_seconds: i64,
    pub points: i64,
    pub money: Decimal,
    /// Base currency code for the money total.
    pub currency: compact_str::CompactString,
    pub paused: bool,
    pub locked: bool,
    pub active: bool,
    /// Counting up instead of down.
    pub reversed: bool,
    pub multiplier: Multiplier,
}

impl Accrual {
    pub fn new(currency: impl Into<compact_str::CompactString>) -> Self {
        Self {
            id: Uuid::new_v4(),
            cumulative_seconds: 0,
            elapsed_seconds: 0,
            points: 0,
            money: Decimal::ZERO,
            currency: currency.into(),
            paused: false,
            locked: false,
            active: true,
            reversed: false,
            multiplier: Multiplier::NEUTRAL,
        }
    }

    /// Remaining countdown seconds; a reversed accrual counts up instead.
    pub fn remaining_seconds(&self) -> i64 {
        if self.reversed {
            self.cumulative_seconds + self.elapsed_seconds
        } else {
            self.cumulative_seconds - self.elapsed_seconds
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_honors_the_reversed_flag() {
        let mut accrual = Accrual::new("USD");
        accrual.cumulative_seconds = 7200;
        accrual.elapsed_seconds = 600;
        assert_eq!(accrual.remaining_seconds(), 6600);
        accrual.reversed = true;
        assert_eq!(accrual.remaining_seconds(), 7800);
    }

    #[test]
    fn multiplier_running_rules() {
        let now = OffsetDateTime::UNIX_EPOCH + Duration::hours(1);
        let mut m = Multiplier::NEUTRAL;
        assert!(!m.is_running(now));

        m.magnitude = 2.0;
        assert!(!m.is_running(now), "no dimension enabled");

        m.applies_to_time = true;
        assert!(m.is_running(now), "indefinite multiplier runs");

        m.started_at = Some(OffsetDateTime::UNIX_EPOCH);
        m.duration = Some(Duration::minutes(10));
        assert!(!m.is_running(now), "expired multiplier is not running");

        m.duration = Some(Duration::hours(2));
        assert!(m.is_running(now));
    }
}
