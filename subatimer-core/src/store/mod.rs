//! The persistence contract the pipeline runs against.
//!
//! The core only needs four operations: read the active accrual, apply an
//! event's delta atomically, and read/write value configuration. The
//! Postgres implementation backs production; the in-memory one backs tests
//! and offline runs.

pub mod memory;
pub mod postgres;

use crate::entities::{Accrual, Multiplier, SupportEvent, ValueEntry};
use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Storage failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// The mutation an event resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum AccrualDelta {
    /// Regular accruing event or add/remove command.
    Add {
        seconds: i64,
        points: i64,
        money: Decimal,
    },
    /// `settime`: pin the remaining countdown to an absolute value.
    SetRemaining { seconds: i64 },
    /// `setpoints`: pin the point total.
    SetPoints { points: i64 },
    SetPaused(bool),
    SetLocked(bool),
    SetMultiplier(Multiplier),
    ClearMultiplier,
}

/// Result of [`Store::apply_event`].
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// The event was marked applied; `effective` says whether the accrual
    /// actually changed, `accrual` is the record after the apply.
    Applied { effective: bool, accrual: Accrual },
    /// The identity was already applied; nothing was touched.
    AlreadyApplied,
    /// Zero or multiple active accrual records; nothing was touched.
    NoActiveAccrual,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// The single active accrual record, if exactly one exists.
    async fn active_accrual(&self) -> Result<Option<Accrual>, StoreError>;

    /// Record an incoming event before it is queued.
    ///
    /// Returns false when the identity is already known (duplicate input).
    async fn record_event(&self, event: &SupportEvent) -> Result<bool, StoreError>;

    /// Apply `delta` to the active accrual and mark `event` applied, as one
    /// atomic unit. Idempotent per event identity.
    async fn apply_event(
        &self,
        event: &SupportEvent,
        delta: &AccrualDelta,
    ) -> Result<ApplyOutcome, StoreError>;

    /// Read the full value configuration table.
    async fn load_value_entries(&self) -> Result<Vec<ValueEntry>, StoreError>;

    /// Insert-or-update value configuration entries. Returns rows written.
    async fn upsert_value_entries(&self, entries: &[ValueEntry]) -> Result<u64, StoreError>;
}

/// Apply `delta` to a copy of `accrual`, reporting whether anything changed.
///
/// Shared by both store implementations so the numeric semantics cannot
/// drift between them.
pub(crate) fn apply_delta(accrual: &Accrual, delta: &AccrualDelta) -> (Accrual, bool) {
    let mut next = accrual.clone();
    let effective = match delta {
        AccrualDelta::Add {
            seconds,
            points,
            money,
        } => {
            next.cumulative_seconds += seconds;
            next.points += points;
            next.money += money;
            *seconds != 0 || *points != 0 || !money.is_zero()
        }
        AccrualDelta::SetRemaining { seconds } => {
            // remaining = reversed ? cumulative + elapsed : cumulative - elapsed
            next.cumulative_seconds = if next.reversed {
                seconds - next.elapsed_seconds
            } else {
                seconds + next.elapsed_seconds
            };
            accrual.remaining_seconds() != *seconds
        }
        AccrualDelta::SetPoints { points } => {
            next.points = *points;
            accrual.points != *points
        }
        AccrualDelta::SetPaused(paused) => {
            next.paused = *paused;
            accrual.paused != *paused
        }
        AccrualDelta::SetLocked(locked) => {
            next.locked = *locked;
            accrual.locked != *locked
        }
        AccrualDelta::SetMultiplier(multiplier) => {
            next.multiplier = multiplier.clone();
            accrual.multiplier != *multiplier
        }
        AccrualDelta::ClearMultiplier => {
            let was_set = accrual.multiplier != Multiplier::NEUTRAL;
            next.multiplier = Multiplier::NEUTRAL;
            was_set
        }
    };
    (next, effective)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_delta_is_effective_only_when_nonzero() {
        let accrual = Accrual::new("USD");
        let (next, effective) = apply_delta(
            &accrual,
            &AccrualDelta::Add {
                seconds: 360,
                points: 6,
                money: Decimal::ZERO,
            },
        );
        assert!(effective);
        assert_eq!(next.cumulative_seconds, 360);
        assert_eq!(next.points, 6);

        let (_, effective) = apply_delta(
            &accrual,
            &AccrualDelta::Add {
                seconds: 0,
                points: 0,
                money: Decimal::ZERO,
            },
        );
        assert!(!effective);
    }

    #[test]
    fn set_remaining_accounts_for_elapsed_time() {
        let mut accrual = Accrual::new("USD");
        accrual.cumulative_seconds = 3600;
        accrual.elapsed_seconds = 600;
        let (next, effective) =
            apply_delta(&accrual, &AccrualDelta::SetRemaining { seconds: 7200 });
        assert!(effective);
        assert_eq!(next.remaining_seconds(), 7200);
        assert_eq!(next.elapsed_seconds, 600);

        let (_, effective) = apply_delta(&next, &AccrualDelta::SetRemaining { seconds: 7200 });
        assert!(!effective);
    }

    #[test]
    fn set_remaining_on_a_reversed_accrual() {
        let mut accrual = Accrual::new("USD");
        accrual.reversed = true;
        accrual.cumulative_seconds = 100;
        accrual.elapsed_seconds = 40;
        let (next, _) = apply_delta(&accrual, &AccrualDelta::SetRemaining { seconds: 500 });
        assert_eq!(next.remaining_seconds(), 500);
    }

    #[test]
    fn flag_deltas_report_no_change_when_already_set() {
        let mut accrual = Accrual::new("USD");
        accrual.paused = true;
        let (_, effective) = apply_delta(&accrual, &AccrualDelta::SetPaused(true));
        assert!(!effective);
        let (next, effective) = apply_delta(&accrual, &AccrualDelta::SetPaused(false));
        assert!(effective);
        assert!(!next.paused);
    }
}
