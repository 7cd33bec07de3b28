//! Accrual applier: turns a resolved event into an atomic store mutation.
//!
//! Uses the multiplier snapshots stamped on the event, never the live
//! engine, so a power-hour change between enqueue and apply does not
//! rewrite a queued event's value.

use crate::catalog::CommandKind;
use crate::entities::SupportEvent;
use crate::events::{AccrualSnapshot, ErrorSink};
use crate::multiplier::{MultiplierCommand, MultiplierEngine, parse_multiplier_command};
use crate::settings::SettingsReceiver;
use crate::store::{AccrualDelta, ApplyOutcome, Store, StoreError};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

/// What one apply produced, for the processed fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyReport {
    /// Whether the accrual actually changed.
    pub effective: bool,
    /// Running totals after the apply; absent when no accrual was touched.
    pub totals: Option<AccrualSnapshot>,
}

impl ApplyReport {
    fn untouched() -> Self {
        Self {
            effective: false,
            totals: None,
        }
    }
}

pub struct AccrualApplier {
    store: Arc<dyn Store>,
    multiplier: Arc<MultiplierEngine>,
    settings_rx: SettingsReceiver,
    errors: ErrorSink,
}

impl AccrualApplier {
    pub fn new(
        store: Arc<dyn Store>,
        multiplier: Arc<MultiplierEngine>,
        settings_rx: SettingsReceiver,
        errors: ErrorSink,
    ) -> Self {
        Self {
            store,
            multiplier,
            settings_rx,
            errors,
        }
    }

    /// Apply one event, at most once per identity. Consistency violations
    /// (duplicate identity, no single active accrual) are no-ops, not
    /// errors.
    pub async fn apply(&self, event: &SupportEvent) -> Result<ApplyReport, StoreError> {
        let Some(delta) = self.resolve_delta(event) else {
            return Ok(ApplyReport::untouched());
        };

        match self.store.apply_event(event, &delta).await? {
            ApplyOutcome::Applied { effective, accrual } => {
                debug!(event = %event.id, effective, "Event applied");
                Ok(ApplyReport {
                    effective,
                    totals: Some(AccrualSnapshot {
                        remaining_seconds: accrual.remaining_seconds(),
                        points: accrual.points,
                    }),
                })
            }
            ApplyOutcome::AlreadyApplied => {
                self.errors.consistency(
                    "applier",
                    format!("event {} was already applied", event.id),
                );
                Ok(ApplyReport::untouched())
            }
            ApplyOutcome::NoActiveAccrual => {
                self.errors
                    .consistency("applier", "no single active accrual record");
                warn!(event = %event.id, "Apply skipped, no single active accrual");
                Ok(ApplyReport::untouched())
            }
        }
    }

    /// Map the event to its store mutation. `None` means the event carries
    /// nothing applicable (e.g. an overlay refresh that leaked through).
    fn resolve_delta(&self, event: &SupportEvent) -> Option<AccrualDelta> {
        match event.command {
            None | Some(CommandKind::AddTime | CommandKind::RemoveTime) => {
                Some(AccrualDelta::Add {
                    seconds: event.final_seconds(),
                    points: event.final_points(),
                    money: event.money.unwrap_or(Decimal::ZERO),
                })
            }
            Some(CommandKind::AddPoints | CommandKind::RemovePoints) => Some(AccrualDelta::Add {
                seconds: 0,
                points: event.final_points(),
                money: Decimal::ZERO,
            }),
            Some(CommandKind::SetTime) => Some(AccrualDelta::SetRemaining {
                seconds: event.seconds_value.unwrap_or(0),
            }),
            Some(CommandKind::SetPoints) => Some(AccrualDelta::SetPoints {
                points: event.points_value.unwrap_or(0),
            }),
            Some(CommandKind::Pause) => Some(AccrualDelta::SetPaused(true)),
            Some(CommandKind::Resume) => Some(AccrualDelta::SetPaused(false)),
            Some(CommandKind::Lock) => Some(AccrualDelta::SetLocked(true)),
            Some(CommandKind::Unlock) => Some(AccrualDelta::SetLocked(false)),
            Some(CommandKind::SetMultiplier) => {
                let prefix = self.settings_rx.borrow().command_prefix;
                match parse_multiplier_command(&event.value, prefix, false) {
                    MultiplierCommand::Start(multiplier) => {
                        self.multiplier.set(multiplier);
                        Some(AccrualDelta::SetMultiplier(self.multiplier.current()))
                    }
                    MultiplierCommand::Stop => {
                        self.multiplier.clear();
                        Some(AccrualDelta::ClearMultiplier)
                    }
                }
            }
            Some(CommandKind::StopMultiplier) => {
                self.multiplier.clear();
                Some(AccrualDelta::ClearMultiplier)
            }
            Some(CommandKind::RefreshOverlays) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::catalog::{EventKind, Platform};
    use crate::entities::EventId;
    use crate::multiplier::Dimension;
    use crate::settings::{Settings, settings_channel};
    use crate::store::MemoryStore;
    use time::OffsetDateTime;

    fn applier(store: Arc<MemoryStore>) -> AccrualApplier {
        AccrualApplier::new(
            store,
            Arc::new(MultiplierEngine::new()),
            settings_channel(Settings::default()).1,
            ErrorSink::disconnected(),
        )
    }

    fn command_event(id: &str, command: CommandKind) -> SupportEvent {
        let mut ev = SupportEvent::new(
            EventId::new(id, Platform::Manual),
            EventKind::ChatCommand,
            OffsetDateTime::UNIX_EPOCH,
        );
        ev.command = Some(command);
        ev
    }

    #[tokio::test]
    async fn gifted_sub_scenario_applies_once() {
        let store = Arc::new(MemoryStore::with_active_accrual("USD"));
        let applier = applier(Arc::clone(&store));

        let mut ev = SupportEvent::new(
            EventId::new("gift-1", Platform::Twitch),
            EventKind::GiftedSub,
            OffsetDateTime::UNIX_EPOCH,
        );
        ev.amount = 3.0;
        ev.value = "2000".into();
        ev.seconds_value = Some(120);
        ev.points_value = Some(2);
        ev.seconds_multiplier = 1.0;
        ev.points_multiplier = 1.0;

        let report = applier.apply(&ev).await.unwrap();
        assert!(report.effective);
        assert_eq!(
            report.totals,
            Some(AccrualSnapshot {
                remaining_seconds: 360,
                points: 6,
            })
        );
        let accrual = store.active_accrual().await.unwrap().unwrap();
        assert_eq!(accrual.cumulative_seconds, 360);
        assert_eq!(accrual.points, 6);

        // Same identity again: idempotent no-op.
        let report = applier.apply(&ev).await.unwrap();
        assert!(!report.effective);
        assert_eq!(report.totals, None);
        let accrual = store.active_accrual().await.unwrap().unwrap();
        assert_eq!(accrual.cumulative_seconds, 360);
        assert_eq!(accrual.points, 6);
    }

    #[tokio::test]
    async fn set_time_pins_the_remaining_countdown() {
        let store = Arc::new(MemoryStore::with_active_accrual("USD"));
        let applier = applier(Arc::clone(&store));

        let mut ev = command_event("c1", CommandKind::SetTime);
        ev.seconds_value = Some(7200);
        assert!(applier.apply(&ev).await.unwrap().effective);
        let accrual = store.active_accrual().await.unwrap().unwrap();
        assert_eq!(accrual.remaining_seconds(), 7200);
    }

    #[tokio::test]
    async fn pause_and_resume_toggle_the_flag() {
        let store = Arc::new(MemoryStore::with_active_accrual("USD"));
        let applier = applier(Arc::clone(&store));

        assert!(
            applier
                .apply(&command_event("p1", CommandKind::Pause))
                .await
                .unwrap()
                .effective
        );
        assert!(store.active_accrual().await.unwrap().unwrap().paused);

        // Pausing again (a new identity) changes nothing.
        assert!(
            !applier
                .apply(&command_event("p2", CommandKind::Pause))
                .await
                .unwrap()
                .effective
        );

        assert!(
            applier
                .apply(&command_event("r1", CommandKind::Resume))
                .await
                .unwrap()
                .effective
        );
        assert!(!store.active_accrual().await.unwrap().unwrap().paused);
    }

    #[tokio::test]
    async fn multiplier_command_updates_engine_and_store() {
        let store = Arc::new(MemoryStore::with_active_accrual("USD"));
        let engine = Arc::new(MultiplierEngine::new());
        let applier = AccrualApplier::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::clone(&engine),
            settings_channel(Settings::default()).1,
            ErrorSink::disconnected(),
        );

        let mut ev = command_event("m1", CommandKind::SetMultiplier);
        ev.value = "2xpt 30m".into();
        assert!(applier.apply(&ev).await.unwrap().effective);
        assert_eq!(engine.effective(Dimension::Time), 2.0);
        let accrual = store.active_accrual().await.unwrap().unwrap();
        assert_eq!(accrual.multiplier.magnitude, 2.0);
        assert!(accrual.multiplier.applies_to_time);

        let mut stop = command_event("m2", CommandKind::StopMultiplier);
        stop.value = "stopmultiplier".into();
        assert!(applier.apply(&stop).await.unwrap().effective);
        assert_eq!(engine.effective(Dimension::Time), 1.0);
        let accrual = store.active_accrual().await.unwrap().unwrap();
        assert_eq!(accrual.multiplier.magnitude, 1.0);
    }

    #[tokio::test]
    async fn multiplier_parsing_honors_the_configured_prefix() {
        let store = Arc::new(MemoryStore::with_active_accrual("USD"));
        let engine = Arc::new(MultiplierEngine::new());
        let settings = Settings {
            command_prefix: '~',
            ..Settings::default()
        };
        let applier = AccrualApplier::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::clone(&engine),
            settings_channel(settings).1,
            ErrorSink::disconnected(),
        );

        // "~addtime1" carries a digit but mentions a command under the
        // configured prefix, so only 5m counts toward the duration.
        let mut ev = command_event("m3", CommandKind::SetMultiplier);
        ev.value = "2xt ~addtime1 5m".into();
        assert!(applier.apply(&ev).await.unwrap().effective);
        assert_eq!(engine.current().duration, Some(time::Duration::minutes(5)));
    }
}
