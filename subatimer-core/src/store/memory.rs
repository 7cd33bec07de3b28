//! In-memory store used by tests and offline runs.

use super::{AccrualDelta, ApplyOutcome, Store, StoreError, apply_delta};
use crate::catalog::{EventKind, Platform};
use crate::entities::{Accrual, SupportEvent, ValueEntry};
use async_trait::async_trait;
use compact_str::CompactString;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct State {
    accruals: Vec<Accrual>,
    events: HashMap<(CompactString, Platform), SupportEvent>,
    values: HashMap<(EventKind, CompactString), ValueEntry>,
}

/// A [`Store`] holding everything behind one mutex.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store seeded with a single fresh active accrual.
    pub fn with_active_accrual(currency: &str) -> Self {
        let store = Self::new();
        store.insert_accrual(Accrual::new(currency));
        store
    }

    pub fn insert_accrual(&self, accrual: Accrual) {
        if let Ok(mut state) = self.state.lock() {
            state.accruals.push(accrual);
        }
    }

    /// Test helper: the stored copy of an event, if any.
    pub fn event(&self, external_id: &str, platform: Platform) -> Option<SupportEvent> {
        self.state
            .lock()
            .ok()?
            .events
            .get(&(CompactString::from(external_id), platform))
            .cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock means a panic mid-mutation in this process;
        // recover the data rather than cascading.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn active_accrual(&self) -> Result<Option<Accrual>, StoreError> {
        let state = self.lock();
        let mut active = state.accruals.iter().filter(|a| a.active);
        match (active.next(), active.next()) {
            (Some(accrual), None) => Ok(Some(accrual.clone())),
            _ => Ok(None),
        }
    }

    async fn record_event(&self, event: &SupportEvent) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let key = (event.id.external_id.clone(), event.id.platform);
        if state.events.contains_key(&key) {
            return Ok(false);
        }
        state.events.insert(key, event.clone());
        Ok(true)
    }

    async fn apply_event(
        &self,
        event: &SupportEvent,
        delta: &AccrualDelta,
    ) -> Result<ApplyOutcome, StoreError> {
        let mut state = self.lock();

        let key = (event.id.external_id.clone(), event.id.platform);
        if state.events.get(&key).is_some_and(|e| e.applied) {
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        let active: Vec<usize> = state
            .accruals
            .iter()
            .enumerate()
            .filter(|(_, a)| a.active)
            .map(|(i, _)| i)
            .collect();
        let [index] = active[..] else {
            return Ok(ApplyOutcome::NoActiveAccrual);
        };

        let (next, effective) = apply_delta(&state.accruals[index], delta);
        let accrual = next.clone();
        state.accruals[index] = next;

        let mut stored = event.clone();
        stored.applied = true;
        stored.accrual_id = Some(accrual.id);
        state.events.insert(key, stored);

        Ok(ApplyOutcome::Applied { effective, accrual })
    }

    async fn load_value_entries(&self) -> Result<Vec<ValueEntry>, StoreError> {
        Ok(self.lock().values.values().cloned().collect())
    }

    async fn upsert_value_entries(&self, entries: &[ValueEntry]) -> Result<u64, StoreError> {
        let mut state = self.lock();
        for entry in entries {
            state
                .values
                .insert((entry.kind, entry.meta.clone()), entry.clone());
        }
        Ok(entries.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::entities::EventId;
    use rust_decimal::Decimal;

    fn gift_event(id: &str) -> SupportEvent {
        let mut ev = SupportEvent::new(
            EventId::new(id, Platform::Twitch),
            EventKind::GiftedSub,
            time::OffsetDateTime::UNIX_EPOCH,
        );
        ev.amount = 3.0;
        ev.seconds_value = Some(120);
        ev.points_value = Some(2);
        ev
    }

    #[tokio::test]
    async fn apply_is_idempotent_per_identity() {
        let store = MemoryStore::with_active_accrual("USD");
        let ev = gift_event("g1");
        let delta = AccrualDelta::Add {
            seconds: ev.final_seconds(),
            points: ev.final_points(),
            money: Decimal::ZERO,
        };

        let first = store.apply_event(&ev, &delta).await.unwrap();
        assert!(matches!(
            first,
            ApplyOutcome::Applied {
                effective: true,
                ..
            }
        ));

        let second = store.apply_event(&ev, &delta).await.unwrap();
        assert_eq!(second, ApplyOutcome::AlreadyApplied);

        let accrual = store.active_accrual().await.unwrap().unwrap();
        assert_eq!(accrual.cumulative_seconds, 360);
        assert_eq!(accrual.points, 6);
    }

    #[tokio::test]
    async fn apply_without_an_active_accrual_is_a_noop() {
        let store = MemoryStore::new();
        let ev = gift_event("g1");
        let outcome = store
            .apply_event(
                &ev,
                &AccrualDelta::Add {
                    seconds: 10,
                    points: 0,
                    money: Decimal::ZERO,
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::NoActiveAccrual);
        assert!(store.event("g1", Platform::Twitch).is_none());
    }

    #[tokio::test]
    async fn two_active_accruals_defeat_the_single_row_assumption() {
        let store = MemoryStore::with_active_accrual("USD");
        store.insert_accrual(Accrual::new("USD"));
        assert!(store.active_accrual().await.unwrap().is_none());
        let outcome = store
            .apply_event(
                &gift_event("g2"),
                &AccrualDelta::Add {
                    seconds: 10,
                    points: 0,
                    money: Decimal::ZERO,
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::NoActiveAccrual);
    }

    #[tokio::test]
    async fn record_event_detects_duplicates() {
        let store = MemoryStore::new();
        let ev = gift_event("dup");
        assert!(store.record_event(&ev).await.unwrap());
        assert!(!store.record_event(&ev).await.unwrap());
    }
}
