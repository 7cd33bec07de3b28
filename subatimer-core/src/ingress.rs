//! Event ingress: resolution happens here, before queueing.
//!
//! Connectors hand over half-filled canonical events. The ingress looks up
//! configured values, normalizes money into the base currency, stamps the
//! multiplier snapshots, records the identity (dropping duplicates), and
//! pushes onto the ordered queue. Apply time never re-resolves anything.

use crate::currency::CurrencyNormalizer;
use crate::entities::SupportEvent;
use crate::entities::value_config::DEFAULT_META;
use crate::events::{ErrorSink, IngressReceiver};
use crate::multiplier::MultiplierEngine;
use crate::queue::EventQueue;
use crate::store::Store;
use crate::values::ValueResolver;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct EventIngress {
    resolver: Arc<ValueResolver>,
    currency: Arc<CurrencyNormalizer>,
    multiplier: Arc<MultiplierEngine>,
    store: Arc<dyn Store>,
    queue: EventQueue,
    errors: ErrorSink,
}

impl EventIngress {
    pub fn new(
        resolver: Arc<ValueResolver>,
        currency: Arc<CurrencyNormalizer>,
        multiplier: Arc<MultiplierEngine>,
        store: Arc<dyn Store>,
        queue: EventQueue,
        errors: ErrorSink,
    ) -> Self {
        Self {
            resolver,
            currency,
            multiplier,
            store,
            queue,
            errors,
        }
    }

    /// Run until shutdown, draining the connector feed.
    pub async fn run(self, mut event_rx: IngressReceiver, mut shutdown_rx: watch::Receiver<bool>) {
        info!("EventIngress started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("EventIngress received shutdown signal");
                        break;
                    }
                }

                Some(event) = event_rx.recv() => {
                    self.admit(event).await;
                }

                else => {
                    info!("Ingress channel closed");
                    break;
                }
            }
        }

        info!("EventIngress shutdown complete");
    }

    /// Resolve one event and enqueue it. Duplicates and unresolvable money
    /// are reported and dropped; nothing here fails the caller.
    pub async fn admit(&self, mut event: SupportEvent) {
        self.resolve(&mut event).await;

        match self.store.record_event(&event).await {
            Ok(true) => {}
            Ok(false) => {
                self.errors
                    .consistency("ingress", format!("duplicate event {}", event.id));
                debug!(event = %event.id, "Dropped duplicate event");
                return;
            }
            Err(error) => {
                warn!(event = %event.id, %error, "Failed to record event, dropping");
                return;
            }
        }

        debug!(event = %event.id, kind = %event.kind, "Event enqueued");
        self.queue.push(event);
    }

    async fn resolve(&self, event: &mut SupportEvent) {
        if event.is_manual() {
            // Operator commands arrive pre-resolved and multiplier-exempt.
            return;
        }

        let meta = if event.value.is_empty() {
            DEFAULT_META
        } else {
            event.value.as_str()
        };
        let (seconds, points) = self.resolver.resolve(event.kind, meta);
        event.seconds_value = Some(seconds);
        event.points_value = Some(points);

        let facts = event.kind.facts();
        if facts.is_cheer {
            // Cheer values are configured per 100 bits; the connector
            // reports raw bits.
            event.amount /= 100.0;
        } else if facts.is_monetary {
            self.normalize_money(event).await;
        }

        let (seconds_multiplier, points_multiplier) = self.multiplier.snapshot();
        event.seconds_multiplier = seconds_multiplier;
        event.points_multiplier = points_multiplier;
    }

    /// Turn the raw amount string into base-currency units. An unknown
    /// currency zeroes the event instead of erroring the pipeline.
    async fn normalize_money(&self, event: &mut SupportEvent) {
        let Ok(raw) = Decimal::from_str(event.value.trim()) else {
            self.errors.rejected(
                "ingress",
                format!("unparseable amount {:?} on {}", event.value, event.id),
            );
            event.amount = 0.0;
            event.money = None;
            return;
        };

        match self.currency.convert(raw, &event.currency, None).await {
            Ok(normalized) => {
                event.money = Some(normalized);
                event.amount = normalized.to_f64().unwrap_or(0.0);
            }
            Err(error) => {
                debug!(event = %event.id, %error, "Currency normalization failed");
                event.amount = 0.0;
                event.money = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::catalog::{EventKind, Platform};
    use crate::entities::EventId;
    use crate::store::MemoryStore;
    use compact_str::CompactString;
    use rust_decimal::prelude::FromPrimitive;
    use std::collections::HashMap;
    use time::OffsetDateTime;

    async fn ingress(store: Arc<MemoryStore>, engine: Arc<MultiplierEngine>) -> EventIngress {
        let resolver = Arc::new(
            ValueResolver::load(Arc::clone(&store) as Arc<dyn Store>)
                .await
                .unwrap(),
        );
        let mut rates = HashMap::new();
        rates.insert(CompactString::from("USD"), Decimal::ONE);
        rates.insert(CompactString::from("CAD"), Decimal::from_f64(2.0).unwrap());
        let currency = Arc::new(CurrencyNormalizer::with_static_rates(
            "USD",
            rates,
            ErrorSink::disconnected(),
        ));
        EventIngress::new(
            resolver,
            currency,
            engine,
            store,
            EventQueue::new(),
            ErrorSink::disconnected(),
        )
    }

    fn event(kind: EventKind, id: &str) -> SupportEvent {
        SupportEvent::new(
            EventId::new(id, kind.facts().platform),
            kind,
            OffsetDateTime::UNIX_EPOCH,
        )
    }

    #[tokio::test]
    async fn resolves_tier_values_and_snapshots_multipliers() {
        let store = Arc::new(MemoryStore::with_active_accrual("USD"));
        let engine = Arc::new(MultiplierEngine::new());
        let ingress = ingress(Arc::clone(&store), Arc::clone(&engine)).await;

        let mut ev = event(EventKind::GiftedSub, "g1");
        ev.value = "2000".into();
        ev.amount = 3.0;
        ingress.admit(ev).await;

        let stored = store.event("g1", Platform::Twitch).unwrap();
        assert_eq!(stored.seconds_value, Some(600));
        assert_eq!(stored.points_value, Some(2));
        assert_eq!(stored.seconds_multiplier, 1.0);
        assert_eq!(ingress.queue.len(), 1);
    }

    #[tokio::test]
    async fn normalizes_money_into_the_base_currency() {
        let store = Arc::new(MemoryStore::with_active_accrual("USD"));
        let ingress = ingress(Arc::clone(&store), Arc::new(MultiplierEngine::new())).await;

        let mut ev = event(EventKind::Donation, "d1");
        ev.value = "10.00".into();
        ev.currency = "CAD".into();
        ingress.admit(ev).await;

        let stored = store.event("d1", Platform::KoFi).unwrap();
        assert_eq!(stored.money, Some(Decimal::from(5)));
        assert_eq!(stored.amount, 5.0);
    }

    #[tokio::test]
    async fn unknown_currency_zeroes_the_event() {
        let store = Arc::new(MemoryStore::with_active_accrual("USD"));
        let ingress = ingress(Arc::clone(&store), Arc::new(MultiplierEngine::new())).await;

        let mut ev = event(EventKind::Tip, "t1");
        ev.value = "10.00".into();
        ev.currency = "XYZ".into();
        ingress.admit(ev).await;

        let stored = store.event("t1", Platform::StreamElements).unwrap();
        assert_eq!(stored.amount, 0.0);
        assert_eq!(stored.money, None);
        // Still queued: a zeroed event applies as a no-op.
        assert_eq!(ingress.queue.len(), 1);
    }

    #[tokio::test]
    async fn cheers_scale_bits_to_configured_units() {
        let store = Arc::new(MemoryStore::with_active_accrual("USD"));
        let ingress = ingress(Arc::clone(&store), Arc::new(MultiplierEngine::new())).await;

        let mut ev = event(EventKind::Cheer, "c1");
        ev.amount = 500.0; // bits
        ev.currency = "bits".into();
        ingress.admit(ev).await;

        let stored = store.event("c1", Platform::Twitch).unwrap();
        assert_eq!(stored.amount, 5.0);
        assert_eq!(stored.seconds_value, Some(30));
    }

    #[tokio::test]
    async fn duplicates_are_dropped_before_the_queue() {
        let store = Arc::new(MemoryStore::with_active_accrual("USD"));
        let ingress = ingress(Arc::clone(&store), Arc::new(MultiplierEngine::new())).await;

        let mut ev = event(EventKind::Subscription, "s1");
        ev.value = "1000".into();
        ingress.admit(ev.clone()).await;
        ingress.admit(ev).await;

        assert_eq!(ingress.queue.len(), 1);
    }
}
