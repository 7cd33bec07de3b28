//! Synthetic event generator for dry runs.
//!
//! Feeds the pipeline a trickle of simulated-source events so the whole
//! path (resolution, queue, apply, notifier) can be exercised without any
//! live platform connection.

use rand::Rng;
use std::time::Duration;
use subatimer_core::catalog::{EventKind, Platform};
use subatimer_core::entities::{EventId, SupportEvent};
use subatimer_core::events::IngressSender;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, info};

const TICK: Duration = Duration::from_secs(20);

pub async fn run(ingress_tx: IngressSender, mut shutdown_rx: watch::Receiver<bool>) {
    info!("Event simulator started");
    let mut ticker = tokio::time::interval(TICK);
    let mut sequence = 0u64;

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => {
                let event = synthesize(sequence);
                sequence += 1;
                debug!(event = %event.id, kind = %event.kind, "Simulated event");
                if ingress_tx.send(event).await.is_err() {
                    break;
                }
            }
        }
    }

    info!("Event simulator stopped");
}

fn synthesize(sequence: u64) -> SupportEvent {
    let mut rng = rand::rng();
    let id = EventId::new(format!("sim-{sequence}"), Platform::Simulated);
    let now = OffsetDateTime::now_utc();

    match rng.random_range(0..4u8) {
        0 => {
            let mut ev = SupportEvent::new(id, EventKind::GiftedSub, now);
            ev.amount = rng.random_range(1..=5) as f64;
            ev.value = "1000".into();
            ev.currency = "sub".into();
            ev
        }
        1 => {
            let mut ev = SupportEvent::new(id, EventKind::Cheer, now);
            ev.amount = rng.random_range(1..=10) as f64 * 100.0;
            ev.currency = "bits".into();
            ev
        }
        2 => {
            let mut ev = SupportEvent::new(id, EventKind::Donation, now);
            ev.value = format!("{}.00", rng.random_range(1..=20)).into();
            ev.currency = "USD".into();
            ev
        }
        _ => {
            let mut ev = SupportEvent::new(id, EventKind::Subscription, now);
            ev.amount = 1.0;
            ev.value = "1000".into();
            ev.currency = "sub".into();
            ev
        }
    }
}
