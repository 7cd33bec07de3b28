//! Reconnect supervision for platform connectors.
//!
//! A connector that loses its upstream hands its re-dial attempt to a
//! `ReconnectSupervisor`. The supervisor serializes attempts through a
//! gate so overlapping disconnect signals cannot stack dials, backs off
//! with doubling delays up to a ceiling, and gives up after a bounded
//! number of retries.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub ceiling: Duration,
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(2),
            ceiling: Duration::from_secs(300),
            max_retries: 10,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (0-based): initial * 2^attempt,
    /// clamped at the ceiling.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.ceiling)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// The connector is back up after this many dials.
    Reconnected { attempts: u32 },
    /// Every retry failed; the connector stays down.
    GaveUp { attempts: u32 },
    /// Shutdown arrived mid-backoff.
    ShuttingDown,
    /// Another reconnect for the same supervisor is already running.
    AlreadyInProgress,
}

pub struct ReconnectSupervisor {
    label: &'static str,
    policy: BackoffPolicy,
    attempts: AtomicU32,
    gate: Mutex<()>,
}

impl ReconnectSupervisor {
    pub fn new(label: &'static str, policy: BackoffPolicy) -> Self {
        Self {
            label,
            policy,
            attempts: AtomicU32::new(0),
            gate: Mutex::new(()),
        }
    }

    /// Whether a reconnect is currently in flight.
    pub fn is_reconnecting(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    /// Dial until `connect` succeeds, the retry budget runs out, or
    /// shutdown is signalled. The first dial happens immediately; each
    /// failure doubles the wait before the next one.
    pub async fn reconnect<F, Fut, E>(
        &self,
        mut connect: F,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> ReconnectOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        let Ok(_guard) = self.gate.try_lock() else {
            return ReconnectOutcome::AlreadyInProgress;
        };

        loop {
            if *shutdown_rx.borrow() {
                return ReconnectOutcome::ShuttingDown;
            }

            let attempt = self.attempts.load(Ordering::Relaxed);
            match connect().await {
                Ok(()) => {
                    self.attempts.store(0, Ordering::Relaxed);
                    info!(connector = self.label, attempts = attempt + 1, "Reconnected");
                    return ReconnectOutcome::Reconnected {
                        attempts: attempt + 1,
                    };
                }
                Err(error) => {
                    let failed = attempt + 1;
                    self.attempts.store(failed, Ordering::Relaxed);
                    if failed >= self.policy.max_retries {
                        warn!(
                            connector = self.label,
                            attempts = failed,
                            %error,
                            "Giving up on reconnect"
                        );
                        self.attempts.store(0, Ordering::Relaxed);
                        return ReconnectOutcome::GaveUp { attempts: failed };
                    }

                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        connector = self.label,
                        attempt = failed,
                        delay_secs = delay.as_secs(),
                        %error,
                        "Reconnect failed, backing off"
                    );

                    tokio::select! {
                        biased;

                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                return ReconnectOutcome::ShuttingDown;
                            }
                        }

                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    fn fast_policy(max_retries: u32) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(10),
            ceiling: Duration::from_millis(80),
            max_retries,
        }
    }

    #[test]
    fn delays_double_and_clamp_at_the_ceiling() {
        let policy = BackoffPolicy {
            initial: Duration::from_secs(2),
            ceiling: Duration::from_secs(300),
            max_retries: 10,
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(32));
        assert_eq!(policy.delay_for(8), Duration::from_secs(300));
        assert_eq!(policy.delay_for(31), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures_and_resets() {
        let supervisor = ReconnectSupervisor::new("twitch", fast_policy(5));
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let outcome = supervisor
            .reconnect(
                move || {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err("connection refused")
                        } else {
                            Ok(())
                        }
                    }
                },
                &mut shutdown_rx,
            )
            .await;

        assert_eq!(outcome, ReconnectOutcome::Reconnected { attempts: 3 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(supervisor.attempts.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_the_retry_budget() {
        let supervisor = ReconnectSupervisor::new("twitch", fast_policy(3));
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let outcome = supervisor
            .reconnect(
                || async { Err::<(), _>("still down") },
                &mut shutdown_rx,
            )
            .await;

        assert_eq!(outcome, ReconnectOutcome::GaveUp { attempts: 3 });
        // The budget resets so a later disconnect gets fresh retries.
        assert_eq!(supervisor.attempts.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_a_pending_backoff() {
        let supervisor = ReconnectSupervisor::new("twitch", fast_policy(10));
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();

        let outcome = supervisor
            .reconnect(
                || async { Err::<(), _>("still down") },
                &mut shutdown_rx,
            )
            .await;

        assert_eq!(outcome, ReconnectOutcome::ShuttingDown);
    }

    #[tokio::test]
    async fn overlapping_reconnects_are_rejected() {
        let supervisor = Arc::new(ReconnectSupervisor::new("twitch", fast_policy(10)));
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let inner = Arc::clone(&supervisor);
        let handle = tokio::spawn(async move {
            let (_tx, mut rx) = watch::channel(false);
            inner
                .reconnect(|| std::future::pending::<Result<(), &str>>(), &mut rx)
                .await
        });

        tokio::task::yield_now().await;
        assert!(supervisor.is_reconnecting());
        assert_eq!(
            supervisor
                .reconnect(|| async { Ok::<(), &str>(()) }, &mut shutdown_rx)
                .await,
            ReconnectOutcome::AlreadyInProgress
        );
        handle.abort();
    }
}
