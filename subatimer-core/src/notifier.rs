//! Outbound webhook notifier.
//!
//! Subscribes to the processed-event fanout, buffers the events that pass
//! the configured allow-list, and periodically flushes them to a Discord
//! webhook as embed batches. Delivery is best effort: a failed POST is
//! logged and the batch is dropped, never retried.

use crate::entities::SupportEvent;
use crate::events::{ProcessedEvent, ProcessedReceiver};
use crate::settings::{Settings, WebhookSettings};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// How often the buffer is flushed.
const FLUSH_INTERVAL: Duration = Duration::from_secs(60);
/// Most events drained per flush. Discord allows roughly 30 requests per
/// minute per webhook; 15 messages of 10 embeds stays well under that.
const FLUSH_CAP: usize = 150;
/// Discord caps embeds per message at 10.
const EMBEDS_PER_MESSAGE: usize = 10;
/// Pause between messages within one flush.
const MESSAGE_GAP: Duration = Duration::from_secs(4);

/// Green for an apply that changed the accrual.
const COLOR_PROCESSED: u32 = 0x2ecc71;
/// Orange for anything that left the accrual untouched.
const COLOR_PENDING: u32 = 0xe67e22;

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    username: &'a str,
    embeds: &'a [Embed],
}

#[derive(Debug, Clone, Serialize)]
struct Embed {
    title: String,
    description: String,
    color: u32,
    timestamp: String,
    footer: EmbedFooter,
}

#[derive(Debug, Clone, Serialize)]
struct EmbedFooter {
    text: String,
}

/// Whether the configured allow-list admits this event.
fn accepts(settings: &WebhookSettings, event: &SupportEvent, simulated: bool) -> bool {
    if settings.url.is_none() {
        return false;
    }
    if simulated && !settings.include_simulated {
        return false;
    }
    settings.allowed_kinds.contains(&event.kind)
}

fn embed_for(processed: &ProcessedEvent) -> Embed {
    let event = &processed.event;
    let facts = event.kind.facts();
    let mut description = format!("amount: {}", event.amount);
    if let Some(money) = event.money {
        description.push_str(&format!(" ({} {})", money.round_dp(2), event.currency));
    }
    description.push_str(&format!(
        "\n+{}s, +{} points",
        event.final_seconds(),
        event.final_points()
    ));

    let mut footer = event.id.to_string();
    if let Some(totals) = processed.totals {
        footer.push_str(&format!(
            " | {}s remaining, {} points",
            totals.remaining_seconds, totals.points
        ));
    }

    Embed {
        title: facts.label.to_string(),
        description,
        color: if processed.effective {
            COLOR_PROCESSED
        } else {
            COLOR_PENDING
        },
        timestamp: event
            .occurred_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| event.occurred_at.unix_timestamp().to_string()),
        footer: EmbedFooter { text: footer },
    }
}

pub struct OutboundNotifier {
    processed_rx: ProcessedReceiver,
    settings_rx: watch::Receiver<Arc<Settings>>,
    http_client: reqwest::Client,
    buffer: VecDeque<Embed>,
}

impl OutboundNotifier {
    pub fn new(
        processed_rx: ProcessedReceiver,
        settings_rx: watch::Receiver<Arc<Settings>>,
    ) -> Self {
        Self {
            processed_rx,
            settings_rx,
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            buffer: VecDeque::new(),
        }
    }

    /// Run until shutdown. A final flush is attempted on the way out.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("OutboundNotifier started");

        let mut flush_timer = tokio::time::interval(FLUSH_INTERVAL);
        flush_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it.
        flush_timer.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("OutboundNotifier received shutdown signal");
                        break;
                    }
                }

                received = self.processed_rx.recv() => {
                    match received {
                        Ok(processed) => self.enqueue(&processed),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Notifier lagged behind the processed feed");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("Processed-event channel closed");
                            break;
                        }
                    }
                }

                _ = flush_timer.tick() => {
                    self.flush().await;
                }
            }
        }

        self.flush().await;
        info!("OutboundNotifier shutdown complete");
    }

    fn enqueue(&mut self, processed: &ProcessedEvent) {
        let settings = self.settings_rx.borrow().clone();
        let simulated = processed.event.id.platform == crate::catalog::Platform::Simulated;
        if !accepts(&settings.webhook, &processed.event, simulated) {
            return;
        }
        self.buffer.push_back(embed_for(processed));
    }

    /// Drain up to the per-flush cap and POST it in embed batches.
    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let settings = self.settings_rx.borrow().clone();
        let Some(url) = settings.webhook.url.clone() else {
            // Webhook got unconfigured while events were buffered.
            self.buffer.clear();
            return;
        };

        let take = self.buffer.len().min(FLUSH_CAP);
        let batch: Vec<Embed> = self.buffer.drain(..take).collect();
        debug!(events = batch.len(), "Flushing webhook notifications");

        let mut first = true;
        for chunk in batch.chunks(EMBEDS_PER_MESSAGE) {
            if !first {
                tokio::time::sleep(MESSAGE_GAP).await;
            }
            first = false;
            self.post(&url, &settings.webhook.username, chunk).await;
        }
    }

    async fn post(&self, url: &str, username: &str, embeds: &[Embed]) {
        let payload = WebhookPayload { username, embeds };
        match self.http_client.post(url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(embeds = embeds.len(), "Webhook message delivered");
            }
            Ok(response) => {
                warn!(status = %response.status(), "Webhook message rejected, dropping");
            }
            Err(error) => {
                warn!(%error, "Webhook request failed, dropping");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::catalog::EventKind;
    use crate::entities::EventId;
    use crate::events::AccrualSnapshot;
    use time::OffsetDateTime;

    fn event(kind: EventKind) -> SupportEvent {
        let mut ev = SupportEvent::new(
            EventId::new("n1", kind.facts().platform),
            kind,
            OffsetDateTime::UNIX_EPOCH,
        );
        ev.amount = 2.0;
        ev.seconds_value = Some(60);
        ev.points_value = Some(1);
        ev
    }

    fn settings(kinds: &[EventKind]) -> WebhookSettings {
        WebhookSettings {
            url: Some("https://discord.test/webhook".into()),
            username: "subatimer".into(),
            allowed_kinds: kinds.to_vec(),
            include_simulated: false,
        }
    }

    #[test]
    fn allow_list_filters_kinds() {
        let settings = settings(&[EventKind::GiftedSub]);
        assert!(accepts(&settings, &event(EventKind::GiftedSub), false));
        assert!(!accepts(&settings, &event(EventKind::Raid), false));
    }

    #[test]
    fn simulated_events_are_skipped_unless_opted_in() {
        let mut settings = settings(&[EventKind::GiftedSub]);
        assert!(!accepts(&settings, &event(EventKind::GiftedSub), true));
        settings.include_simulated = true;
        assert!(accepts(&settings, &event(EventKind::GiftedSub), true));
    }

    #[test]
    fn no_url_means_nothing_is_accepted() {
        let mut settings = settings(&[EventKind::GiftedSub]);
        settings.url = None;
        assert!(!accepts(&settings, &event(EventKind::GiftedSub), false));
    }

    #[test]
    fn embed_carries_label_timestamp_and_per_event_values() {
        let ev = event(EventKind::GiftedSub);
        let embed = embed_for(&ProcessedEvent {
            event: ev.clone(),
            effective: true,
            totals: None,
        });
        assert_eq!(embed.title, "Gifted Sub");
        assert_eq!(embed.timestamp, "1970-01-01T00:00:00Z");
        assert_eq!(embed.footer.text, ev.id.to_string());
        assert!(embed.description.contains("+120s"));
    }

    #[test]
    fn embed_color_tracks_whether_the_apply_took_effect() {
        let ev = event(EventKind::GiftedSub);
        let applied = embed_for(&ProcessedEvent {
            event: ev.clone(),
            effective: true,
            totals: None,
        });
        assert_eq!(applied.color, COLOR_PROCESSED);

        let pending = embed_for(&ProcessedEvent {
            event: ev,
            effective: false,
            totals: None,
        });
        assert_eq!(pending.color, COLOR_PENDING);
    }

    #[test]
    fn embed_footer_reports_identity_and_running_totals() {
        let ev = event(EventKind::GiftedSub);
        let embed = embed_for(&ProcessedEvent {
            event: ev.clone(),
            effective: true,
            totals: Some(AccrualSnapshot {
                remaining_seconds: 5400,
                points: 12,
            }),
        });
        assert_eq!(
            embed.footer.text,
            format!("{} | 5400s remaining, 12 points", ev.id)
        );
    }

    #[test]
    fn flush_cap_and_chunk_size_line_up() {
        // The cap must divide evenly into full messages.
        assert_eq!(FLUSH_CAP % EMBEDS_PER_MESSAGE, 0);
    }
}
