//! Currency normalizer.
//!
//! Keeps an in-memory exchange-rate table relative to the operator-chosen
//! base currency, refreshed from a daily feed. The on-disk cache file's
//! mtime decides staleness; refresh is single-flight behind one mutex so
//! concurrent converters block on the first fetch instead of racing it.

use crate::events::ErrorSink;
use compact_str::CompactString;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Rates older than this are refreshed from the feed.
const RATE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors surfaced by conversion. These never propagate through the event
/// pipeline; callers map them to a zero result plus an error event.
#[derive(Debug, Error)]
pub enum CurrencyError {
    /// No rate configured for the currency
    #[error("no exchange rate for currency {0}")]
    UnknownCurrency(CompactString),
    /// Feed fetch failed and no cache exists
    #[error("exchange rates unavailable: {0}")]
    Unavailable(String),
}

/// One entry of the daily feed document, keyed by currency code.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RateEntry {
    code: CompactString,
    rate: Decimal,
}

/// The cached document written next to the feed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RateDocument {
    base: CompactString,
    rates: HashMap<CompactString, RateEntry>,
}

pub struct CurrencyNormalizer {
    base: CompactString,
    feed_url: String,
    cache_path: PathBuf,
    rates: RwLock<HashMap<CompactString, Decimal>>,
    refresh_gate: Mutex<()>,
    http: reqwest::Client,
    errors: ErrorSink,
}

impl CurrencyNormalizer {
    pub fn new(
        base: impl Into<CompactString>,
        feed_url: impl Into<String>,
        cache_path: PathBuf,
        errors: ErrorSink,
    ) -> Self {
        Self {
            base: normalize_code(&base.into()),
            feed_url: feed_url.into(),
            cache_path,
            rates: RwLock::new(HashMap::new()),
            refresh_gate: Mutex::new(()),
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            errors,
        }
    }

    /// A normalizer with a fixed rate table and no feed; used in tests and
    /// offline runs.
    pub fn with_static_rates(
        base: impl Into<CompactString>,
        rates: HashMap<CompactString, Decimal>,
        errors: ErrorSink,
    ) -> Self {
        let normalizer = Self::new(base, String::new(), PathBuf::new(), errors);
        if let Ok(mut table) = normalizer.rates.write() {
            *table = rates;
        }
        normalizer
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Whether `code` can be converted: the base currency is always valid,
    /// anything else must appear in the rate table.
    pub fn is_valid_currency(&self, code: &str) -> bool {
        if code.eq_ignore_ascii_case(&self.base) {
            return true;
        }
        self.rates
            .read()
            .map(|table| table.contains_key(&normalize_code(code)))
            .unwrap_or(false)
    }

    /// Convert `amount` from `from` into `to` (the base currency when
    /// `to` is `None`).
    ///
    /// Two steps through the base: `amount / from_rate`, then
    /// `* to_rate`, with the second skipped when the target is the base.
    pub async fn convert(
        &self,
        amount: Decimal,
        from: &str,
        to: Option<&str>,
    ) -> Result<Decimal, CurrencyError> {
        self.ensure_fresh().await;

        let from = normalize_code(from);
        let target = to.map(normalize_code).unwrap_or_else(|| self.base.clone());

        let base_amount = if from == self.base {
            amount
        } else {
            amount / self.rate_for(&from)?
        };

        if target == self.base {
            return Ok(base_amount);
        }
        Ok(base_amount * self.rate_for(&target)?)
    }

    fn rate_for(&self, code: &CompactString) -> Result<Decimal, CurrencyError> {
        let rate = self
            .rates
            .read()
            .ok()
            .and_then(|table| table.get(code).copied());
        match rate {
            Some(rate) if !rate.is_zero() => Ok(rate),
            _ => {
                self.errors
                    .rejected("currency", format!("no exchange rate for {code}"));
                Err(CurrencyError::UnknownCurrency(code.clone()))
            }
        }
    }

    /// Refresh the table when the cache is stale. Single-flight: everyone
    /// blocks on the gate, the first holder fetches, the rest observe the
    /// post-refresh state on the re-check.
    async fn ensure_fresh(&self) {
        if self.feed_url.is_empty() {
            // Static table; nothing to refresh.
            return;
        }
        if !self.is_stale() {
            return;
        }

        let _guard = self.refresh_gate.lock().await;
        if !self.is_stale() {
            // Someone refreshed while we waited on the gate.
            return;
        }

        match self.fetch_feed().await {
            Ok(document) => {
                self.install(&document);
                if let Err(error) = self.write_cache(&document).await {
                    warn!(%error, "Failed to write rate cache");
                }
                info!(rates = document.rates.len(), "Exchange rates refreshed");
            }
            Err(error) => {
                self.errors
                    .transient("currency", format!("rate feed fetch failed: {error}"));
                warn!(%error, "Rate feed fetch failed, falling back to cache");
                match self.read_cache().await {
                    Ok(document) => self.install(&document),
                    Err(cache_error) => {
                        warn!(error = %cache_error, "No usable rate cache");
                    }
                }
            }
        }
    }

    fn is_stale(&self) -> bool {
        let empty = self.rates.read().map(|t| t.is_empty()).unwrap_or(true);
        if empty {
            return true;
        }
        match std::fs::metadata(&self.cache_path).and_then(|m| m.modified()) {
            Ok(modified) => SystemTime::now()
                .duration_since(modified)
                .map(|age| age > RATE_TTL)
                .unwrap_or(false),
            Err(_) => true,
        }
    }

    async fn fetch_feed(&self) -> Result<RateDocument, String> {
        let response = self
            .http
            .get(&self.feed_url)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;
        let rates: HashMap<CompactString, RateEntry> =
            response.json().await.map_err(|e| e.to_string())?;
        debug!(count = rates.len(), "Fetched rate feed");
        Ok(RateDocument {
            base: self.base.clone(),
            rates,
        })
    }

    fn install(&self, document: &RateDocument) {
        if let Ok(mut table) = self.rates.write() {
            *table = document
                .rates
                .values()
                .map(|entry| (normalize_code(&entry.code), entry.rate))
                .collect();
        }
    }

    async fn write_cache(&self, document: &RateDocument) -> Result<(), std::io::Error> {
        let body = serde_json::to_vec_pretty(document)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(&self.cache_path, body).await
    }

    async fn read_cache(&self) -> Result<RateDocument, std::io::Error> {
        let body = tokio::fs::read(&self.cache_path).await?;
        serde_json::from_slice(&body)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

fn normalize_code(code: &str) -> CompactString {
    CompactString::from(code.trim().to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use rust_decimal::prelude::FromPrimitive;

    fn normalizer() -> CurrencyNormalizer {
        let mut rates = HashMap::new();
        rates.insert(CompactString::from("USD"), Decimal::ONE);
        rates.insert(
            CompactString::from("CAD"),
            Decimal::from_f64(1.37).unwrap(),
        );
        rates.insert(
            CompactString::from("EUR"),
            Decimal::from_f64(0.92).unwrap(),
        );
        CurrencyNormalizer::with_static_rates("USD", rates, ErrorSink::disconnected())
    }

    #[tokio::test]
    async fn round_trip_stays_within_tolerance() {
        let n = normalizer();
        let cad = n
            .convert(Decimal::from(100), "USD", Some("CAD"))
            .await
            .unwrap();
        let usd = n.convert(cad, "CAD", Some("USD")).await.unwrap();
        let diff = (usd - Decimal::from(100)).abs();
        assert!(diff < Decimal::new(1, 6), "round trip drifted by {diff}");
    }

    #[tokio::test]
    async fn converting_to_base_skips_the_second_step() {
        let n = normalizer();
        let out = n
            .convert(Decimal::from_f64(13.70).unwrap(), "CAD", None)
            .await
            .unwrap();
        let expected = Decimal::from_f64(13.70).unwrap() / Decimal::from_f64(1.37).unwrap();
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn unknown_currency_is_rejected_not_thrown() {
        let n = normalizer();
        let result = n.convert(Decimal::from(5), "XYZ", None).await;
        assert!(matches!(result, Err(CurrencyError::UnknownCurrency(_))));
    }

    #[test]
    fn validity_covers_base_and_table() {
        let n = normalizer();
        assert!(n.is_valid_currency("usd"));
        assert!(n.is_valid_currency("CAD"));
        assert!(!n.is_valid_currency("XYZ"));
        assert!(!n.is_valid_currency(""));
    }
}
