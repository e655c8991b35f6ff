//! Offline stand-in for the live rate source.
//!
//! Serves approximate demo rates with a little random noise so repeated
//! lookups behave like a live feed. Not suitable for real conversions.

use crate::core::currency::{PIVOT_CURRENCY, RateSource, RateTable, normalize_code};
use crate::core::error::{RateError, RateResult};
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use tracing::debug;

/// Approximate USD quotes used in offline mode.
const DEMO_USD_RATES: &[(&str, f64)] = &[
    ("CNY", 7.2345),
    ("EUR", 0.8234),
    ("GBP", 0.7123),
    ("JPY", 149.56),
    ("KRW", 1324.45),
    ("HKD", 7.8123),
    ("SGD", 1.3456),
    ("AUD", 1.5234),
    ("CAD", 1.3567),
    ("CHF", 0.8945),
    ("TWD", 31.234),
    ("THB", 35.67),
    ("MYR", 4.6789),
    ("INR", 83.234),
    ("AED", 3.6725),
    ("SAR", 3.7501),
    ("NOK", 10.567),
    ("SEK", 10.234),
    ("DKK", 6.8901),
    ("RUB", 91.234),
    ("ZAR", 18.567),
    ("MXN", 17.234),
    ("BRL", 4.9876),
    ("ARS", 865.23),
    ("TRY", 27.345),
    ("PLN", 4.0567),
    ("CZK", 22.345),
    ("HUF", 356.78),
    ("ILS", 3.6789),
    ("NZD", 1.6234),
];

/// Default relative noise applied to each demo rate (±0.5%).
pub const DEFAULT_JITTER: f64 = 0.005;

pub struct DegradedRateSource {
    usd_rates: HashMap<String, f64>,
    jitter: f64,
}

impl DegradedRateSource {
    pub fn new() -> Self {
        Self::with_usd_rates(DEMO_USD_RATES.iter().copied(), DEFAULT_JITTER)
    }

    /// Builds a source from USD quotes. A `jitter` of 0 gives repeatable tables.
    pub fn with_usd_rates<I, K>(rates: I, jitter: f64) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: AsRef<str>,
    {
        let mut usd_rates: HashMap<String, f64> = rates
            .into_iter()
            .map(|(code, rate)| (normalize_code(code.as_ref()), rate))
            .filter(|(_, rate)| rate.is_finite() && *rate > 0.0)
            .collect();
        usd_rates.insert(PIVOT_CURRENCY.to_string(), 1.0);
        Self {
            usd_rates,
            jitter: jitter.abs(),
        }
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    fn noisy(&self, rate: f64, rng: &mut impl Rng) -> f64 {
        if self.jitter == 0.0 {
            rate
        } else {
            rate * (1.0 + rng.random_range(-self.jitter..=self.jitter))
        }
    }

    fn table_for(&self, base: &str) -> Option<RateTable> {
        let base_rate = *self.usd_rates.get(base)?;
        let mut rng = rand::rng();
        let rates: Vec<(&str, f64)> = self
            .usd_rates
            .iter()
            .filter(|(code, _)| code.as_str() != base)
            .map(|(code, rate)| (code.as_str(), self.noisy(rate / base_rate, &mut rng)))
            .collect();
        Some(RateTable::new(base, rates))
    }
}

impl Default for DegradedRateSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateSource for DegradedRateSource {
    fn name(&self) -> &str {
        "offline"
    }

    async fn fetch_rates(&self, base: &str) -> RateResult<RateTable> {
        let base = normalize_code(base);
        let table = self
            .table_for(&base)
            .ok_or_else(|| RateError::source_unavailable(&base))?;
        debug!(base = %base, count = table.len(), "Serving offline demo rates");
        Ok(table)
    }
}
