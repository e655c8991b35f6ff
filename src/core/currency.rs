//! Currency rate abstractions and core types

use super::error::{RateError, RateResult};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Currency used for triangulation when neither a direct nor an inverse rate is known.
pub const PIVOT_CURRENCY: &str = "USD";

/// Smallest number of distinct currencies a usable rate table must carry.
pub const MIN_CURRENCIES: usize = 10;

/// Trims and upper-cases a currency code.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Rates for every known currency, all relative to one base currency.
#[derive(Debug, Clone, PartialEq)]
pub struct RateTable {
    base: String,
    rates: HashMap<String, f64>,
}

impl RateTable {
    /// Builds a table, dropping entries that are not positive finite numbers.
    ///
    /// An entry for the base currency itself is kept only when it equals 1.0.
    pub fn new<I, K>(base: &str, rates: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: AsRef<str>,
    {
        let base = normalize_code(base);
        let mut table = HashMap::new();
        for (code, rate) in rates {
            let code = normalize_code(code.as_ref());
            if code.is_empty() || !rate.is_finite() || rate <= 0.0 {
                debug!(base = %base, code = %code, rate, "Dropping unusable rate");
                continue;
            }
            if code == base && rate != 1.0 {
                warn!(base = %base, rate, "Dropping self rate that is not 1.0");
                continue;
            }
            table.insert(code, rate);
        }
        Self { base, rates: table }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Rate from the base currency to `code`. The base itself is always 1.0.
    pub fn rate(&self, code: &str) -> Option<f64> {
        if code == self.base {
            return Some(1.0);
        }
        self.rates.get(code).copied()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.rate(code).is_some()
    }

    /// Number of distinct quoted currencies, excluding the base.
    pub fn len(&self) -> usize {
        self.rates.keys().filter(|code| **code != self.base).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct codes the source quoted, counting an explicit
    /// base entry. This is the size checked against `MIN_CURRENCIES`.
    pub fn quoted_count(&self) -> usize {
        self.rates.len()
    }

    /// All currencies the table knows about, base included, sorted.
    pub fn currencies(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.rates.keys().cloned().collect();
        if !self.rates.contains_key(&self.base) {
            codes.push(self.base.clone());
        }
        codes.sort();
        codes
    }
}

/// A provider of whole rate tables, keyed by base currency.
///
/// The live HTTP adapter and the degraded offline source both implement this,
/// and so does the cache wrapping either of them.
#[async_trait]
pub trait RateSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_rates(&self, base: &str) -> RateResult<RateTable>;

    /// Currencies this source can quote, taken from the pivot table and
    /// falling back to EUR when the pivot is unusable.
    async fn available_currencies(&self) -> RateResult<Vec<String>> {
        for base in [PIVOT_CURRENCY, "EUR"] {
            match self.fetch_rates(base).await {
                Ok(table) if table.quoted_count() > MIN_CURRENCIES => {
                    return Ok(table.currencies());
                }
                Ok(table) => {
                    debug!(base, count = table.quoted_count(), "Too few currencies to list");
                }
                Err(e) => debug!(base, error = %e, "Could not list currencies"),
            }
        }
        Err(RateError::source_unavailable(PIVOT_CURRENCY))
    }
}

/// Fallback currency list used when no source can say what it supports.
pub const DEFAULT_CURRENCIES: &[&str] = &[
    "USD", "EUR", "GBP", "JPY", "CNY", "AUD", "CAD", "CHF", "NZD", "KRW", "HKD", "SGD", "TWD",
    "THB", "MYR", "IDR", "PHP", "VND", "INR", "PKR", "BDT", "LKR", "AED", "SAR", "QAR", "KWD",
    "BHD", "OMR", "JOD", "ILS", "TRY", "IRR", "NOK", "SEK", "DKK", "ISK", "PLN", "CZK", "HUF",
    "RON", "BGN", "HRK", "RSD", "MKD", "ALL", "BAM", "MDL", "UAH", "BYN", "RUB", "GEL", "AMD",
    "AZN", "KZT", "KGS", "TJS", "TMT", "UZS", "ZAR", "NGN", "EGP", "KES", "UGX", "TZS", "GHS",
    "ETB", "XOF", "XAF", "MAD", "TND", "DZD", "LYD", "SDG", "SSP", "ERN", "DJF", "SOS", "RWF",
    "BIF", "KMF", "MUR", "SCR", "MGA", "MWK", "ZMW", "BWP", "SZL", "LSL", "NAD", "AOA", "MZN",
    "ZWL", "MXN", "BRL", "ARS", "CLP", "COP", "PEN", "UYU", "PYG", "BOB", "VES", "GYD", "SRD",
    "FKP", "GTQ", "BZD", "HNL", "NIO", "CRC", "PAB", "CUP", "DOP", "HTG", "JMD", "KYD", "XCD",
    "BBD", "TTD", "AWG", "ANG", "SVC", "BMD", "BSD", "FJD", "PGK", "SBD", "TOP", "VUV", "WST",
    "XPF", "AFN", "BTN", "BND", "KHR", "LAK", "MMK", "NPR", "MNT",
];

/// Commonly traded currencies for a quick analysis.
pub const POPULAR_CURRENCIES: &[&str] = &[
    "USD", "EUR", "GBP", "JPY", "KRW", "HKD", "SGD", "AUD", "CAD", "CHF", "TWD", "THB", "MYR",
    "INR", "AED", "SAR", "NOK", "SEK", "DKK", "RUB", "ZAR", "MXN", "BRL", "ARS", "TRY", "PLN",
    "CZK", "HUF", "ILS", "NZD",
];
