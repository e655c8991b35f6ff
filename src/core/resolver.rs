//! Pairwise rate resolution on top of the rate cache.
//!
//! A rate is derived by, in order: a direct lookup in the `from` table, an
//! inverted lookup in the `to` table, and triangulation through the pivot
//! currency. No rounding is applied anywhere in here.

use super::cache::RateCache;
use super::currency::{PIVOT_CURRENCY, RateTable, normalize_code};
use super::error::{RateError, RateResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

fn direct_rate(from_table: &RateTable, to: &str) -> Option<f64> {
    from_table.rate(to)
}

fn inverse_rate(to_table: &RateTable, from: &str) -> Option<f64> {
    to_table.rate(from).map(|rate| 1.0 / rate)
}

fn pivot_rate(pivot_table: &RateTable, from: &str, to: &str) -> Option<f64> {
    let from_rate = pivot_table.rate(from)?;
    let to_rate = pivot_table.rate(to)?;
    Some((1.0 / from_rate) * to_rate)
}

/// Rate tables fetched up front for a fixed set of pivot bases.
#[derive(Debug, Clone, Default)]
pub struct BulkRates {
    tables: HashMap<String, Arc<RateTable>>,
}

impl BulkRates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: Arc<RateTable>) {
        self.tables.insert(table.base().to_string(), table);
    }

    pub fn get(&self, base: &str) -> Option<&RateTable> {
        self.tables.get(base).map(Arc::as_ref)
    }

    pub fn bases(&self) -> Vec<&str> {
        let mut bases: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        bases.sort();
        bases
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Resolves a pair using only the prefetched tables.
    pub fn lookup(&self, from: &str, to: &str) -> Option<f64> {
        if from == to {
            return Some(1.0);
        }
        self.get(from)
            .and_then(|t| direct_rate(t, to))
            .or_else(|| self.get(to).and_then(|t| inverse_rate(t, from)))
            .or_else(|| {
                self.get(PIVOT_CURRENCY)
                    .and_then(|t| pivot_rate(t, from, to))
            })
    }
}

/// Tracks whether any table fetch during a resolution succeeded, so a total
/// connectivity failure is reported differently from a coverage gap.
#[derive(Default)]
struct Attempt {
    source_error: Option<RateError>,
    any_table: bool,
}

impl Attempt {
    fn record(&mut self, result: RateResult<Arc<RateTable>>) -> Option<Arc<RateTable>> {
        match result {
            Ok(table) => {
                self.any_table = true;
                Some(table)
            }
            Err(e) => {
                debug!(error = %e, "Rate table unavailable");
                self.source_error = Some(e);
                None
            }
        }
    }

    fn into_error(self, from: &str, to: &str) -> RateError {
        match self.source_error {
            Some(e) if !self.any_table => e,
            _ => RateError::rate_unavailable(from, to),
        }
    }
}

pub struct ConversionResolver<'a> {
    cache: &'a RateCache,
}

impl<'a> ConversionResolver<'a> {
    pub fn new(cache: &'a RateCache) -> Self {
        Self { cache }
    }

    /// Resolves `from -> to` through the cache.
    ///
    /// Fails with `SourceUnavailable` only when no table could be fetched at
    /// all, otherwise with `RateUnavailable`.
    pub async fn rate(&self, from: &str, to: &str) -> RateResult<f64> {
        let from = normalize_code(from);
        let to = normalize_code(to);
        if from == to {
            return Ok(1.0);
        }

        let mut attempt = Attempt::default();

        if let Some(table) = attempt.record(self.cache.get_rates(&from).await)
            && let Some(rate) = direct_rate(&table, &to)
        {
            debug!(%from, %to, rate, "Direct rate");
            return Ok(rate);
        }

        if let Some(table) = attempt.record(self.cache.get_rates(&to).await)
            && let Some(rate) = inverse_rate(&table, &from)
        {
            debug!(%from, %to, rate, "Inverse rate");
            return Ok(rate);
        }

        if let Some(table) = attempt.record(self.cache.get_rates(PIVOT_CURRENCY).await)
            && let Some(rate) = pivot_rate(&table, &from, &to)
        {
            debug!(%from, %to, rate, "Triangulated rate via {}", PIVOT_CURRENCY);
            return Ok(rate);
        }

        Err(attempt.into_error(&from, &to))
    }

    /// Fetches the pivot tables used by bulk resolution. Bases that cannot be
    /// fetched are left out.
    pub async fn prefetch(&self, pivots: &[String]) -> BulkRates {
        let mut bulk = BulkRates::new();
        for base in pivots {
            match self.cache.get_rates(base).await {
                Ok(table) => bulk.insert(table),
                Err(e) => warn!(base = %base, error = %e, "Skipping bulk pivot table"),
            }
        }
        debug!(bases = ?bulk.bases(), "Prefetched bulk rates");
        bulk
    }

    /// Resolves `from -> to` from the prefetched tables, falling back to a
    /// cached lookup only when they do not cover the pair.
    pub async fn rate_bulk(&self, from: &str, to: &str, bulk: &BulkRates) -> RateResult<f64> {
        let from = normalize_code(from);
        let to = normalize_code(to);
        if let Some(rate) = bulk.lookup(&from, &to) {
            return Ok(rate);
        }
        debug!(%from, %to, "Bulk tables miss, falling back to cached lookup");
        self.rate(&from, &to).await
    }
}
