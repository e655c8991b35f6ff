use super::currency::{RateSource, RateTable};
use super::error::{RateError, RateResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Start or end of one fetch, in the order the source saw them.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FetchEvent {
    Started(String),
    Finished(String),
}

/// Fixed rate tables with per-base call counting.
pub(crate) struct StaticRateSource {
    tables: HashMap<String, RateTable>,
    calls: Mutex<HashMap<String, usize>>,
    offline: AtomicBool,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    events: Mutex<Vec<FetchEvent>>,
}

impl StaticRateSource {
    pub(crate) fn new() -> Self {
        Self {
            tables: HashMap::new(),
            calls: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
            delay: None,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            events: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_table(mut self, base: &str, rates: &[(&str, f64)]) -> Self {
        self.tables
            .insert(base.to_string(), RateTable::new(base, rates.iter().copied()));
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self, base: &str) -> usize {
        self.calls.lock().unwrap().get(base).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Most fetches that were ever running at the same time.
    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub(crate) fn events(&self) -> Vec<FetchEvent> {
        self.events.lock().unwrap().clone()
    }

    fn lookup(&self, base: &str) -> RateResult<RateTable> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RateError::source_unavailable(base));
        }
        self.tables
            .get(base)
            .cloned()
            .ok_or_else(|| RateError::source_unavailable(base))
    }
}

#[async_trait]
impl RateSource for StaticRateSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch_rates(&self, base: &str) -> RateResult<RateTable> {
        *self.calls.lock().unwrap().entry(base.to_string()).or_default() += 1;
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        self.events
            .lock()
            .unwrap()
            .push(FetchEvent::Started(base.to_string()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = self.lookup(base);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.events
            .lock()
            .unwrap()
            .push(FetchEvent::Finished(base.to_string()));
        result
    }
}

/// Rates from the CNY -> USD worked example.
pub(crate) fn worked_example_source() -> StaticRateSource {
    StaticRateSource::new()
        .with_table(
            "CNY",
            &[("EUR", 0.128), ("GBP", 0.111), ("JPY", 20.7), ("USD", 0.1383)],
        )
        .with_table("EUR", &[("USD", 1.092)])
        .with_table("GBP", &[("USD", 1.27)])
        .with_table("JPY", &[("USD", 0.0067)])
}
