use super::analytics::{AnalysisResult, PathAnalyzer};
use super::cache::{CacheStats, RateCache};
use super::config::{AnalysisSettings, AppConfig};
use super::currency::{DEFAULT_CURRENCIES, RateSource, normalize_code};
use super::error::RateResult;
use super::resolver::ConversionResolver;
use crate::providers::exchange_rate_api::ExchangeRateApi;
use crate::providers::offline::DegradedRateSource;
use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Entry point for callers: one cache over one rate source, plus the
/// analysis settings applied to every request.
pub struct RateEngine {
    cache: RateCache,
    settings: AnalysisSettings,
}

impl RateEngine {
    pub fn new(source: Arc<dyn RateSource>, ttl: Duration, settings: AnalysisSettings) -> Self {
        Self {
            cache: RateCache::new(source, ttl),
            settings,
        }
    }

    /// Builds an engine over the live provider chain, or over the demo
    /// source when `offline` is set.
    pub fn from_config(config: &AppConfig, offline: bool) -> Result<Self> {
        let source: Arc<dyn RateSource> = if offline {
            warn!("Offline mode: using approximate demo rates");
            Arc::new(DegradedRateSource::new())
        } else {
            Arc::new(ExchangeRateApi::new(
                config.providers.clone(),
                config.api_key.clone(),
                &config.http,
            )?)
        };
        info!(source = source.name(), ttl = ?config.cache.ttl(), "Rate engine ready");
        Ok(Self::new(source, config.cache.ttl(), config.analysis.clone()))
    }

    pub fn source_name(&self) -> &str {
        self.cache.source_name()
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }

    pub async fn analyze(
        &self,
        amount: f64,
        from: &str,
        to: &str,
        candidates: &[String],
    ) -> RateResult<AnalysisResult> {
        let analyzer = PathAnalyzer::new(ConversionResolver::new(&self.cache), &self.settings);
        analyzer.analyze(amount, from, to, candidates).await
    }

    /// Resolves a single `from -> to` rate through the cache.
    pub async fn rate(&self, from: &str, to: &str) -> RateResult<f64> {
        ConversionResolver::new(&self.cache).rate(from, to).await
    }

    pub async fn clear_cache(&self) {
        self.cache.invalidate().await;
    }

    pub async fn stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Currencies the source can quote, or the built-in list when it cannot say.
    pub async fn list_available_currencies(&self) -> Vec<String> {
        match self.cache.available_currencies().await {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "Falling back to built-in currency list");
                DEFAULT_CURRENCIES.iter().map(|c| c.to_string()).collect()
            }
        }
    }

    /// Keeps only the codes the source knows. The input comes back unchanged
    /// when the source cannot list its currencies.
    pub async fn filter_available(&self, currencies: &[String]) -> Vec<String> {
        let available: HashSet<String> = match self.cache.available_currencies().await {
            Ok(list) => list.into_iter().collect(),
            Err(e) => {
                debug!(error = %e, "Cannot filter candidates, keeping all");
                return currencies.to_vec();
            }
        };
        let filtered: Vec<String> = currencies
            .iter()
            .filter(|c| available.contains(&normalize_code(c)))
            .cloned()
            .collect();
        debug!(
            kept = filtered.len(),
            dropped = currencies.len() - filtered.len(),
            "Filtered candidate currencies"
        );
        filtered
    }
}
