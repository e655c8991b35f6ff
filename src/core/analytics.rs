//! Two-hop conversion path analysis.

use super::config::AnalysisSettings;
use super::currency::normalize_code;
use super::error::{RateError, RateResult};
use super::resolver::{BulkRates, ConversionResolver};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::Display;
use std::str::FromStr;
use tracing::{debug, info};

/// Percentage gain of a path amount over the direct amount.
///
/// A direct amount that is not a positive number carries no signal and scores 0.
pub fn efficiency_score(path_amount: f64, direct_amount: f64) -> f64 {
    if direct_amount > 0.0 && direct_amount.is_finite() {
        (path_amount / direct_amount - 1.0) * 100.0
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Auto,
    Sequential,
    Bulk,
}

impl Strategy {
    /// Picks the concrete strategy for a candidate set of `count` currencies.
    pub fn resolve(self, count: usize, bulk_threshold: usize) -> Strategy {
        match self {
            Strategy::Auto if count > bulk_threshold => Strategy::Bulk,
            Strategy::Auto => Strategy::Sequential,
            other => other,
        }
    }
}

impl Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Strategy::Auto => "auto",
                Strategy::Sequential => "sequential",
                Strategy::Bulk => "bulk",
            }
        )
    }
}

impl FromStr for Strategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Strategy::Auto),
            "sequential" | "seq" => Ok(Strategy::Sequential),
            "bulk" => Ok(Strategy::Bulk),
            _ => Err(anyhow::anyhow!("Invalid strategy: {}", s)),
        }
    }
}

/// One `from -> intermediate -> to` route.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionPath {
    pub intermediate: String,
    pub from_rate: f64,
    pub to_rate: f64,
    pub amount: f64,
    pub efficiency_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub amount: f64,
    pub from: String,
    pub to: String,
    pub direct_rate: f64,
    pub direct_amount: f64,
    pub strategy: Strategy,
    /// Sorted by efficiency score, best first.
    pub paths: Vec<ConversionPath>,
    /// Candidates dropped because one of their legs could not be resolved.
    pub skipped: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn best_path(&self) -> Option<&ConversionPath> {
        self.paths.first()
    }

    /// Extra target amount gained by the best path over converting directly.
    pub fn savings(&self) -> f64 {
        self.best_path()
            .map_or(0.0, |best| best.amount - self.direct_amount)
    }

    pub fn positive_paths(&self) -> usize {
        self.paths.iter().filter(|p| p.efficiency_score > 0.0).count()
    }

    /// Lowest and highest score, if any path was computed.
    pub fn score_range(&self) -> Option<(f64, f64)> {
        let best = self.paths.first()?.efficiency_score;
        let worst = self.paths.last()?.efficiency_score;
        Some((worst, best))
    }
}

/// Per-candidate index and resolved leg rates, `None` when a leg is missing.
type Outcomes = Vec<(usize, Option<(f64, f64)>)>;

/// Sorts best-first. Equal scores keep candidate input order.
fn rank(mut indexed: Vec<(usize, ConversionPath)>) -> Vec<ConversionPath> {
    indexed.sort_by_key(|(index, _)| *index);
    indexed.sort_by(|(_, a), (_, b)| {
        b.efficiency_score
            .partial_cmp(&a.efficiency_score)
            .unwrap_or(Ordering::Equal)
    });
    indexed.into_iter().map(|(_, path)| path).collect()
}

/// Normalizes candidate codes, drops duplicates and the two endpoints.
fn prepare_candidates(candidates: &[String], from: &str, to: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    candidates
        .iter()
        .map(|c| normalize_code(c))
        .filter(|c| !c.is_empty() && c != from && c != to)
        .filter(|c| seen.insert(c.clone()))
        .collect()
}

pub struct PathAnalyzer<'a> {
    resolver: ConversionResolver<'a>,
    settings: &'a AnalysisSettings,
}

impl<'a> PathAnalyzer<'a> {
    pub fn new(resolver: ConversionResolver<'a>, settings: &'a AnalysisSettings) -> Self {
        Self { resolver, settings }
    }

    /// Ranks every `from -> X -> to` path against the direct conversion.
    ///
    /// Only a missing direct rate fails the analysis; candidates with an
    /// unresolvable leg are reported in `skipped`.
    pub async fn analyze(
        &self,
        amount: f64,
        from: &str,
        to: &str,
        candidates: &[String],
    ) -> RateResult<AnalysisResult> {
        if !(amount > 0.0 && amount.is_finite()) {
            return Err(RateError::InvalidRequest(format!(
                "amount must be a positive number, got {amount}"
            )));
        }
        let from = normalize_code(from);
        let to = normalize_code(to);
        if from.is_empty() || to.is_empty() {
            return Err(RateError::InvalidRequest(
                "currency codes must not be empty".to_string(),
            ));
        }

        let candidates = prepare_candidates(candidates, &from, &to);
        let strategy = self
            .settings
            .strategy
            .resolve(candidates.len(), self.settings.bulk_threshold);
        info!(%from, %to, amount, count = candidates.len(), %strategy, "Analyzing conversion paths");

        let (direct_rate, outcomes) = match strategy {
            Strategy::Bulk => self.run_bulk(amount, &from, &to, &candidates).await?,
            _ => self.run_sequential(amount, &from, &to, &candidates).await?,
        };
        let direct_amount = amount * direct_rate;

        let mut resolved = Vec::with_capacity(outcomes.len());
        let mut skipped_idx = Vec::new();
        for (index, outcome) in outcomes {
            match outcome {
                Some((from_rate, to_rate)) => {
                    let path_amount = amount * from_rate * to_rate;
                    resolved.push((
                        index,
                        ConversionPath {
                            intermediate: candidates[index].clone(),
                            from_rate,
                            to_rate,
                            amount: path_amount,
                            efficiency_score: efficiency_score(path_amount, direct_amount),
                        },
                    ));
                }
                None => skipped_idx.push(index),
            }
        }
        skipped_idx.sort_unstable();

        let paths = rank(resolved);
        debug!(paths = paths.len(), skipped = skipped_idx.len(), "Analysis complete");

        Ok(AnalysisResult {
            amount,
            from,
            to,
            direct_rate,
            direct_amount,
            strategy,
            paths,
            skipped: skipped_idx
                .into_iter()
                .map(|i| candidates[i].clone())
                .collect(),
            generated_at: Utc::now(),
        })
    }

    async fn run_sequential(
        &self,
        amount: f64,
        from: &str,
        to: &str,
        candidates: &[String],
    ) -> RateResult<(f64, Outcomes)> {
        let direct_rate = self.resolver.rate(from, to).await?;
        debug!(from, to, amount, direct_rate, "Resolved direct rate");

        let mut outcomes = Vec::with_capacity(candidates.len());
        for (index, candidate) in candidates.iter().enumerate() {
            let legs = self.legs(from, candidate, to, None).await;
            outcomes.push((index, legs));
        }
        Ok((direct_rate, outcomes))
    }

    async fn run_bulk(
        &self,
        amount: f64,
        from: &str,
        to: &str,
        candidates: &[String],
    ) -> RateResult<(f64, Outcomes)> {
        let bulk = self.resolver.prefetch(&self.settings.pivots).await;
        let direct_rate = self.resolver.rate_bulk(from, to, &bulk).await?;
        debug!(from, to, amount, direct_rate, "Resolved direct rate");

        let batch_size = self.settings.batch_size.max(1);
        let concurrency = self.settings.max_concurrency.max(1);
        let batches = candidates.len().div_ceil(batch_size);

        let mut outcomes = Vec::with_capacity(candidates.len());
        for (batch_no, batch) in candidates.chunks(batch_size).enumerate() {
            let offset = batch_no * batch_size;
            info!(
                batch = batch_no + 1,
                batches,
                start = offset + 1,
                end = offset + batch.len(),
                total = candidates.len(),
                "Processing candidate batch"
            );

            // Completion order within a batch is irrelevant, ranking re-sorts by index
            let batch_outcomes: Vec<_> = stream::iter(batch.iter().enumerate())
                .map(|(i, candidate)| {
                    let bulk = &bulk;
                    async move { (offset + i, self.legs(from, candidate, to, Some(bulk)).await) }
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;
            outcomes.extend(batch_outcomes);
        }
        Ok((direct_rate, outcomes))
    }

    /// Resolves both legs of a path, or `None` if either is unavailable.
    async fn legs(
        &self,
        from: &str,
        via: &str,
        to: &str,
        bulk: Option<&BulkRates>,
    ) -> Option<(f64, f64)> {
        let first = match bulk {
            Some(bulk) => self.resolver.rate_bulk(from, via, bulk).await,
            None => self.resolver.rate(from, via).await,
        };
        let first = match first {
            Ok(rate) => rate,
            Err(e) => {
                debug!(candidate = via, error = %e, "Dropping candidate");
                return None;
            }
        };
        let second = match bulk {
            Some(bulk) => self.resolver.rate_bulk(via, to, bulk).await,
            None => self.resolver.rate(via, to).await,
        };
        match second {
            Ok(rate) => Some((first, rate)),
            Err(e) => {
                debug!(candidate = via, error = %e, "Dropping candidate");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::RateCache;
    use crate::core::testing::{FetchEvent, StaticRateSource, worked_example_source};
    use std::sync::Arc;
    use std::time::Duration;

    fn codes(list: &[&str]) -> Vec<String> {
        list.iter().map(|c| c.to_string()).collect()
    }

    fn settings(strategy: Strategy) -> AnalysisSettings {
        AnalysisSettings {
            strategy,
            ..AnalysisSettings::default()
        }
    }

    async fn analyze_with(
        source: StaticRateSource,
        strategy: Strategy,
        amount: f64,
        from: &str,
        to: &str,
        candidates: &[&str],
    ) -> RateResult<AnalysisResult> {
        let cache = RateCache::new(Arc::new(source), Duration::from_secs(300));
        let settings = settings(strategy);
        let analyzer = PathAnalyzer::new(ConversionResolver::new(&cache), &settings);
        analyzer.analyze(amount, from, to, &codes(candidates)).await
    }

    fn order(result: &AnalysisResult) -> Vec<&str> {
        result.paths.iter().map(|p| p.intermediate.as_str()).collect()
    }

    #[test]
    fn test_efficiency_score() {
        assert!((efficiency_score(110.0, 100.0) - 10.0).abs() < 1e-9);
        assert!((efficiency_score(90.0, 100.0) + 10.0).abs() < 1e-9);
        assert_eq!(efficiency_score(100.0, 0.0), 0.0);
        assert_eq!(efficiency_score(100.0, -5.0), 0.0);
        assert_eq!(efficiency_score(100.0, f64::NAN), 0.0);
        assert_eq!(efficiency_score(100.0, f64::INFINITY), 0.0);
    }

    #[test]
    fn test_strategy_resolution() {
        assert_eq!(Strategy::Auto.resolve(20, 20), Strategy::Sequential);
        assert_eq!(Strategy::Auto.resolve(21, 20), Strategy::Bulk);
        assert_eq!(Strategy::Bulk.resolve(1, 20), Strategy::Bulk);
        assert_eq!(Strategy::Sequential.resolve(500, 20), Strategy::Sequential);
        assert_eq!("BULK".parse::<Strategy>().unwrap(), Strategy::Bulk);
        assert!("fastest".parse::<Strategy>().is_err());
    }

    #[tokio::test]
    async fn test_worked_example() {
        for strategy in [Strategy::Sequential, Strategy::Bulk] {
            let result = analyze_with(
                worked_example_source(),
                strategy,
                10000.0,
                "CNY",
                "USD",
                &["EUR", "GBP", "JPY"],
            )
            .await
            .unwrap();

            assert_eq!(result.strategy, strategy);
            assert!((result.direct_amount - 1383.0).abs() < 1e-9);
            assert_eq!(order(&result), vec!["GBP", "EUR", "JPY"]);

            let gbp = &result.paths[0];
            assert!((gbp.amount - 1409.7).abs() < 1e-9);
            assert!((gbp.efficiency_score - 1.930585683).abs() < 1e-6);
            let eur = &result.paths[1];
            assert!((eur.amount - 1397.76).abs() < 1e-9);
            assert!((eur.efficiency_score - 1.067245119).abs() < 1e-6);
            let jpy = &result.paths[2];
            assert!((jpy.amount - 1386.9).abs() < 1e-9);
            assert!((jpy.efficiency_score - 0.281995662).abs() < 1e-6);

            assert_eq!(result.best_path().unwrap().intermediate, "GBP");
            assert!((result.savings() - 26.7).abs() < 1e-9);
            assert_eq!(result.positive_paths(), 3);
            assert!(result.skipped.is_empty());
        }
    }

    #[tokio::test]
    async fn test_endpoints_never_appear_as_intermediates() {
        let result = analyze_with(
            worked_example_source(),
            Strategy::Sequential,
            100.0,
            "CNY",
            "USD",
            &["usd", "EUR", "CNY", " eur ", "GBP"],
        )
        .await
        .unwrap();

        assert_eq!(order(&result), vec!["GBP", "EUR"]);
    }

    fn equal_score_source() -> StaticRateSource {
        // Every path is worth exactly the direct amount
        StaticRateSource::new()
            .with_table("AAA", &[("BBB", 2.0), ("CCC", 4.0), ("DDD", 8.0), ("ZZZ", 1.0)])
            .with_table("BBB", &[("ZZZ", 0.5)])
            .with_table("CCC", &[("ZZZ", 0.25)])
            .with_table("DDD", &[("ZZZ", 0.125)])
    }

    #[tokio::test]
    async fn test_equal_scores_keep_input_order() {
        for strategy in [Strategy::Sequential, Strategy::Bulk] {
            let result = analyze_with(
                equal_score_source(),
                strategy,
                100.0,
                "AAA",
                "ZZZ",
                &["DDD", "BBB", "CCC"],
            )
            .await
            .unwrap();
            assert_eq!(order(&result), vec!["DDD", "BBB", "CCC"]);
            assert!(result.paths.iter().all(|p| p.efficiency_score == 0.0));
        }
    }

    #[tokio::test]
    async fn test_unresolvable_candidates_are_skipped() {
        let result = analyze_with(
            worked_example_source(),
            Strategy::Sequential,
            10000.0,
            "CNY",
            "USD",
            &["EUR", "XYZ", "GBP"],
        )
        .await
        .unwrap();

        assert_eq!(order(&result), vec!["GBP", "EUR"]);
        assert_eq!(result.skipped, vec!["XYZ"]);
    }

    #[tokio::test]
    async fn test_no_valid_paths_is_not_an_error() {
        let result = analyze_with(
            worked_example_source(),
            Strategy::Sequential,
            10000.0,
            "CNY",
            "USD",
            &["XYZ"],
        )
        .await
        .unwrap();

        assert!(result.paths.is_empty());
        assert!(result.best_path().is_none());
        assert_eq!(result.savings(), 0.0);
        assert_eq!(result.score_range(), None);
    }

    #[tokio::test]
    async fn test_missing_direct_rate_fails_analysis() {
        for strategy in [Strategy::Sequential, Strategy::Bulk] {
            let source = StaticRateSource::new()
                .with_table("CNY", &[("EUR", 0.128)])
                .with_table("EUR", &[("GBP", 0.85)]);
            let err = analyze_with(source, strategy, 100.0, "CNY", "USD", &["EUR"])
                .await
                .unwrap_err();
            assert_eq!(err, RateError::rate_unavailable("CNY", "USD"));
        }
    }

    #[tokio::test]
    async fn test_offline_source_surfaces_source_unavailable() {
        let source = worked_example_source();
        source.set_offline(true);
        let err = analyze_with(source, Strategy::Sequential, 100.0, "CNY", "USD", &["EUR"])
            .await
            .unwrap_err();
        assert!(matches!(err, RateError::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_invalid_amount_is_rejected() {
        for amount in [0.0, -1.0, f64::NAN] {
            let err = analyze_with(
                worked_example_source(),
                Strategy::Sequential,
                amount,
                "CNY",
                "USD",
                &["EUR"],
            )
            .await
            .unwrap_err();
            assert!(matches!(err, RateError::InvalidRequest(_)));
        }
    }

    #[tokio::test]
    async fn test_sequential_and_bulk_rank_identically() {
        // USD-based snapshot with a few deliberately skewed cross tables
        let mut usd = vec![("CNY", 7.2)];
        let extra: Vec<(String, f64)> = (0..40)
            .map(|i| (format!("C{i:02}"), 1.0 + i as f64 * 0.37))
            .collect();
        for (code, rate) in &extra {
            usd.push((code.as_str(), *rate));
        }
        let build = || {
            let mut cny: Vec<(&str, f64)> = vec![("USD", 1.0 / 7.2)];
            for (i, (code, rate)) in extra.iter().enumerate() {
                // Skew each leg a little so scores differ
                let skew = 1.0 + ((i * 7) % 11) as f64 * 0.001;
                cny.push((code.as_str(), rate / 7.2 * skew));
            }
            StaticRateSource::new()
                .with_table("USD", &usd)
                .with_table("CNY", &cny)
        };
        let candidates: Vec<&str> = extra.iter().map(|(c, _)| c.as_str()).collect();

        let sequential = analyze_with(
            build(),
            Strategy::Sequential,
            1000.0,
            "CNY",
            "USD",
            &candidates,
        )
        .await
        .unwrap();
        let bulk = analyze_with(build(), Strategy::Auto, 1000.0, "CNY", "USD", &candidates)
            .await
            .unwrap();

        assert_eq!(bulk.strategy, Strategy::Bulk);
        assert_eq!(sequential.paths.len(), 40);
        assert_eq!(order(&sequential), order(&bulk));
        for (a, b) in sequential.paths.iter().zip(&bulk.paths) {
            assert!((a.efficiency_score - b.efficiency_score).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn test_bulk_batches_cover_every_candidate() {
        let mut usd: Vec<(String, f64)> = vec![("CNY".to_string(), 7.0)];
        usd.extend((0..120).map(|i| (format!("K{i:03}"), 1.0 + i as f64)));
        let usd_ref: Vec<(&str, f64)> = usd.iter().map(|(c, r)| (c.as_str(), *r)).collect();
        let source = StaticRateSource::new().with_table("USD", &usd_ref);
        let candidates: Vec<&str> = usd_ref.iter().skip(1).map(|(c, _)| *c).collect();

        let result = analyze_with(source, Strategy::Bulk, 1.0, "CNY", "USD", &candidates)
            .await
            .unwrap();

        // Everything is triangulated through one consistent table
        assert_eq!(result.paths.len(), 120);
        assert!(result.skipped.is_empty());
        assert!(result.paths.iter().all(|p| p.efficiency_score.abs() < 1e-9));
        let mut seen: Vec<&str> = order(&result);
        seen.sort();
        assert_eq!(seen, candidates);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_batches_are_bounded_and_sequential() {
        let candidates: Vec<String> = (0..10).map(|i| format!("C{i:02}")).collect();
        let mut from_rates: Vec<(&str, f64)> = vec![("ZZZ", 1.0)];
        from_rates.extend(candidates.iter().map(|c| (c.as_str(), 1.0)));
        let mut source = StaticRateSource::new().with_table("AAA", &from_rates);
        for (i, code) in candidates.iter().enumerate() {
            source = source.with_table(code, &[("ZZZ", 1.0 + i as f64 * 0.01)]);
        }
        let source = Arc::new(source.with_delay(Duration::from_millis(50)));

        // Only the source table is prefetched, so every second leg misses the
        // bulk tables and goes back to the source
        let settings = AnalysisSettings {
            strategy: Strategy::Bulk,
            batch_size: 5,
            max_concurrency: 2,
            pivots: vec!["AAA".to_string()],
            ..AnalysisSettings::default()
        };
        let cache = RateCache::new(source.clone(), Duration::from_secs(300));
        let analyzer = PathAnalyzer::new(ConversionResolver::new(&cache), &settings);
        let result = analyzer
            .analyze(100.0, "AAA", "ZZZ", &candidates)
            .await
            .unwrap();

        assert_eq!(result.paths.len(), 10);
        assert_eq!(result.best_path().unwrap().intermediate, "C09");
        assert_eq!(source.peak_in_flight(), 2);

        let events: Vec<FetchEvent> = source
            .events()
            .into_iter()
            .filter(|e| {
                !matches!(e, FetchEvent::Started(b) | FetchEvent::Finished(b) if b == "AAA")
            })
            .collect();
        assert_eq!(events.len(), 20);
        let position = |event: FetchEvent| events.iter().position(|e| *e == event).unwrap();
        let last_finish_of_first_batch = candidates[..5]
            .iter()
            .map(|c| position(FetchEvent::Finished(c.clone())))
            .max()
            .unwrap();
        let first_start_of_second_batch = candidates[5..]
            .iter()
            .map(|c| position(FetchEvent::Started(c.clone())))
            .min()
            .unwrap();
        assert!(last_finish_of_first_batch < first_start_of_second_batch);
    }
}
