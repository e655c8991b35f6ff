use super::util::{RetryPolicy, with_retry};
use crate::core::config::{HttpConfig, ProviderDescriptor};
use crate::core::currency::{RateSource, RateTable, normalize_code};
use crate::core::error::{RateError, RateResult};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Live rate source walking an ordered chain of HTTP providers.
pub struct ExchangeRateApi {
    client: reqwest::Client,
    providers: Vec<ProviderDescriptor>,
    api_key: Option<String>,
    retry: RetryPolicy,
    min_currencies: usize,
}

impl ExchangeRateApi {
    pub fn new(
        providers: Vec<ProviderDescriptor>,
        api_key: Option<String>,
        http: &HttpConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&http.user_agent)
            .timeout(Duration::from_secs(http.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            providers,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            retry: RetryPolicy::new(http.retries, Duration::from_millis(http.backoff_ms)),
            min_currencies: http.min_currencies,
        })
    }

    /// Providers that can be queried with the configured credentials.
    fn enabled_providers(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.providers
            .iter()
            .filter(|p| !p.requires_api_key || self.api_key.is_some())
    }

    async fn fetch_from(&self, provider: &ProviderDescriptor, base: &str) -> Result<RateTable> {
        let url = provider.render_url(base, self.api_key.as_deref());
        debug!("Requesting rates from {}", provider.name);

        let request = || {
            self.client
                .get(&url)
                .header("Accept", "application/json")
                .send()
        };
        let response = with_retry(request, self.retry)
            .await
            .with_context(|| format!("Request to {} failed", provider.name))?;

        let status = response.status();
        if !status.is_success() {
            bail!("HTTP error: {} from {}", status, provider.name);
        }

        let text = response
            .text()
            .await
            .with_context(|| format!("Failed to read response from {}", provider.name))?;

        let body: Value = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse JSON response from {}", provider.name))?;

        parse_rates(provider, base, &body, self.min_currencies)
    }
}

/// Extracts and validates the rate mapping from a provider response body.
fn parse_rates(
    provider: &ProviderDescriptor,
    base: &str,
    body: &Value,
    min_currencies: usize,
) -> Result<RateTable> {
    if let Some(flag) = &provider.success {
        match body.get(&flag.field) {
            Some(value) if *value == flag.equals => {}
            None if !flag.required => {}
            _ => {
                let reason = provider
                    .error_field
                    .as_deref()
                    .and_then(|field| body.get(field))
                    .map_or_else(
                        || "Unknown".to_string(),
                        |v| v.as_str().map_or_else(|| v.to_string(), str::to_string),
                    );
                bail!("{} reported an error: {}", provider.name, reason);
            }
        }
    }

    let rates = body
        .get(&provider.rates_field)
        .and_then(Value::as_object)
        .ok_or_else(|| anyhow!("Missing '{}' object in response", provider.rates_field))?;

    let table = RateTable::new(
        base,
        rates
            .iter()
            .filter_map(|(code, rate)| rate.as_f64().map(|r| (code.as_str(), r))),
    );

    if table.quoted_count() <= min_currencies {
        bail!(
            "Incomplete response from {}: {} currencies",
            provider.name,
            table.quoted_count()
        );
    }
    Ok(table)
}

#[async_trait]
impl RateSource for ExchangeRateApi {
    fn name(&self) -> &str {
        "live"
    }

    #[instrument(name = "RateFetch", skip(self), fields(base = %base))]
    async fn fetch_rates(&self, base: &str) -> RateResult<RateTable> {
        let base = normalize_code(base);
        for provider in self.enabled_providers() {
            match self.fetch_from(provider, &base).await {
                Ok(table) => {
                    info!(
                        provider = %provider.name,
                        count = table.len(),
                        "Fetched rates"
                    );
                    return Ok(table);
                }
                Err(e) => {
                    warn!(provider = %provider.name, error = %format!("{e:#}"), "Provider failed");
                }
            }
        }
        warn!("All rate providers failed");
        Err(RateError::source_unavailable(&base))
    }
}
