use super::analytics::Strategy;
use super::currency::normalize_code;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{env, fs, path::PathBuf};
use tracing::debug;

/// Expected value of a provider's success indicator field.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SuccessFlag {
    pub field: String,
    pub equals: serde_json::Value,
    /// Reject responses that do not carry the field at all.
    #[serde(default)]
    pub required: bool,
}

/// Declarative description of one upstream rate provider.
///
/// `url` is a template; `{base}` and `{api_key}` are substituted per request.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProviderDescriptor {
    pub name: String,
    pub url: String,
    #[serde(default = "default_rates_field")]
    pub rates_field: String,
    #[serde(default)]
    pub requires_api_key: bool,
    #[serde(default)]
    pub success: Option<SuccessFlag>,
    #[serde(default)]
    pub error_field: Option<String>,
}

fn default_rates_field() -> String {
    "rates".to_string()
}

impl ProviderDescriptor {
    pub fn render_url(&self, base: &str, api_key: Option<&str>) -> String {
        self.url
            .replace("{base}", base)
            .replace("{api_key}", api_key.unwrap_or_default())
    }

    /// Built-in provider chain, tried in order.
    pub fn defaults() -> Vec<ProviderDescriptor> {
        vec![
            ProviderDescriptor {
                name: "exchangerate-api v6".to_string(),
                url: "https://v6.exchangerate-api.com/v6/{api_key}/latest/{base}".to_string(),
                rates_field: "conversion_rates".to_string(),
                requires_api_key: true,
                success: Some(SuccessFlag {
                    field: "result".to_string(),
                    equals: serde_json::Value::from("success"),
                    required: true,
                }),
                error_field: Some("error-type".to_string()),
            },
            ProviderDescriptor {
                name: "exchangerate.host".to_string(),
                url: "https://api.exchangerate.host/latest?base={base}".to_string(),
                rates_field: "rates".to_string(),
                requires_api_key: false,
                success: Some(SuccessFlag {
                    field: "success".to_string(),
                    equals: serde_json::Value::Bool(true),
                    required: false,
                }),
                error_field: Some("error".to_string()),
            },
            ProviderDescriptor {
                name: "exchangerate-api v4".to_string(),
                url: "https://api.exchangerate-api.com/v4/latest/{base}".to_string(),
                rates_field: "rates".to_string(),
                requires_api_key: false,
                success: None,
                error_field: None,
            },
        ]
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_minutes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig { ttl_minutes: 5 }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes * 60)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    /// Extra attempts per provider for 429/5xx and connection failures.
    pub retries: usize,
    /// First backoff delay, doubled on every further attempt.
    pub backoff_ms: u64,
    /// A response must quote more than this many currencies to be accepted.
    pub min_currencies: usize,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            timeout_secs: 20,
            retries: 3,
            backoff_ms: 1000,
            min_currencies: super::currency::MIN_CURRENCIES,
            user_agent: "xrank/1.0".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct AnalysisSettings {
    pub strategy: Strategy,
    /// `Auto` switches to bulk above this many candidates.
    pub bulk_threshold: usize,
    pub batch_size: usize,
    pub max_concurrency: usize,
    /// Bases prefetched once for bulk resolution.
    pub pivots: Vec<String>,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        AnalysisSettings {
            strategy: Strategy::Auto,
            bulk_threshold: 20,
            batch_size: 50,
            max_concurrency: 10,
            pivots: ["USD", "CNY", "EUR", "GBP", "JPY"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AppConfig {
    #[serde(default = "default_from")]
    pub from: String,
    #[serde(default = "default_to")]
    pub to: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub analysis: AnalysisSettings,
    #[serde(default = "ProviderDescriptor::defaults")]
    pub providers: Vec<ProviderDescriptor>,
}

fn default_from() -> String {
    "CNY".to_string()
}

fn default_to() -> String {
    "USD".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            from: default_from(),
            to: default_to(),
            api_key: None,
            cache: CacheConfig::default(),
            http: HttpConfig::default(),
            analysis: AnalysisSettings::default(),
            providers: ProviderDescriptor::defaults(),
        }
    }
}

impl AppConfig {
    /// Loads the default config file, or built-in defaults when there is none.
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        if !config_path.exists() {
            debug!("No config file at {}, using defaults", config_path.display());
            return Ok(Self::default().with_env_overrides());
        }
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("dev", "xrank", "xrank")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config = Self::from_yaml(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config.with_env_overrides())
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // An empty document deserializes to unit, not to an empty mapping
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut config: Self = serde_yaml::from_str(yaml)?;
        config.normalize();
        Ok(config)
    }

    fn normalize(&mut self) {
        self.from = normalize_code(&self.from);
        self.to = normalize_code(&self.to);
        self.analysis.pivots = self
            .analysis
            .pivots
            .iter()
            .map(|c| normalize_code(c))
            .collect();
        if self.api_key.as_deref().is_some_and(|k| k.trim().is_empty()) {
            self.api_key = None;
        }
    }

    /// `EXCHANGE_API_KEY` and `CACHE_DURATION` (minutes) take precedence over the file.
    pub fn with_env_overrides(self) -> Self {
        self.apply_overrides(
            env::var("EXCHANGE_API_KEY").ok(),
            env::var("CACHE_DURATION").ok(),
        )
    }

    fn apply_overrides(mut self, api_key: Option<String>, cache_minutes: Option<String>) -> Self {
        if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
            self.api_key = Some(key.trim().to_string());
        }
        if let Some(minutes) = cache_minutes {
            match minutes.trim().parse() {
                Ok(minutes) => self.cache.ttl_minutes = minutes,
                Err(e) => debug!("Ignoring invalid CACHE_DURATION '{}': {}", minutes, e),
            }
        }
        self
    }
}
