//! Rate lookup error types.

use thiserror::Error;

/// Errors surfaced by the cache, resolver and analyzer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RateError {
    /// No upstream provider returned a usable table for this base.
    #[error("No rate source available for base currency {base}")]
    SourceUnavailable { base: String },

    /// Sources responded, but none of the resolution strategies covered the pair.
    #[error("No rate available for {from} -> {to}")]
    RateUnavailable { from: String, to: String },

    /// Input rejected before any lookup was attempted.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl RateError {
    pub fn source_unavailable(base: &str) -> Self {
        RateError::SourceUnavailable {
            base: base.to_string(),
        }
    }

    pub fn rate_unavailable(from: &str, to: &str) -> Self {
        RateError::RateUnavailable {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

pub type RateResult<T> = Result<T, RateError>;
