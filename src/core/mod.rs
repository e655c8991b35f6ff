//! Rate resolution and path analysis

pub mod analytics;
pub mod cache;
pub mod config;
pub mod currency;
pub mod engine;
pub mod error;
pub mod log;
pub mod resolver;

#[cfg(test)]
mod testing;

// Re-export main types for cleaner imports
pub use analytics::{AnalysisResult, ConversionPath, Strategy};
pub use currency::{RateSource, RateTable};
pub use engine::RateEngine;
pub use error::{RateError, RateResult};
