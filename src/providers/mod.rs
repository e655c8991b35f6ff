pub mod exchange_rate_api;
pub mod offline;
pub mod util;

pub use exchange_rate_api::ExchangeRateApi;
pub use offline::DegradedRateSource;
