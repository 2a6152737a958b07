//! Exchange rate observations and the provider abstraction

use crate::core::error::FetchError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Currencies the dashboard tracks.
pub const SUPPORTED_CURRENCIES: [&str; 3] = ["USD", "EUR", "RUB"];

/// Counter currency every quote must be expressed in.
pub const LOCAL_CURRENCY: &str = "KZT";

pub fn is_supported_currency(code: &str) -> bool {
    SUPPORTED_CURRENCIES.contains(&code)
}

/// A single buy/sell quote reported by one source at one instant.
///
/// `buy` and `sell` keep the upstream decimal text so that no precision is
/// lost between fetch and storage. The `*_delta_prev` fields are never
/// persisted; the store fills them in on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateObservation {
    pub currency_code: String,
    pub buy: String,
    pub sell: String,
    pub source: String,
    pub observed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub buy_delta_prev: f64,
    #[serde(default)]
    pub sell_delta_prev: f64,
}

impl RateObservation {
    pub fn new(
        source: &str,
        currency_code: &str,
        buy: impl Into<String>,
        sell: impl Into<String>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            currency_code: currency_code.to_string(),
            buy: buy.into(),
            sell: sell.into(),
            source: source.to_string(),
            observed_at: Some(observed_at),
            buy_delta_prev: 0.0,
            sell_delta_prev: 0.0,
        }
    }

    /// True when buy and sell text are byte-identical to `other`.
    pub fn same_quote(&self, other: &RateObservation) -> bool {
        self.buy == other.buy && self.sell == other.sell
    }
}

/// A bank or other upstream that can be polled for current quotes.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Name stored as the `source` of every observation.
    fn name(&self) -> &str;

    async fn fetch_rates(&self) -> Result<Vec<RateObservation>, FetchError>;
}
