//! Append-only storage of rate observations with change deltas computed on read.

pub mod disk;

use crate::core::{RateObservation, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use disk::DiskRateStore;

/// Persistent log of observations.
///
/// Collapsed queries (`query_all`, `query_by_currency`, `query_by_source`)
/// return only the newest row per `(currency_code, source)` inside the range;
/// `query_by_currency_and_source` returns the full history. Every returned
/// row carries deltas against the row immediately preceding it in time. An
/// empty result is reported as [`StoreError::NotFound`].
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Appends one row, stamping `observed_at` with the current time when unset.
    async fn insert(&self, observation: &RateObservation) -> Result<(), StoreError>;

    async fn latest(&self, currency_code: &str, source: &str)
    -> Result<RateObservation, StoreError>;

    async fn query_all(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<RateObservation>, StoreError>;

    async fn query_by_currency(
        &self,
        currency_code: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<RateObservation>, StoreError>;

    async fn query_by_source(
        &self,
        source: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<RateObservation>, StoreError>;

    async fn query_by_currency_and_source(
        &self,
        currency_code: &str,
        source: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<RateObservation>, StoreError>;
}

/// Resolves an optional query range: an open start is the Unix epoch and an
/// open end is now.
pub fn normalize_range(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    (
        start.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        end.unwrap_or_else(Utc::now),
    )
}

/// `current - previous` when both parse as numbers, otherwise 0.
pub fn delta(current: &str, previous: Option<&str>) -> f64 {
    let Some(previous) = previous else {
        return 0.0;
    };
    match (current.trim().parse::<f64>(), previous.trim().parse::<f64>()) {
        (Ok(c), Ok(p)) => c - p,
        _ => 0.0,
    }
}
