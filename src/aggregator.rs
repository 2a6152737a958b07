//! Fan-out refresh across all sources and filtered reads of the observation log.

use crate::core::{RateError, RateObservation, RateProvider, StoreError};
use crate::store::RateStore;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, info_span, warn};

/// Counts of observations written and skipped during a refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub inserted: usize,
    pub skipped: usize,
}

impl AddAssign for RefreshSummary {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.skipped += other.skipped;
    }
}

/// Optional filters for reading observations. Blank strings are treated as unset.
#[derive(Debug, Clone, Default)]
pub struct RateFilter {
    pub currency_code: Option<String>,
    pub source: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl RateFilter {
    pub fn currency(currency_code: &str) -> Self {
        Self {
            currency_code: Some(currency_code.to_string()),
            ..Self::default()
        }
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub struct RateAggregator {
    store: Arc<dyn RateStore>,
    sources: BTreeMap<String, Arc<dyn RateProvider>>,
}

impl RateAggregator {
    pub fn new(
        store: Arc<dyn RateStore>,
        sources: BTreeMap<String, Arc<dyn RateProvider>>,
    ) -> Self {
        Self { store, sources }
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.keys().map(String::as_str).collect()
    }

    /// Fetches every source concurrently and appends observations whose quote
    /// differs from the latest stored one.
    ///
    /// All sources run to completion; if any failed, the first failure is
    /// returned while rows written by the others stay committed.
    pub async fn refresh(&self) -> Result<RefreshSummary, RateError> {
        let mut tasks = JoinSet::new();
        for (name, provider) in &self.sources {
            let provider = Arc::clone(provider);
            let store = Arc::clone(&self.store);
            let span = info_span!("refresh_source", source = %name);
            tasks.spawn(refresh_source(provider, store).instrument(span));
        }

        let mut summary = RefreshSummary::default();
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined.map_err(RateError::from).and_then(|result| result) {
                Ok(source_summary) => summary += source_summary,
                Err(e) => {
                    warn!("Source refresh failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(
                    "Refresh complete: {} inserted, {} unchanged",
                    summary.inserted, summary.skipped
                );
                Ok(summary)
            }
        }
    }

    /// [`refresh`](Self::refresh) bounded by `deadline`. Tasks still running
    /// at expiry are aborted.
    pub async fn refresh_with_deadline(
        &self,
        deadline: Duration,
    ) -> Result<RefreshSummary, RateError> {
        tokio::time::timeout(deadline, self.refresh())
            .await
            .map_err(|_| RateError::Deadline(deadline))?
    }

    /// Reads observations matching `filter`.
    ///
    /// Without both a currency and a source the result holds the newest row
    /// per `(currency, source)` pair; with both it is the full history.
    pub async fn query(&self, filter: &RateFilter) -> Result<Vec<RateObservation>, RateError> {
        if let (Some(start), Some(end)) = (filter.start, filter.end) {
            if start > end {
                return Err(RateError::Validation(format!(
                    "start {start} is after end {end}"
                )));
            }
        }

        let (start, end) = (filter.start, filter.end);
        let rows = match (present(&filter.currency_code), present(&filter.source)) {
            (None, None) => self.store.query_all(start, end).await?,
            (Some(currency), None) => self.store.query_by_currency(currency, start, end).await?,
            (None, Some(source)) => self.store.query_by_source(source, start, end).await?,
            (Some(currency), Some(source)) => {
                self.store
                    .query_by_currency_and_source(currency, source, start, end)
                    .await?
            }
        };
        debug!("Query {:?} returned {} rows", filter, rows.len());
        Ok(rows)
    }
}

async fn refresh_source(
    provider: Arc<dyn RateProvider>,
    store: Arc<dyn RateStore>,
) -> Result<RefreshSummary, RateError> {
    let rates = provider.fetch_rates().await?;

    let mut summary = RefreshSummary::default();
    for rate in rates {
        match store.latest(&rate.currency_code, &rate.source).await {
            Ok(latest) if latest.same_quote(&rate) => {
                summary.skipped += 1;
                continue;
            }
            Ok(_) | Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        store.insert(&rate).await?;
        summary.inserted += 1;
    }

    debug!(
        "{}: {} inserted, {} unchanged",
        provider.name(),
        summary.inserted,
        summary.skipped
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FetchError;
    use crate::store::DiskRateStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::{TempDir, tempdir};

    /// Provider that replays a scripted sequence of fetch outcomes.
    struct ScriptedProvider {
        name: String,
        quotes: Mutex<Vec<Vec<(&'static str, &'static str, &'static str)>>>,
        fail: bool,
        delay: Option<Duration>,
    }

    impl ScriptedProvider {
        fn new(name: &str, quotes: Vec<Vec<(&'static str, &'static str, &'static str)>>) -> Self {
            Self {
                name: name.to_string(),
                quotes: Mutex::new(quotes),
                fail: false,
                delay: None,
            }
        }

        fn failing(name: &str) -> Self {
            Self {
                fail: true,
                ..Self::new(name, vec![])
            }
        }
    }

    #[async_trait]
    impl RateProvider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch_rates(&self) -> Result<Vec<RateObservation>, FetchError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(FetchError::empty(&self.name));
            }
            let mut quotes = self.quotes.lock().unwrap();
            // The last scripted response repeats once the script runs out
            let batch = if quotes.len() > 1 {
                quotes.remove(0)
            } else {
                quotes.first().cloned().unwrap_or_default()
            };
            let now = Utc::now();
            Ok(batch
                .into_iter()
                .map(|(code, buy, sell)| RateObservation::new(&self.name, code, buy, sell, now))
                .collect())
        }
    }

    fn aggregator(providers: Vec<ScriptedProvider>) -> (TempDir, RateAggregator) {
        let dir = tempdir().unwrap();
        let store = Arc::new(DiskRateStore::open(dir.path()).unwrap());
        let sources = providers
            .into_iter()
            .map(|p| (p.name.clone(), Arc::new(p) as Arc<dyn RateProvider>))
            .collect();
        (dir, RateAggregator::new(store, sources))
    }

    fn pair(currency: &str, source: &str) -> RateFilter {
        RateFilter {
            currency_code: Some(currency.to_string()),
            source: Some(source.to_string()),
            ..RateFilter::default()
        }
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent_for_unchanged_quotes() {
        let (_dir, aggregator) = aggregator(vec![ScriptedProvider::new(
            "Kaspi",
            vec![vec![("USD", "490", "495"), ("EUR", "530", "540")]],
        )]);

        let first = aggregator.refresh().await.unwrap();
        assert_eq!(first, RefreshSummary { inserted: 2, skipped: 0 });
        let second = aggregator.refresh().await.unwrap();
        assert_eq!(second, RefreshSummary { inserted: 0, skipped: 2 });

        let history = aggregator.query(&pair("USD", "Kaspi")).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_appends_changed_quotes() {
        let (_dir, aggregator) = aggregator(vec![ScriptedProvider::new(
            "Kaspi",
            vec![
                vec![("USD", "490.50", "495")],
                vec![("USD", "491.00", "495")],
            ],
        )]);

        aggregator.refresh().await.unwrap();
        let summary = aggregator.refresh().await.unwrap();
        assert_eq!(summary.inserted, 1);

        let history = aggregator.query(&pair("USD", "Kaspi")).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].buy, "491.00");
        assert!((history[0].buy_delta_prev - 0.5).abs() < 1e-9);
        assert_eq!(history[0].sell_delta_prev, 0.0);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_other_rows() {
        let (_dir, aggregator) = aggregator(vec![
            ScriptedProvider::failing("Halyk"),
            ScriptedProvider::new("NBRK", vec![vec![("USD", "541.91", "541.91")]]),
        ]);

        let err = aggregator.refresh().await.unwrap_err();
        assert!(
            matches!(err, RateError::Fetch(FetchError::EmptyResult { ref source_name }) if source_name == "Halyk"),
            "{err}"
        );

        let rows = aggregator.query(&RateFilter::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source, "NBRK");
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_deadline() {
        let mut slow = ScriptedProvider::new("RBK", vec![vec![("USD", "539.50", "546.50")]]);
        slow.delay = Some(Duration::from_secs(60));
        let (_dir, aggregator) = aggregator(vec![slow]);

        let err = aggregator
            .refresh_with_deadline(Duration::from_secs(25))
            .await
            .unwrap_err();
        assert!(matches!(err, RateError::Deadline(d) if d == Duration::from_secs(25)));
    }

    #[tokio::test]
    async fn test_query_dispatch() {
        let (_dir, aggregator) = aggregator(vec![
            ScriptedProvider::new(
                "Kaspi",
                vec![vec![("USD", "490", "495"), ("EUR", "530", "540")]],
            ),
            ScriptedProvider::new("NBRK", vec![vec![("USD", "541.91", "541.91")]]),
        ]);
        aggregator.refresh().await.unwrap();

        let all = aggregator.query(&RateFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let usd = aggregator.query(&RateFilter::currency("USD")).await.unwrap();
        assert_eq!(usd.len(), 2);
        assert!(usd.iter().all(|r| r.currency_code == "USD"));

        let kaspi = aggregator
            .query(&RateFilter {
                source: Some("Kaspi".to_string()),
                ..RateFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(kaspi.len(), 2);
        assert!(kaspi.iter().all(|r| r.source == "Kaspi"));

        let missing = aggregator.query(&pair("RUB", "Kaspi")).await.unwrap_err();
        assert!(missing.is_not_found());
    }

    #[tokio::test]
    async fn test_blank_filters_are_ignored() {
        let (_dir, aggregator) = aggregator(vec![ScriptedProvider::new(
            "HomeKZ",
            vec![vec![("USD", "538", "545"), ("RUB", "6.4", "7.2")]],
        )]);
        aggregator.refresh().await.unwrap();

        let rows = aggregator
            .query(&RateFilter {
                currency_code: Some(String::new()),
                source: Some("  ".to_string()),
                ..RateFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_query_rejects_inverted_range() {
        let (_dir, aggregator) = aggregator(vec![]);

        let now = Utc::now();
        let err = aggregator
            .query(&RateFilter {
                start: Some(now),
                end: Some(now - chrono::Duration::hours(1)),
                ..RateFilter::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RateError::Validation(_)), "{err}");
    }

    #[tokio::test]
    async fn test_empty_store_is_not_found() {
        let (_dir, aggregator) = aggregator(vec![]);
        assert!(aggregator.refresh().await.is_ok());
        let err = aggregator.query(&RateFilter::default()).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
