use super::{RateStore, delta, normalize_range};
use crate::core::{RateObservation, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

const OBSERVATIONS_PARTITION: &str = "observations";
const PAIRS_PARTITION: &str = "pairs";
const META_PARTITION: &str = "meta";
const NEXT_ID_KEY: &str = "next_id";

/// Row as persisted in the `observations` partition.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRow {
    id: u64,
    currency_code: String,
    buy: String,
    sell: String,
    source: String,
    created_at: DateTime<Utc>,
}

impl StoredRow {
    fn into_observation(self, previous: Option<&StoredRow>) -> RateObservation {
        RateObservation {
            buy_delta_prev: delta(&self.buy, previous.map(|p| p.buy.as_str())),
            sell_delta_prev: delta(&self.sell, previous.map(|p| p.sell.as_str())),
            currency_code: self.currency_code,
            buy: self.buy,
            sell: self.sell,
            source: self.source,
            observed_at: Some(self.created_at),
        }
    }
}

/// Observation log backed by a fjall keyspace.
///
/// Keys are `currency \0 source \0 ts id` where `ts` is the observation time in
/// microseconds with the sign bit flipped and both `ts` and `id` are 8-byte
/// big-endian, so one pair's history is a contiguous range in time order.
/// The `pairs` partition lists every `currency \0 source \0` prefix that has
/// rows, so collapsed reads visit one range per pair instead of the whole log.
pub struct DiskRateStore {
    keyspace: Keyspace,
    observations: PartitionHandle,
    pairs: PartitionHandle,
    meta: PartitionHandle,
    // Held across id allocation and commit so `meta` never moves backwards
    next_id: Mutex<u64>,
}

impl DiskRateStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let keyspace = fjall::Config::new(path).open()?;
        let observations =
            keyspace.open_partition(OBSERVATIONS_PARTITION, PartitionCreateOptions::default())?;
        let pairs = keyspace.open_partition(PAIRS_PARTITION, PartitionCreateOptions::default())?;
        let meta = keyspace.open_partition(META_PARTITION, PartitionCreateOptions::default())?;

        let next_id = match meta.get(NEXT_ID_KEY)? {
            Some(bytes) => decode_u64(&bytes).unwrap_or(1),
            None => 1,
        };
        debug!("Opened rate store at {:?}, next id {}", path, next_id);

        Ok(Self {
            keyspace,
            observations,
            pairs,
            meta,
            next_id: Mutex::new(next_id),
        })
    }

    fn read_row(value: &[u8]) -> Result<StoredRow, StoreError> {
        Ok(serde_json::from_slice(value)?)
    }

    /// Newest row of the pair strictly older than `micros`.
    fn previous_row(&self, prefix: &[u8], micros: i64) -> Result<Option<StoredRow>, StoreError> {
        let upper = [prefix, &encode_ts(micros)].concat();
        match self.observations.range(prefix.to_vec()..upper).next_back() {
            Some(item) => {
                let (_, value) = item?;
                Ok(Some(Self::read_row(&value)?))
            }
            None => Ok(None),
        }
    }

    /// Newest row of the pair observed within `start..=end`.
    fn newest_in_range(
        &self,
        prefix: &[u8],
        start: i64,
        end: i64,
    ) -> Result<Option<StoredRow>, StoreError> {
        let (lower, upper) = pair_bounds(prefix, start, end);
        match self.observations.range(lower..=upper).next_back() {
            Some(item) => {
                let (_, value) = item?;
                Ok(Some(Self::read_row(&value)?))
            }
            None => Ok(None),
        }
    }

    fn with_delta(&self, prefix: &[u8], row: StoredRow) -> Result<RateObservation, StoreError> {
        let previous = self.previous_row(prefix, row.created_at.timestamp_micros())?;
        Ok(row.into_observation(previous.as_ref()))
    }

    /// Newest in-range row of every pair yielded by `pairs` that passes
    /// `keep`, with deltas attached, newest first.
    fn collapse<I>(
        &self,
        pairs: I,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        mut keep: impl FnMut(&[u8]) -> bool,
    ) -> Result<Vec<RateObservation>, StoreError>
    where
        I: Iterator<Item = fjall::Result<fjall::Slice>>,
    {
        if start > end {
            return Err(StoreError::NotFound);
        }
        let (start, end) = (start.timestamp_micros(), end.timestamp_micros());

        let mut result = Vec::new();
        for pair in pairs {
            let prefix = pair?;
            if !keep(&prefix) {
                continue;
            }
            if let Some(row) = self.newest_in_range(&prefix, start, end)? {
                result.push(self.with_delta(&prefix, row)?);
            }
        }
        result.sort_by(|a, b| b.observed_at.cmp(&a.observed_at));
        not_empty(result)
    }
}

#[async_trait]
impl RateStore for DiskRateStore {
    async fn insert(&self, observation: &RateObservation) -> Result<(), StoreError> {
        validate_part("currency_code", &observation.currency_code)?;
        validate_part("source", &observation.source)?;

        let created_at = observation
            .observed_at
            .unwrap_or_else(Utc::now)
            .trunc_subsecs(6);
        let mut next_id = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
        let id = *next_id;
        let row = StoredRow {
            id,
            currency_code: observation.currency_code.clone(),
            buy: observation.buy.clone(),
            sell: observation.sell.clone(),
            source: observation.source.clone(),
            created_at,
        };

        let prefix = pair_prefix(&row.currency_code, &row.source);
        let key = [
            prefix.as_slice(),
            &encode_ts(created_at.timestamp_micros()),
            &id.to_be_bytes(),
        ]
        .concat();

        let mut batch = self.keyspace.batch();
        batch.insert(&self.observations, key, serde_json::to_vec(&row)?);
        batch.insert(&self.pairs, prefix, Vec::<u8>::new());
        batch.insert(&self.meta, NEXT_ID_KEY, (id + 1).to_be_bytes().to_vec());
        batch.commit()?;
        *next_id = id + 1;
        drop(next_id);
        self.keyspace.persist(PersistMode::Buffer)?;

        debug!(
            "Stored {} {} buy={} sell={} at {}",
            row.source, row.currency_code, row.buy, row.sell, created_at
        );
        Ok(())
    }

    async fn latest(
        &self,
        currency_code: &str,
        source: &str,
    ) -> Result<RateObservation, StoreError> {
        validate_part("currency_code", currency_code)?;
        validate_part("source", source)?;

        let prefix = pair_prefix(currency_code, source);
        let Some(item) = self.observations.prefix(&prefix).next_back() else {
            return Err(StoreError::NotFound);
        };
        let (_, value) = item?;
        self.with_delta(&prefix, Self::read_row(&value)?)
    }

    async fn query_all(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<RateObservation>, StoreError> {
        let (start, end) = normalize_range(start, end);
        self.collapse(self.pairs.keys(), start, end, |_| true)
    }

    async fn query_by_currency(
        &self,
        currency_code: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<RateObservation>, StoreError> {
        validate_part("currency_code", currency_code)?;
        let (start, end) = normalize_range(start, end);

        let currency_prefix = [currency_code.as_bytes(), &[0]].concat();
        let pairs = self
            .pairs
            .prefix(currency_prefix)
            .map(|item| item.map(|(key, _)| key));
        self.collapse(pairs, start, end, |_| true)
    }

    async fn query_by_source(
        &self,
        source: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<RateObservation>, StoreError> {
        validate_part("source", source)?;
        let (start, end) = normalize_range(start, end);

        self.collapse(self.pairs.keys(), start, end, |prefix| {
            prefix_source(prefix) == Some(source.as_bytes())
        })
    }

    async fn query_by_currency_and_source(
        &self,
        currency_code: &str,
        source: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<RateObservation>, StoreError> {
        validate_part("currency_code", currency_code)?;
        validate_part("source", source)?;
        let (start, end) = normalize_range(start, end);
        if start > end {
            return Err(StoreError::NotFound);
        }

        let prefix = pair_prefix(currency_code, source);
        let (lower, upper) = pair_bounds(&prefix, start.timestamp_micros(), end.timestamp_micros());

        let mut result = Vec::new();
        for item in self.observations.range(lower..=upper).rev() {
            let (_, value) = item?;
            result.push(self.with_delta(&prefix, Self::read_row(&value)?)?);
        }
        not_empty(result)
    }
}

fn not_empty(rows: Vec<RateObservation>) -> Result<Vec<RateObservation>, StoreError> {
    if rows.is_empty() {
        Err(StoreError::NotFound)
    } else {
        Ok(rows)
    }
}

fn validate_part(field: &str, value: &str) -> Result<(), StoreError> {
    if value.is_empty() {
        return Err(StoreError::Validation(format!("{field} must not be empty")));
    }
    if value.contains('\0') {
        return Err(StoreError::Validation(format!(
            "{field} must not contain NUL bytes"
        )));
    }
    Ok(())
}

fn pair_prefix(currency_code: &str, source: &str) -> Vec<u8> {
    [currency_code.as_bytes(), &[0], source.as_bytes(), &[0]].concat()
}

/// Inclusive key bounds covering the pair's rows observed within `start..=end`.
fn pair_bounds(prefix: &[u8], start: i64, end: i64) -> (Vec<u8>, Vec<u8>) {
    let lower = [prefix, &encode_ts(start)].concat();
    let upper = [prefix, &encode_ts(end), &[0xff; 8]].concat();
    (lower, upper)
}

/// Order-preserving encoding of a signed microsecond timestamp.
fn encode_ts(micros: i64) -> [u8; 8] {
    ((micros as u64) ^ (1 << 63)).to_be_bytes()
}

fn decode_u64(bytes: &[u8]) -> Option<u64> {
    bytes.try_into().ok().map(u64::from_be_bytes)
}

/// Source part of a `currency \0 source \0` prefix.
fn prefix_source(prefix: &[u8]) -> Option<&[u8]> {
    let body = prefix.strip_suffix(&[0])?;
    let separator = body.iter().position(|b| *b == 0)?;
    Some(&body[separator + 1..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn obs(source: &str, currency: &str, buy: &str, sell: &str, minutes: i64) -> RateObservation {
        RateObservation::new(source, currency, buy, sell, at(minutes))
    }

    #[test]
    fn test_key_encoding_orders_by_time() {
        assert!(encode_ts(-5) < encode_ts(0));
        assert!(encode_ts(0) < encode_ts(1));
        assert!(encode_ts(1_700_000_000_000_000) < encode_ts(1_700_000_000_000_001));

        let key = [
            pair_prefix("USD", "Kaspi"),
            encode_ts(42).to_vec(),
            7u64.to_be_bytes().to_vec(),
        ]
        .concat();
        let prefix = pair_prefix("USD", "Kaspi");
        assert!(key.starts_with(&prefix));
        assert_eq!(&key[prefix.len()..prefix.len() + 8], &encode_ts(42));
        assert_eq!(decode_u64(&key[prefix.len() + 8..]), Some(7));
        assert_eq!(prefix_source(&prefix), Some("Kaspi".as_bytes()));

        let (lower, upper) = pair_bounds(&prefix, 42, 42);
        assert!(lower.as_slice() <= key.as_slice() && key.as_slice() <= upper.as_slice());
    }

    #[tokio::test]
    async fn test_latest_carries_delta() {
        let dir = tempdir().unwrap();
        let store = DiskRateStore::open(dir.path()).unwrap();

        store.insert(&obs("Kaspi", "USD", "490.50", "495.00", 0)).await.unwrap();
        store.insert(&obs("Kaspi", "USD", "491.00", "494.00", 30)).await.unwrap();

        let latest = store.latest("USD", "Kaspi").await.unwrap();
        assert_eq!(latest.buy, "491.00");
        assert!((latest.buy_delta_prev - 0.5).abs() < 1e-9);
        assert!((latest.sell_delta_prev + 1.0).abs() < 1e-9);
        assert_eq!(latest.observed_at, Some(at(30)));
    }

    #[tokio::test]
    async fn test_insert_stamps_missing_time() {
        let dir = tempdir().unwrap();
        let store = DiskRateStore::open(dir.path()).unwrap();

        let mut observation = obs("NBRK", "EUR", "630.45", "630.45", 0);
        observation.observed_at = None;
        let before = Utc::now() - Duration::seconds(1);
        store.insert(&observation).await.unwrap();

        let stored = store.latest("EUR", "NBRK").await.unwrap();
        let stamped = stored.observed_at.unwrap();
        assert!(stamped >= before);
        assert!(stamped <= Utc::now());
        assert_eq!(stored.buy_delta_prev, 0.0);
    }

    #[tokio::test]
    async fn test_query_all_collapses_per_pair() {
        let dir = tempdir().unwrap();
        let store = DiskRateStore::open(dir.path()).unwrap();

        store.insert(&obs("Kaspi", "USD", "490", "495", 0)).await.unwrap();
        store.insert(&obs("Kaspi", "USD", "491", "496", 10)).await.unwrap();
        store.insert(&obs("Kaspi", "USD", "492", "497", 20)).await.unwrap();
        store.insert(&obs("NBRK", "USD", "541.91", "541.91", 5)).await.unwrap();

        let rows = store.query_all(None, None).await.unwrap();
        assert_eq!(rows.len(), 2);
        // Newest first
        assert_eq!(rows[0].source, "Kaspi");
        assert_eq!(rows[0].buy, "492");
        assert!((rows[0].buy_delta_prev - 1.0).abs() < 1e-9);
        assert_eq!(rows[1].source, "NBRK");
        assert_eq!(rows[1].buy_delta_prev, 0.0);
    }

    #[tokio::test]
    async fn test_collapse_respects_range_but_delta_does_not() {
        let dir = tempdir().unwrap();
        let store = DiskRateStore::open(dir.path()).unwrap();

        store.insert(&obs("Kaspi", "USD", "490", "495", 0)).await.unwrap();
        store.insert(&obs("Kaspi", "USD", "492", "497", 20)).await.unwrap();
        store.insert(&obs("Kaspi", "USD", "493", "498", 40)).await.unwrap();

        let rows = store
            .query_by_currency("USD", Some(at(10)), Some(at(30)))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].buy, "492");
        // Predecessor lies before the range start
        assert!((rows[0].buy_delta_prev - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_query_by_currency_and_source_full_history() {
        let dir = tempdir().unwrap();
        let store = DiskRateStore::open(dir.path()).unwrap();

        store.insert(&obs("Halyk", "EUR", "626", "640", 0)).await.unwrap();
        store.insert(&obs("Halyk", "EUR", "627.5", "640", 10)).await.unwrap();
        store.insert(&obs("Halyk", "EUR", "627", "641", 20)).await.unwrap();
        store.insert(&obs("Halyk", "USD", "539", "545", 15)).await.unwrap();
        store.insert(&obs("Kaspi", "EUR", "625", "642", 25)).await.unwrap();

        let rows = store
            .query_by_currency_and_source("EUR", "Halyk", None, None)
            .await
            .unwrap();
        let buys: Vec<_> = rows.iter().map(|r| r.buy.as_str()).collect();
        assert_eq!(buys, vec!["627", "627.5", "626"]);
        assert!((rows[0].buy_delta_prev + 0.5).abs() < 1e-9);
        assert!((rows[0].sell_delta_prev - 1.0).abs() < 1e-9);
        assert!((rows[1].buy_delta_prev - 1.5).abs() < 1e-9);
        assert_eq!(rows[2].buy_delta_prev, 0.0);

        let ranged = store
            .query_by_currency_and_source("EUR", "Halyk", Some(at(10)), Some(at(10)))
            .await
            .unwrap();
        assert_eq!(ranged.len(), 1);
        assert_eq!(ranged[0].buy, "627.5");
    }

    #[tokio::test]
    async fn test_query_by_source_collapses() {
        let dir = tempdir().unwrap();
        let store = DiskRateStore::open(dir.path()).unwrap();

        store.insert(&obs("RBK", "USD", "539.50", "546.50", 0)).await.unwrap();
        store.insert(&obs("RBK", "USD", "540.00", "546.50", 10)).await.unwrap();
        store.insert(&obs("RBK", "EUR", "628.42", "637.42", 5)).await.unwrap();
        store.insert(&obs("RBKX", "USD", "1", "2", 20)).await.unwrap();

        let rows = store.query_by_source("RBK", None, None).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].currency_code, "USD");
        assert_eq!(rows[0].buy, "540.00");
        assert_eq!(rows[1].currency_code, "EUR");
    }

    #[tokio::test]
    async fn test_collapse_visits_each_pair_once() {
        let dir = tempdir().unwrap();
        let store = DiskRateStore::open(dir.path()).unwrap();

        for minute in 0..40 {
            let buy = format!("{}", 490 + minute);
            store
                .insert(&obs("Kaspi", "USD", &buy, "500", minute))
                .await
                .unwrap();
        }
        store.insert(&obs("Kaspi", "EUR", "530", "540", 3)).await.unwrap();
        store.insert(&obs("Halyk", "USD", "489", "499", 7)).await.unwrap();

        let pairs: Vec<_> = store.pairs.keys().map(|k| k.unwrap().to_vec()).collect();
        assert_eq!(
            pairs,
            vec![
                pair_prefix("EUR", "Kaspi"),
                pair_prefix("USD", "Halyk"),
                pair_prefix("USD", "Kaspi"),
            ]
        );

        let rows = store.query_all(None, Some(at(10))).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].source, "Kaspi");
        assert_eq!(rows[0].buy, "500");
        assert!((rows[0].buy_delta_prev - 1.0).abs() < 1e-9);

        let kaspi = store
            .query_by_source("Kaspi", Some(at(5)), None)
            .await
            .unwrap();
        assert_eq!(kaspi.len(), 1);
        assert_eq!(kaspi[0].currency_code, "USD");
        assert_eq!(kaspi[0].buy, "529");

        let usd = store.query_by_currency("USD", None, None).await.unwrap();
        assert_eq!(usd.len(), 2);
        assert_eq!(usd[1].source, "Halyk");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_keep_counter_ahead() {
        let dir = tempdir().unwrap();
        {
            let store = std::sync::Arc::new(DiskRateStore::open(dir.path()).unwrap());
            let mut tasks = tokio::task::JoinSet::new();
            for i in 0..16 {
                let store = std::sync::Arc::clone(&store);
                tasks.spawn(async move {
                    let buy = format!("{}", 490 + i);
                    store.insert(&obs("Kaspi", "USD", &buy, "500", i)).await
                });
            }
            while let Some(result) = tasks.join_next().await {
                result.unwrap().unwrap();
            }
        }

        let store = DiskRateStore::open(dir.path()).unwrap();
        assert_eq!(*store.next_id.lock().unwrap(), 17);
        let rows = store
            .query_by_currency_and_source("USD", "Kaspi", None, None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 16);
    }

    #[tokio::test]
    async fn test_duplicates_are_appended() {
        let dir = tempdir().unwrap();
        let store = DiskRateStore::open(dir.path()).unwrap();

        let observation = obs("HomeKZ", "RUB", "6.4", "7.2", 0);
        store.insert(&observation).await.unwrap();
        store.insert(&observation).await.unwrap();

        let rows = store
            .query_by_currency_and_source("RUB", "HomeKZ", None, None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_not_found() {
        let dir = tempdir().unwrap();
        let store = DiskRateStore::open(dir.path()).unwrap();

        assert!(matches!(
            store.latest("USD", "Kaspi").await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.query_all(None, None).await,
            Err(StoreError::NotFound)
        ));

        store.insert(&obs("Kaspi", "USD", "490", "495", 0)).await.unwrap();
        assert!(matches!(
            store.query_by_currency("EUR", None, None).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.query_all(Some(at(5)), None).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_validation() {
        let dir = tempdir().unwrap();
        let store = DiskRateStore::open(dir.path()).unwrap();

        let err = store.insert(&obs("", "USD", "1", "2", 0)).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)), "{err}");
        let err = store
            .insert(&obs("Kaspi", "US\0D", "1", "2", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)), "{err}");
        let err = store.query_by_source("", None, None).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)), "{err}");
    }

    #[tokio::test]
    async fn test_reopen_keeps_rows_and_ids() {
        let dir = tempdir().unwrap();
        {
            let store = DiskRateStore::open(dir.path()).unwrap();
            store.insert(&obs("Kaspi", "USD", "490", "495", 0)).await.unwrap();
            store.insert(&obs("Kaspi", "USD", "491", "495", 0)).await.unwrap();
        }

        let store = DiskRateStore::open(dir.path()).unwrap();
        assert_eq!(*store.next_id.lock().unwrap(), 3);
        store.insert(&obs("Kaspi", "USD", "492", "495", 0)).await.unwrap();

        let rows = store
            .query_by_currency_and_source("USD", "Kaspi", None, None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        // Same timestamp: newest id first, and no strictly older predecessor
        assert_eq!(rows[0].buy, "492");
        assert_eq!(rows[0].buy_delta_prev, 0.0);
    }
}
