use super::http::HttpClient;
use super::{decode_json, new_request, send};
use crate::core::rate::{LOCAL_CURRENCY, is_supported_currency};
use crate::core::{FetchError, RateObservation, RateProvider};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, instrument};

pub const SOURCE_NAME: &str = "Halyk";

const PAIR_SEPARATOR: char = '/';

/// Halyk Bank currency history. Only the newest entry's private-person rates
/// are used.
pub struct HalykProvider {
    url: String,
    client: Arc<dyn HttpClient>,
}

impl HalykProvider {
    pub fn new(url: &str, client: Arc<dyn HttpClient>) -> Self {
        HalykProvider {
            url: url.to_string(),
            client,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HalykResponse {
    #[serde(default)]
    result: bool,
    #[serde(default)]
    data: HalykData,
}

#[derive(Debug, Default, Deserialize)]
struct HalykData {
    #[serde(rename = "currencyHistory", default)]
    currency_history: Option<CurrencyHistory>,
}

/// Upstream serves history either as `{"0": {...}, "1": {...}}` or as a list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CurrencyHistory {
    ByIndex(HashMap<String, HistoryEntry>),
    List(Vec<HistoryEntry>),
}

impl CurrencyHistory {
    fn latest(self) -> Option<HistoryEntry> {
        match self {
            CurrencyHistory::ByIndex(mut entries) => entries.remove("0"),
            CurrencyHistory::List(entries) => entries.into_iter().next(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct HistoryEntry {
    #[serde(rename = "privatePersons", default)]
    private_persons: BTreeMap<String, HalykPair>,
}

#[derive(Debug, Deserialize)]
struct HalykPair {
    #[serde(default)]
    buy: f64,
    #[serde(default)]
    sell: f64,
}

/// Splits "USD/KZT" into ("USD", Some("KZT")).
fn split_pair(pair: &str) -> (&str, Option<&str>) {
    match pair.split_once(PAIR_SEPARATOR) {
        Some((base, quote)) => (base, Some(quote)),
        None => (pair, None),
    }
}

#[async_trait]
impl RateProvider for HalykProvider {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    #[instrument(name = "HalykFetch", skip(self))]
    async fn fetch_rates(&self) -> Result<Vec<RateObservation>, FetchError> {
        let request = new_request(SOURCE_NAME, Method::GET, &self.url)?;
        let body = send(self.client.as_ref(), SOURCE_NAME, request).await?;
        let response: HalykResponse = decode_json(SOURCE_NAME, &body)?;

        if !response.result {
            return Err(FetchError::api(SOURCE_NAME, "result flag false"));
        }

        let latest = response
            .data
            .currency_history
            .and_then(CurrencyHistory::latest)
            .ok_or_else(|| FetchError::api(SOURCE_NAME, "empty currency history"))?;

        let now = Utc::now();
        let rates: Vec<RateObservation> = latest
            .private_persons
            .iter()
            .filter_map(|(pair, quote)| {
                let (base, counter) = split_pair(pair);
                if !is_supported_currency(base) || counter != Some(LOCAL_CURRENCY) {
                    return None;
                }
                Some(RateObservation::new(
                    SOURCE_NAME,
                    base,
                    quote.buy.to_string(),
                    quote.sell.to_string(),
                    now,
                ))
            })
            .collect();

        if rates.is_empty() {
            return Err(FetchError::empty(SOURCE_NAME));
        }

        debug!("Fetched {} rates from {}", rates.len(), SOURCE_NAME);
        Ok(rates)
    }
}
