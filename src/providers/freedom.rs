use super::http::HttpClient;
use super::{decode_json, new_request, send};
use crate::core::rate::{LOCAL_CURRENCY, is_supported_currency};
use crate::core::{FetchError, RateObservation, RateProvider};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};

pub const SOURCE_NAME: &str = "Freedom";

/// Freedom Bank rates. The API splits quotes into cash, mobile and non-cash
/// buckets; only cash is used.
pub struct FreedomProvider {
    url: String,
    client: Arc<dyn HttpClient>,
}

impl FreedomProvider {
    pub fn new(url: &str, client: Arc<dyn HttpClient>) -> Self {
        FreedomProvider {
            url: url.to_string(),
            client,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FreedomResponse {
    #[serde(default)]
    success: bool,
    // Some responses omit the status entirely
    #[serde(default)]
    status: i64,
    #[serde(default)]
    data: FreedomData,
}

#[derive(Debug, Default, Deserialize)]
struct FreedomData {
    #[serde(default)]
    cash: Vec<FreedomItem>,
}

#[derive(Debug, Deserialize)]
struct FreedomItem {
    #[serde(rename = "buyCode")]
    buy_code: String,
    #[serde(rename = "sellCode")]
    sell_code: String,
    #[serde(rename = "buyRate")]
    buy_rate: String,
    #[serde(rename = "sellRate")]
    sell_rate: String,
}

#[async_trait]
impl RateProvider for FreedomProvider {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    #[instrument(name = "FreedomFetch", skip(self))]
    async fn fetch_rates(&self) -> Result<Vec<RateObservation>, FetchError> {
        let request = new_request(SOURCE_NAME, Method::GET, &self.url)?;
        let body = send(self.client.as_ref(), SOURCE_NAME, request).await?;
        let response: FreedomResponse = decode_json(SOURCE_NAME, &body)?;

        if !response.success {
            return Err(FetchError::api(SOURCE_NAME, "success flag false"));
        }
        if response.status != 200 && response.status != 0 {
            return Err(FetchError::api(
                SOURCE_NAME,
                format!("status {}", response.status),
            ));
        }

        let now = Utc::now();
        let rates: Vec<RateObservation> = response
            .data
            .cash
            .into_iter()
            .filter(|it| it.sell_code == LOCAL_CURRENCY && is_supported_currency(&it.buy_code))
            .map(|it| {
                RateObservation::new(SOURCE_NAME, &it.buy_code, it.buy_rate, it.sell_rate, now)
            })
            .collect();

        if rates.is_empty() {
            return Err(FetchError::empty(SOURCE_NAME));
        }

        debug!("Fetched {} rates from {}", rates.len(), SOURCE_NAME);
        Ok(rates)
    }
}
