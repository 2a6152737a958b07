use super::http::HttpClient;
use super::{decode_json, new_request, send};
use crate::core::rate::{LOCAL_CURRENCY, SUPPORTED_CURRENCIES, is_supported_currency};
use crate::core::{FetchError, RateObservation, RateProvider};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

pub const SOURCE_NAME: &str = "RBK";

/// Bank RBK exchange module. Buy and sell quotes come as separate lists under
/// the "online" section.
pub struct RbkProvider {
    url: String,
    client: Arc<dyn HttpClient>,
}

impl RbkProvider {
    pub fn new(url: &str, client: Arc<dyn HttpClient>) -> Self {
        RbkProvider {
            url: url.to_string(),
            client,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RbkResponse {
    #[serde(default)]
    error: Option<i64>,
    #[serde(default)]
    data: RbkData,
}

#[derive(Debug, Default, Deserialize)]
struct RbkData {
    #[serde(default)]
    online: RbkSection,
}

#[derive(Debug, Default, Deserialize)]
struct RbkSection {
    #[serde(default)]
    buy: Vec<RbkItem>,
    #[serde(default)]
    sell: Vec<RbkItem>,
}

#[derive(Debug, Deserialize)]
struct RbkItem {
    src: String,
    dst: String,
    amount: String,
}

/// Supported KZT quotes by currency code; crosses and metals are skipped.
fn kzt_quotes(items: Vec<RbkItem>) -> HashMap<String, String> {
    items
        .into_iter()
        .filter(|it| it.dst == LOCAL_CURRENCY && is_supported_currency(&it.src))
        .map(|it| (it.src, it.amount))
        .collect()
}

#[async_trait]
impl RateProvider for RbkProvider {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    #[instrument(name = "RbkFetch", skip(self))]
    async fn fetch_rates(&self) -> Result<Vec<RateObservation>, FetchError> {
        let request = new_request(SOURCE_NAME, Method::GET, &self.url)?;
        let body = send(self.client.as_ref(), SOURCE_NAME, request).await?;
        let response: RbkResponse = decode_json(SOURCE_NAME, &body)?;

        match response.error {
            Some(0) => {}
            Some(code) => {
                return Err(FetchError::api(SOURCE_NAME, format!("error code {code}")));
            }
            None => return Err(FetchError::api(SOURCE_NAME, "missing error code")),
        }

        let online = response.data.online;
        let mut buys = kzt_quotes(online.buy);
        let mut sells = kzt_quotes(online.sell);

        let now = Utc::now();
        let mut rates = Vec::new();
        for code in SUPPORTED_CURRENCIES {
            // A quote needs both sides
            if let (Some(buy), Some(sell)) = (buys.remove(code), sells.remove(code)) {
                rates.push(RateObservation::new(SOURCE_NAME, code, buy, sell, now));
            }
        }

        if rates.is_empty() {
            return Err(FetchError::empty(SOURCE_NAME));
        }

        debug!("Fetched {} rates from {}", rates.len(), SOURCE_NAME);
        Ok(rates)
    }
}
