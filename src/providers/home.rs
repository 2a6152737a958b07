use super::http::HttpClient;
use super::{decode_json, new_request, send};
use crate::core::{FetchError, RateObservation, RateProvider};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};

pub const SOURCE_NAME: &str = "HomeKZ";

/// home.kz public currency feed. Currencies are identified by numeric id.
pub struct HomeProvider {
    url: String,
    client: Arc<dyn HttpClient>,
}

impl HomeProvider {
    pub fn new(url: &str, client: Arc<dyn HttpClient>) -> Self {
        HomeProvider {
            url: url.to_string(),
            client,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HomeResponse {
    #[serde(default)]
    currency: Vec<HomeCurrency>,
}

#[derive(Debug, Deserialize)]
struct HomeCurrency {
    #[serde(rename = "p_curr_id")]
    id: String,
    #[serde(rename = "p_rate_buy")]
    buy: String,
    #[serde(rename = "p_rate_sell")]
    sell: String,
}

/// Maps home.kz currency ids to ISO codes; unknown ids are not tracked.
fn currency_code(id: &str) -> Option<&'static str> {
    match id {
        "1" => Some("USD"),
        "17" => Some("EUR"),
        "16" => Some("RUB"),
        _ => None,
    }
}

#[async_trait]
impl RateProvider for HomeProvider {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    #[instrument(name = "HomeFetch", skip(self))]
    async fn fetch_rates(&self) -> Result<Vec<RateObservation>, FetchError> {
        let request = new_request(SOURCE_NAME, Method::GET, &self.url)?;
        let body = send(self.client.as_ref(), SOURCE_NAME, request).await?;
        let response: HomeResponse = decode_json(SOURCE_NAME, &body)?;

        let now = Utc::now();
        let rates: Vec<RateObservation> = response
            .currency
            .into_iter()
            .filter_map(|c| {
                currency_code(&c.id)
                    .map(|code| RateObservation::new(SOURCE_NAME, code, c.buy, c.sell, now))
            })
            .collect();

        if rates.is_empty() {
            return Err(FetchError::empty(SOURCE_NAME));
        }

        debug!("Fetched {} rates from {}", rates.len(), SOURCE_NAME);
        Ok(rates)
    }
}
