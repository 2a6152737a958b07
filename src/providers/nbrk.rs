use super::http::HttpClient;
use super::{new_request, send};
use crate::core::rate::is_supported_currency;
use crate::core::{FetchError, RateObservation, RateProvider};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};

pub const SOURCE_NAME: &str = "NBRK";

/// National Bank of Kazakhstan RSS feed of official rates.
///
/// The feed publishes a single official rate per currency, so it is recorded
/// as both the buy and the sell side.
pub struct NbrkProvider {
    url: String,
    client: Arc<dyn HttpClient>,
}

impl NbrkProvider {
    pub fn new(url: &str, client: Arc<dyn HttpClient>) -> Self {
        NbrkProvider {
            url: url.to_string(),
            client,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: String,
    description: String,
}

#[async_trait]
impl RateProvider for NbrkProvider {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    #[instrument(name = "NbrkFetch", skip(self))]
    async fn fetch_rates(&self) -> Result<Vec<RateObservation>, FetchError> {
        let request = new_request(SOURCE_NAME, Method::GET, &self.url)?;
        let body = send(self.client.as_ref(), SOURCE_NAME, request).await?;
        let rss: Rss =
            quick_xml::de::from_str(&body).map_err(|e| FetchError::decode(SOURCE_NAME, e))?;

        let now = Utc::now();
        let rates: Vec<RateObservation> = rss
            .channel
            .items
            .into_iter()
            .filter(|item| is_supported_currency(&item.title))
            .map(|item| {
                RateObservation::new(
                    SOURCE_NAME,
                    &item.title,
                    item.description.clone(),
                    item.description,
                    now,
                )
            })
            .collect();

        if rates.is_empty() {
            return Err(FetchError::empty(SOURCE_NAME));
        }

        debug!("Fetched {} rates from {}", rates.len(), SOURCE_NAME);
        Ok(rates)
    }
}
