use super::http::HttpClient;
use super::{decode_json, new_request, send};
use crate::core::rate::is_supported_currency;
use crate::core::{FetchError, RateObservation, RateProvider};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};

pub const SOURCE_NAME: &str = "Kaspi";

const REQUEST_BODY: &str =
    r#"{"use_type":"32","currency_codes":["USD","EUR"],"rate_types":["SALE","BUY"]}"#;

/// Kaspi Bank aggregate rate endpoint. Quotes arrive as whole integers.
pub struct KaspiProvider {
    url: String,
    client: Arc<dyn HttpClient>,
}

impl KaspiProvider {
    pub fn new(url: &str, client: Arc<dyn HttpClient>) -> Self {
        KaspiProvider {
            url: url.to_string(),
            client,
        }
    }
}

#[derive(Debug, Deserialize)]
struct KaspiResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    body: Vec<KaspiRate>,
}

#[derive(Debug, Deserialize)]
struct KaspiRate {
    currency: String,
    buy: i64,
    sale: i64,
}

#[async_trait]
impl RateProvider for KaspiProvider {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    #[instrument(name = "KaspiFetch", skip(self))]
    async fn fetch_rates(&self) -> Result<Vec<RateObservation>, FetchError> {
        let mut request = new_request(SOURCE_NAME, Method::POST, &self.url)?;
        let headers = request.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        // Documented upstream as gLanguage/gSystem; header names are case-insensitive
        headers.insert(
            HeaderName::from_static("glanguage"),
            HeaderValue::from_static("ru"),
        );
        headers.insert(
            HeaderName::from_static("gsystem"),
            HeaderValue::from_static("kkz"),
        );
        *request.body_mut() = Some(REQUEST_BODY.into());

        let body = send(self.client.as_ref(), SOURCE_NAME, request).await?;
        let response: KaspiResponse = decode_json(SOURCE_NAME, &body)?;

        if response.status != "OK" || response.message != "OK" {
            return Err(FetchError::api(
                SOURCE_NAME,
                format!(
                    "status '{}', message '{}'",
                    response.status, response.message
                ),
            ));
        }

        let now = Utc::now();
        let rates: Vec<RateObservation> = response
            .body
            .into_iter()
            .filter(|r| is_supported_currency(&r.currency))
            .map(|r| {
                RateObservation::new(
                    SOURCE_NAME,
                    &r.currency,
                    r.buy.to_string(),
                    r.sale.to_string(),
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
