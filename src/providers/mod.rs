pub mod freedom;
pub mod halyk;
pub mod home;
pub mod http;
pub mod kaspi;
pub mod nbrk;
pub mod rbk;

use crate::core::FetchError;
use crate::core::config::SourcesConfig;
use crate::core::rate::RateProvider;
use http::HttpClient;
use reqwest::{Method, Request, Url};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Builds a request for `url`, mapping a malformed URL to a transport error.
pub(crate) fn new_request(source: &str, method: Method, url: &str) -> Result<Request, FetchError> {
    let url = Url::parse(url)
        .map_err(|e| FetchError::transport(source, format!("invalid url '{url}': {e}")))?;
    Ok(Request::new(method, url))
}

/// Sends the request and returns the body of a 2xx response.
pub(crate) async fn send(
    client: &dyn HttpClient,
    source: &str,
    request: Request,
) -> Result<String, FetchError> {
    debug!("Requesting rates for {} from {}", source, request.url());
    let response = client
        .execute(request)
        .await
        .map_err(|e| FetchError::transport(source, format!("do request: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::transport(
            source,
            format!("unexpected status code: {}", status.as_u16()),
        ));
    }

    response
        .text()
        .await
        .map_err(|e| FetchError::transport(source, format!("read body: {e}")))
}

pub(crate) fn decode_json<T: DeserializeOwned>(source: &str, body: &str) -> Result<T, FetchError> {
    serde_json::from_str(body).map_err(|e| FetchError::decode(source, e))
}

/// Instantiates every source enabled in the configuration, keyed by source name.
pub fn from_config(
    sources: &SourcesConfig,
    client: Arc<dyn HttpClient>,
) -> BTreeMap<String, Arc<dyn RateProvider>> {
    let mut providers: Vec<Arc<dyn RateProvider>> = Vec::new();

    if let Some(cfg) = &sources.kaspi {
        providers.push(Arc::new(kaspi::KaspiProvider::new(&cfg.url, client.clone())));
    }
    if let Some(cfg) = &sources.halyk {
        providers.push(Arc::new(halyk::HalykProvider::new(&cfg.url, client.clone())));
    }
    if let Some(cfg) = &sources.freedom {
        providers.push(Arc::new(freedom::FreedomProvider::new(
            &cfg.url,
            client.clone(),
        )));
    }
    if let Some(cfg) = &sources.rbk {
        providers.push(Arc::new(rbk::RbkProvider::new(&cfg.url, client.clone())));
    }
    if let Some(cfg) = &sources.home {
        providers.push(Arc::new(home::HomeProvider::new(&cfg.url, client.clone())));
    }
    if let Some(cfg) = &sources.nbrk {
        providers.push(Arc::new(nbrk::NbrkProvider::new(&cfg.url, client.clone())));
    }

    providers
        .into_iter()
        .map(|p| (p.name().to_string(), p))
        .collect()
}
