use async_trait::async_trait;
use reqwest::{Client, Request, Response};
use std::time::{Duration, Instant};
use tracing::{error, info};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// The single capability source adapters need from an HTTP stack.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, request: Request) -> reqwest::Result<Response>;
}

/// Wraps a `reqwest::Client` and logs every round trip.
pub struct LoggingHttpClient {
    inner: Client,
}

impl LoggingHttpClient {
    pub fn new() -> reqwest::Result<Self> {
        let inner = Client::builder()
            .user_agent("ratewatch/1.0")
            .timeout(DEFAULT_TIMEOUT)
            .build()?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl HttpClient for LoggingHttpClient {
    async fn execute(&self, request: Request) -> reqwest::Result<Response> {
        let method = request.method().clone();
        let url = request.url().clone();
        let start = Instant::now();

        let result = self.inner.execute(request).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(response) => info!(
                %method,
                %url,
                status = %response.status(),
                ?elapsed,
                "http request completed"
            ),
            Err(e) => error!(
                %method,
                %url,
                status = ?e.status(),
                error = %e,
                ?elapsed,
                "http request failed"
            ),
        }
        result
    }
}
