//! HTTP surface: dashboard pages and a JSON query endpoint.

pub mod render;

use crate::aggregator::{RateAggregator, RateFilter};
use crate::core::{RateError, RateObservation, StoreError};
use crate::view::{BankSnapshot, build_snapshots};
use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

const DEFAULT_CURRENCY: &str = "usd";
const HX_REQUEST_HEADER: &str = "hx-request";

pub struct AppState {
    pub aggregator: Arc<RateAggregator>,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("no data")]
    NotFound,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
}

impl From<RateError> for ApiError {
    fn from(err: RateError) -> Self {
        match err {
            RateError::Store(StoreError::NotFound) => ApiError::NotFound,
            RateError::Validation(_) | RateError::Store(StoreError::Validation(_)) => {
                ApiError::BadRequest(err.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: u16,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(reason) => {
                error!("Request failed: {}", reason);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(ErrorBody {
            code: status.as_u16(),
            message: self.to_string(),
        });
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Dashboard snapshots for `currency`; an empty store yields no banks.
async fn gather_banks(state: &AppState, currency: &str) -> ApiResult<Vec<BankSnapshot>> {
    match state.aggregator.query(&RateFilter::default()).await {
        Ok(observations) => Ok(build_snapshots(&observations, currency)),
        Err(e) if e.is_not_found() => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

fn is_htmx(headers: &HeaderMap) -> bool {
    headers
        .get(HX_REQUEST_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

async fn index(State(state): State<Arc<AppState>>) -> ApiResult<Html<String>> {
    let banks = gather_banks(&state, DEFAULT_CURRENCY).await?;
    Ok(Html(render::page(&banks, DEFAULT_CURRENCY)))
}

async fn currency_page(
    Path(currency): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Html<String>> {
    let banks = gather_banks(&state, &currency).await?;
    if is_htmx(&headers) {
        return Ok(Html(render::tab_fragment(&banks, &currency)));
    }
    Ok(Html(render::page(&banks, &currency)))
}

#[derive(Debug, Default, Deserialize)]
struct RatesQuery {
    currency: Option<String>,
    source: Option<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

async fn api_rates(
    Query(query): Query<RatesQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<RateObservation>>> {
    let filter = RateFilter {
        currency_code: query.currency.map(|c| c.to_uppercase()),
        source: query.source,
        start: query.start,
        end: query.end,
    };
    let rows = state.aggregator.query(&filter).await?;
    Ok(Json(rows))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/c/{currency}", get(currency_page))
        .route("/api/rates", get(api_rates))
        .with_state(state)
}

/// Serves the dashboard on `addr` until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on http://{}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")
}
