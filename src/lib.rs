pub mod aggregator;
pub mod cli;
pub mod core;
pub mod providers;
pub mod scheduler;
pub mod store;
pub mod view;
pub mod web;

use crate::aggregator::RateAggregator;
use crate::core::config::AppConfig;
use crate::providers::http::LoggingHttpClient;
use crate::store::DiskRateStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

pub enum AppCommand {
    Serve,
    Fetch,
    Rates {
        currency: String,
    },
    History {
        currency: String,
        source: String,
        since: Option<DateTime<Utc>>,
    },
}

pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?.with_env_overrides(),
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");
    Ok(config)
}

/// Opens the observation log and instantiates every enabled source.
pub fn build_aggregator(config: &AppConfig) -> Result<RateAggregator> {
    let data_path = config.default_data_path()?;
    std::fs::create_dir_all(&data_path)
        .with_context(|| format!("Failed to create data directory: {}", data_path.display()))?;
    let store = DiskRateStore::open(&data_path)
        .with_context(|| format!("Failed to open rate store at {}", data_path.display()))?;

    let client = LoggingHttpClient::new().context("Failed to build HTTP client")?;
    let sources = providers::from_config(&config.sources, Arc::new(client));
    debug!("Enabled sources: {:?}", sources.keys().collect::<Vec<_>>());

    Ok(RateAggregator::new(Arc::new(store), sources))
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    let aggregator = build_aggregator(&config)?;

    match command {
        AppCommand::Serve => serve(config, aggregator).await,
        AppCommand::Fetch => cli::fetch::run(&aggregator, config.refresh.deadline()).await,
        AppCommand::Rates { currency } => cli::rates::run(&aggregator, &currency).await,
        AppCommand::History {
            currency,
            source,
            since,
        } => cli::history::run(&aggregator, &currency, &source, since).await,
    }
}

async fn serve(config: AppConfig, aggregator: RateAggregator) -> Result<()> {
    info!("ratewatch starting...");
    let addr = config.socket_addr()?;
    let aggregator = Arc::new(aggregator);

    let refresher = scheduler::start_refresh_scheduler(Arc::clone(&aggregator), config.refresh);
    let state = Arc::new(web::AppState { aggregator });
    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
        }
    };

    let result = web::serve(addr, state, shutdown).await;
    refresher.abort();
    result
}
