//! Background refresh loop for the server.

use crate::aggregator::RateAggregator;
use crate::core::config::RefreshConfig;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

/// Spawns a task that refreshes immediately and then once per configured
/// interval. Failed cycles are logged and retried on the next tick.
pub fn start_refresh_scheduler(
    aggregator: Arc<RateAggregator>,
    config: RefreshConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Refresh scheduler started ({}s interval, {}s deadline)",
            config.interval_secs, config.deadline_secs
        );

        // First tick completes immediately
        let mut ticker = interval(config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            run_refresh(&aggregator, &config).await;
        }
    })
}

async fn run_refresh(aggregator: &RateAggregator, config: &RefreshConfig) {
    debug!("Running scheduled refresh");
    if let Err(e) = aggregator.refresh_with_deadline(config.deadline()).await {
        warn!("Background refresh failed: {}", e);
    }
}
