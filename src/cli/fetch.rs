use super::ui;
use crate::aggregator::RateAggregator;
use anyhow::{Context, Result};
use std::time::Duration;

/// Runs a single refresh cycle and reports how many quotes changed.
pub async fn run(aggregator: &RateAggregator, deadline: Duration) -> Result<()> {
    let sources = aggregator.source_names().join(", ");
    let pb = ui::new_spinner(&format!("Fetching rates from {sources}"));
    let result = aggregator.refresh_with_deadline(deadline).await;
    pb.finish_and_clear();

    let summary = result.context("Refresh failed")?;
    println!(
        "{} {} new, {} unchanged",
        ui::style_text("Rates updated:", ui::StyleType::Success),
        summary.inserted,
        summary.skipped
    );
    Ok(())
}
