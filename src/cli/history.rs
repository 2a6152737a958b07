use super::ui;
use crate::aggregator::{RateAggregator, RateFilter};
use crate::core::RateObservation;
use anyhow::Result;
use chrono::{DateTime, Utc};
use comfy_table::{Cell, Table};

/// Prints every stored change for one currency at one source, newest first.
pub async fn run(
    aggregator: &RateAggregator,
    currency: &str,
    source: &str,
    since: Option<DateTime<Utc>>,
) -> Result<()> {
    let filter = RateFilter {
        currency_code: Some(currency.to_uppercase()),
        source: Some(source.to_string()),
        start: since,
        end: None,
    };

    let rows = match aggregator.query(&filter).await {
        Ok(rows) => rows,
        Err(e) if e.is_not_found() => {
            println!(
                "{}",
                ui::style_text(
                    &format!("No history for {} at {}", currency.to_uppercase(), source),
                    ui::StyleType::Subtle
                )
            );
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!(
        "\n{}",
        ui::style_text(
            &format!("{} {} history", source, currency.to_uppercase()),
            ui::StyleType::Title
        )
    );
    println!("{}", build_table(&rows));
    Ok(())
}

fn build_table(rows: &[RateObservation]) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Observed"),
        ui::header_cell("Buy"),
        ui::header_cell("Δ"),
        ui::header_cell("Sell"),
        ui::header_cell("Δ"),
    ]);

    for row in rows {
        let observed = row
            .observed_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(observed),
            Cell::new(&row.buy),
            ui::change_cell(row.buy_delta_prev, ""),
            Cell::new(&row.sell),
            ui::change_cell(row.sell_delta_prev, ""),
        ]);
    }
    table
}
