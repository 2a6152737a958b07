use super::ui;
use crate::aggregator::{RateAggregator, RateFilter};
use crate::view::{BankSnapshot, build_snapshots};
use anyhow::Result;
use comfy_table::{Cell, Table};

pub async fn run(aggregator: &RateAggregator, currency: &str) -> Result<()> {
    let currency = currency.to_uppercase();
    let observations = match aggregator.query(&RateFilter::default()).await {
        Ok(rows) => rows,
        Err(e) if e.is_not_found() => Vec::new(),
        Err(e) => return Err(e.into()),
    };

    let banks = build_snapshots(&observations, &currency);
    if banks.is_empty() {
        println!(
            "{}",
            ui::style_text(
                &format!("No rates stored for {currency}. Run `ratewatch fetch` first."),
                ui::StyleType::Subtle
            )
        );
        return Ok(());
    }

    println!(
        "\n{}",
        ui::style_text(&format!("{currency} to KZT"), ui::StyleType::Title)
    );
    println!("{}", build_table(&banks, &currency));
    Ok(())
}

fn build_table(banks: &[BankSnapshot], currency: &str) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Bank"),
        ui::header_cell("Location"),
        ui::header_cell("Buy"),
        ui::header_cell("Buy Δ"),
        ui::header_cell("Sell"),
        ui::header_cell("Sell Δ"),
    ]);

    for bank in banks {
        let quote = bank.quote(currency).copied().unwrap_or_default();
        table.add_row(vec![
            Cell::new(&bank.name),
            Cell::new(&bank.location),
            ui::rate_cell(quote.buy),
            ui::change_cell(quote.buy_change_pct, "%"),
            ui::rate_cell(quote.sell),
            ui::change_cell(quote.sell_change_pct, "%"),
        ]);
    }
    table
}
