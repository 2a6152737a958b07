//! HTML rendering for the dashboard page and its currency tab fragment.

use crate::core::SUPPORTED_CURRENCIES;
use crate::view::BankSnapshot;
use std::fmt::Write;

const HTMX_SCRIPT: &str = "https://unpkg.com/htmx.org@1.9.12";

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn change_class(pct: f64) -> &'static str {
    if pct > 0.0 {
        "up"
    } else if pct < 0.0 {
        "down"
    } else {
        "flat"
    }
}

fn rate_cell(value: f64, pct: f64) -> String {
    if value == 0.0 {
        return "<td>-</td>".to_string();
    }
    format!(
        r#"<td>{value:.2} <span class="change {}">{pct:+.2}%</span></td>"#,
        change_class(pct)
    )
}

/// Bank table for one currency, swapped in by htmx when a tab is selected.
pub fn tab_fragment(banks: &[BankSnapshot], currency: &str) -> String {
    let code = currency.to_uppercase();
    if banks.is_empty() {
        return format!(
            r#"<div id="rates"><p class="no-data">No data for {}</p></div>"#,
            escape(&code)
        );
    }

    let mut html = String::from(r#"<div id="rates"><table><thead><tr>"#);
    html.push_str("<th>Bank</th><th>Location</th><th>Buy</th><th>Sell</th></tr></thead><tbody>");
    for bank in banks {
        let quote = bank.quote(&code).copied().unwrap_or_default();
        let _ = write!(
            html,
            "<tr><td>{}</td><td>{}</td>{}{}</tr>",
            escape(&bank.name),
            escape(&bank.location),
            rate_cell(quote.buy, quote.buy_change_pct),
            rate_cell(quote.sell, quote.sell_change_pct),
        );
    }
    html.push_str("</tbody></table></div>");
    html
}

/// Full dashboard page with currency tabs and the selected tab pre-rendered.
pub fn page(banks: &[BankSnapshot], currency: &str) -> String {
    let selected = currency.to_uppercase();

    let mut tabs = String::new();
    for code in SUPPORTED_CURRENCIES {
        let path = code.to_lowercase();
        let class = if code == selected { "tab active" } else { "tab" };
        let _ = write!(
            tabs,
            r##"<a class="{class}" href="/c/{path}" hx-get="/c/{path}" hx-target="#rates" hx-swap="outerHTML" hx-push-url="true">{code}</a>"##
        );
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Exchange rates in Kazakhstan: {title}</title>
<script src="{HTMX_SCRIPT}"></script>
<style>
body {{ font-family: sans-serif; margin: 2rem; }}
.tab {{ margin-right: 1rem; text-decoration: none; }}
.tab.active {{ font-weight: bold; }}
table {{ border-collapse: collapse; margin-top: 1rem; }}
td, th {{ padding: 0.3rem 0.8rem; text-align: left; }}
.up {{ color: #c0392b; }}
.down {{ color: #27ae60; }}
.flat {{ color: #888; }}
</style>
</head>
<body>
<h1>Exchange rates to KZT</h1>
<nav>{tabs}</nav>
{content}
</body>
</html>
"#,
        title = escape(&selected),
        content = tab_fragment(banks, currency),
    )
}
