//! Per-bank dashboard snapshots built from collapsed observations.

use crate::core::RateObservation;
use crate::core::rate::is_supported_currency;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Location shown for every bank on the dashboard.
pub const BANK_LOCATION: &str = "KZ";

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CurrencyQuote {
    pub buy: f64,
    pub sell: f64,
    pub buy_change_pct: f64,
    pub sell_change_pct: f64,
}

impl CurrencyQuote {
    fn from_observation(observation: &RateObservation) -> Self {
        let buy = parse_rate(&observation.buy);
        let sell = parse_rate(&observation.sell);
        Self {
            buy,
            sell,
            buy_change_pct: change_pct(observation.buy_delta_prev, buy),
            sell_change_pct: change_pct(observation.sell_delta_prev, sell),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buy == 0.0 && self.sell == 0.0
    }

    /// Buy rate, or the sell rate for banks that only quote one side.
    fn sort_key(&self) -> f64 {
        if self.buy == 0.0 { self.sell } else { self.buy }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BankSnapshot {
    pub name: String,
    pub location: String,
    pub rates: BTreeMap<String, CurrencyQuote>,
}

impl BankSnapshot {
    pub fn quote(&self, currency_code: &str) -> Option<&CurrencyQuote> {
        self.rates.get(currency_code)
    }
}

fn parse_rate(value: &str) -> f64 {
    value.trim().parse().unwrap_or(0.0)
}

fn change_pct(delta: f64, current: f64) -> f64 {
    if current > 0.0 {
        delta / current * 100.0
    } else {
        0.0
    }
}

/// Groups observations by source and keeps the banks quoting
/// `requested_currency`, cheapest first. An unsupported currency keeps every
/// bank in name order.
pub fn build_snapshots(
    observations: &[RateObservation],
    requested_currency: &str,
) -> Vec<BankSnapshot> {
    let requested = requested_currency.trim().to_uppercase();

    let mut banks: BTreeMap<&str, BankSnapshot> = BTreeMap::new();
    for observation in observations {
        let bank = banks
            .entry(observation.source.as_str())
            .or_insert_with(|| BankSnapshot {
                name: observation.source.clone(),
                location: BANK_LOCATION.to_string(),
                rates: BTreeMap::new(),
            });
        if is_supported_currency(&observation.currency_code) {
            bank.rates.insert(
                observation.currency_code.clone(),
                CurrencyQuote::from_observation(observation),
            );
        }
    }

    if !is_supported_currency(&requested) {
        return banks.into_values().collect();
    }

    let mut snapshots: Vec<BankSnapshot> = banks
        .into_values()
        .filter(|bank| bank.quote(&requested).is_some_and(|q| !q.is_empty()))
        .collect();

    snapshots.sort_by(|a, b| match (a.quote(&requested), b.quote(&requested)) {
        (Some(a), Some(b)) => a
            .sort_key()
            .partial_cmp(&b.sort_key())
            .unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    });
    snapshots
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn obs(source: &str, currency: &str, buy: &str, sell: &str) -> RateObservation {
        RateObservation::new(source, currency, buy, sell, Utc::now())
    }

    #[test]
    fn test_change_pct_is_relative_to_current() {
        let mut observation = obs("Kaspi", "USD", "490.50", "495.00");
        observation.buy_delta_prev = 1.5;

        let snapshots = build_snapshots(&[observation], "USD");
        let quote = snapshots[0].quote("USD").unwrap();
        assert!((quote.buy_change_pct - 0.3058).abs() < 1e-4);
        assert_eq!(quote.sell_change_pct, 0.0);
        assert_eq!(snapshots[0].location, "KZ");
    }

    #[test]
    fn test_sorted_by_buy_with_sell_fallback() {
        let observations = vec![
            obs("Kaspi", "USD", "492", "497"),
            obs("NBRK", "USD", "0", "489"),
            obs("Halyk", "USD", "490", "498"),
            obs("Halyk", "EUR", "530", "540"),
        ];

        let snapshots = build_snapshots(&observations, "usd");
        let names: Vec<_> = snapshots.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["NBRK", "Halyk", "Kaspi"]);
        assert_eq!(snapshots[1].rates.len(), 2);
    }

    #[test]
    fn test_banks_without_requested_currency_are_dropped() {
        let observations = vec![
            obs("Kaspi", "USD", "492", "497"),
            obs("HomeKZ", "RUB", "6.4", "7.2"),
            obs("RBK", "EUR", "n/a", "0"),
        ];

        let eur = build_snapshots(&observations, "EUR");
        assert!(eur.is_empty());

        let rub = build_snapshots(&observations, "RUB");
        assert_eq!(rub.len(), 1);
        assert_eq!(rub[0].name, "HomeKZ");
    }

    #[test]
    fn test_unsupported_currencies_are_ignored() {
        let observations = vec![
            obs("Kaspi", "USD", "492", "497"),
            obs("Kaspi", "GBP", "700", "720"),
        ];

        let snapshots = build_snapshots(&observations, "USD");
        assert_eq!(snapshots.len(), 1);
        assert!(snapshots[0].quote("GBP").is_none());
    }

    #[test]
    fn test_unsupported_requested_currency_keeps_every_bank() {
        let observations = vec![
            obs("Kaspi", "USD", "492", "497"),
            obs("Halyk", "USD", "490", "498"),
            obs("RBK", "EUR", "0", "0"),
        ];

        let snapshots = build_snapshots(&observations, "gbp");
        let names: Vec<_> = snapshots.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["Halyk", "Kaspi", "RBK"]);
        assert!(snapshots.iter().all(|b| b.quote("GBP").is_none()));
    }

    #[test]
    fn test_unparsable_values_count_as_zero() {
        let snapshots = build_snapshots(&[obs("Freedom", "USD", "", "544.50")], "USD");
        let quote = snapshots[0].quote("USD").unwrap();
        assert_eq!(quote.buy, 0.0);
        assert_eq!(quote.sell, 544.5);
    }
}
