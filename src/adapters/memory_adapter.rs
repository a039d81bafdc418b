//! In-memory store holding prices, fundamentals and live quotes.
//!
//! A date is a trading day when at least `min_symbols_per_day` symbols have a
//! stored price on it.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;

use crate::domain::error::FactorError;
use crate::domain::market::{Fundamentals, LiveQuote, PricePoint, SymbolRange};
use crate::ports::fundamentals_port::FundamentalsStore;
use crate::ports::price_port::PriceStore;
use crate::ports::quote_port::LiveQuoteSource;

#[derive(Debug, Clone)]
pub struct InMemoryStore {
    prices: BTreeMap<String, BTreeMap<NaiveDate, f64>>,
    fundamentals: HashMap<String, BTreeMap<NaiveDate, Fundamentals>>,
    quotes: HashMap<String, LiveQuote>,
    min_symbols_per_day: usize,
    failure: Option<String>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            prices: BTreeMap::new(),
            fundamentals: HashMap::new(),
            quotes: HashMap::new(),
            min_symbols_per_day: 1,
            failure: None,
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_points(points: impl IntoIterator<Item = PricePoint>) -> Self {
        let mut store = Self::new();
        for point in points {
            store.insert_price(&point.symbol, point.date, point.price);
        }
        store
    }

    pub fn insert_price(&mut self, symbol: &str, date: NaiveDate, price: f64) {
        self.prices
            .entry(symbol.to_string())
            .or_default()
            .insert(date, price);
    }

    pub fn with_price(mut self, symbol: &str, date: NaiveDate, price: f64) -> Self {
        self.insert_price(symbol, date, price);
        self
    }

    pub fn insert_fundamentals(&mut self, symbol: &str, date: NaiveDate, record: Fundamentals) {
        self.fundamentals
            .entry(symbol.to_string())
            .or_default()
            .insert(date, record);
    }

    pub fn with_fundamentals(mut self, symbol: &str, date: NaiveDate, record: Fundamentals) -> Self {
        self.insert_fundamentals(symbol, date, record);
        self
    }

    pub fn with_quote(mut self, symbol: &str, quote: LiveQuote) -> Self {
        self.quotes.insert(symbol.to_string(), quote);
        self
    }

    pub fn with_min_symbols_per_day(mut self, count: usize) -> Self {
        self.min_symbols_per_day = count.max(1);
        self
    }

    /// Make every query fail with a store error.
    pub fn with_failure(mut self, reason: &str) -> Self {
        self.failure = Some(reason.to_string());
        self
    }

    pub fn symbols(&self) -> Vec<String> {
        self.prices.keys().cloned().collect()
    }

    fn check(&self) -> Result<(), FactorError> {
        match &self.failure {
            Some(reason) => Err(FactorError::Store {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn symbols_per_day(&self, start: NaiveDate, end: NaiveDate) -> BTreeMap<NaiveDate, usize> {
        let mut counts: BTreeMap<NaiveDate, usize> = BTreeMap::new();
        for by_date in self.prices.values() {
            for date in by_date.range(start..=end).map(|(d, _)| *d) {
                *counts.entry(date).or_default() += 1;
            }
        }
        counts
    }
}

impl PriceStore for InMemoryStore {
    fn get_many(&self, ranges: &[SymbolRange]) -> Result<Vec<PricePoint>, FactorError> {
        self.check()?;
        let mut points = Vec::new();
        for range in ranges {
            if range.start > range.end {
                continue;
            }
            if let Some(by_date) = self.prices.get(&range.symbol) {
                points.extend(
                    by_date
                        .range(range.start..=range.end)
                        .map(|(date, price)| PricePoint::new(&range.symbol, *date, *price)),
                );
            }
        }
        Ok(points)
    }

    fn list_trading_days(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>, FactorError> {
        self.check()?;
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self
            .symbols_per_day(start, end)
            .into_iter()
            .filter(|(_, count)| *count >= self.min_symbols_per_day)
            .map(|(date, _)| date)
            .collect())
    }

    fn get_many_on_day(
        &self,
        symbols: &[String],
        date: NaiveDate,
    ) -> Result<HashMap<String, f64>, FactorError> {
        self.check()?;
        Ok(symbols
            .iter()
            .filter_map(|symbol| {
                self.prices
                    .get(symbol)
                    .and_then(|by_date| by_date.get(&date))
                    .map(|price| (symbol.clone(), *price))
            })
            .collect())
    }

    fn latest_trading_day(&self) -> Result<Option<NaiveDate>, FactorError> {
        self.check()?;
        let latest = self
            .prices
            .values()
            .filter_map(|by_date| by_date.keys().next_back())
            .max()
            .copied();
        match latest {
            Some(last) => Ok(self.list_trading_days(NaiveDate::MIN, last)?.last().copied()),
            None => Ok(None),
        }
    }
}

impl FundamentalsStore for InMemoryStore {
    fn get(&self, symbol: &str, date: NaiveDate) -> Result<Option<Fundamentals>, FactorError> {
        self.check()?;
        Ok(self
            .fundamentals
            .get(symbol)
            .and_then(|by_date| by_date.range(..=date).next_back())
            .map(|(_, record)| *record))
    }
}

impl LiveQuoteSource for InMemoryStore {
    fn latest_quotes(&self, symbols: &[String]) -> Result<HashMap<String, LiveQuote>, FactorError> {
        self.check()?;
        Ok(symbols
            .iter()
            .filter_map(|s| self.quotes.get(s).map(|q| (s.clone(), *q)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample_store() -> InMemoryStore {
        InMemoryStore::new()
            .with_price("AAPL", date(2024, 1, 2), 10.0)
            .with_price("AAPL", date(2024, 1, 3), 11.0)
            .with_price("MSFT", date(2024, 1, 3), 20.0)
            .with_price("MSFT", date(2024, 1, 4), 21.0)
    }

    #[test]
    fn get_many_respects_ranges() {
        let store = sample_store();
        let points = store
            .get_many(&[
                SymbolRange {
                    symbol: "AAPL".into(),
                    start: date(2024, 1, 3),
                    end: date(2024, 1, 10),
                },
                SymbolRange {
                    symbol: "GOOG".into(),
                    start: date(2024, 1, 1),
                    end: date(2024, 1, 10),
                },
            ])
            .unwrap();
        assert_eq!(points, vec![PricePoint::new("AAPL", date(2024, 1, 3), 11.0)]);
    }

    #[test]
    fn trading_days_are_priced_dates() {
        let store = sample_store();
        let days = store
            .list_trading_days(date(2024, 1, 1), date(2024, 1, 31))
            .unwrap();
        assert_eq!(days, vec![date(2024, 1, 2), date(2024, 1, 3), date(2024, 1, 4)]);
    }

    #[test]
    fn trading_days_respect_coverage_threshold() {
        let store = sample_store().with_min_symbols_per_day(2);
        let days = store
            .list_trading_days(date(2024, 1, 1), date(2024, 1, 31))
            .unwrap();
        assert_eq!(days, vec![date(2024, 1, 3)]);
        assert_eq!(store.latest_trading_day().unwrap(), Some(date(2024, 1, 3)));
    }

    #[test]
    fn prices_on_day_skip_unpriced_symbols() {
        let store = sample_store();
        let prices = store
            .get_many_on_day(&["AAPL".into(), "MSFT".into()], date(2024, 1, 4))
            .unwrap();
        assert_eq!(prices.len(), 1);
        assert!((prices["MSFT"] - 21.0).abs() < f64::EPSILON);
    }

    #[test]
    fn fundamentals_use_latest_on_or_before() {
        let older = Fundamentals {
            eps: Some(1.0),
            ..Default::default()
        };
        let newer = Fundamentals {
            eps: Some(2.0),
            ..Default::default()
        };
        let store = InMemoryStore::new()
            .with_fundamentals("AAPL", date(2023, 6, 30), older)
            .with_fundamentals("AAPL", date(2023, 12, 31), newer);
        assert_eq!(store.get("AAPL", date(2023, 12, 30)).unwrap(), Some(older));
        assert_eq!(store.get("AAPL", date(2024, 2, 1)).unwrap(), Some(newer));
        assert_eq!(store.get("AAPL", date(2023, 1, 1)).unwrap(), None);
    }

    #[test]
    fn failure_applies_to_every_query() {
        let store = sample_store().with_failure("offline");
        assert!(store.latest_trading_day().is_err());
        assert!(matches!(
            store.list_trading_days(date(2024, 1, 1), date(2024, 1, 2)),
            Err(FactorError::Store { .. })
        ));
    }
}
