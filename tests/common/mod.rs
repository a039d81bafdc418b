#![allow(dead_code)]

use chrono::{Datelike, NaiveDate};
use factorbt::adapters::memory_adapter::InMemoryStore;
use factorbt::domain::error::FactorError;
use factorbt::domain::market::{Fundamentals, PricePoint, SymbolRange};
use factorbt::ports::fundamentals_port::FundamentalsStore;
use factorbt::ports::price_port::PriceStore;
use std::collections::HashMap;

/// Price store backed by an [`InMemoryStore`] that can be told to fail.
pub struct MockStore {
    pub inner: InMemoryStore,
    pub error: Option<String>,
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            error: None,
        }
    }

    pub fn with_prices(mut self, symbol: &str, prices: &[(NaiveDate, f64)]) -> Self {
        for (date, price) in prices {
            self.inner.insert_price(symbol, *date, *price);
        }
        self
    }

    pub fn with_fundamentals(mut self, symbol: &str, date: NaiveDate, record: Fundamentals) -> Self {
        self.inner.insert_fundamentals(symbol, date, record);
        self
    }

    pub fn with_error(mut self, reason: &str) -> Self {
        self.error = Some(reason.to_string());
        self
    }

    fn check(&self) -> Result<(), FactorError> {
        match &self.error {
            Some(reason) => Err(FactorError::Store {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl PriceStore for MockStore {
    fn get_many(&self, ranges: &[SymbolRange]) -> Result<Vec<PricePoint>, FactorError> {
        self.check()?;
        self.inner.get_many(ranges)
    }

    fn list_trading_days(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>, FactorError> {
        self.check()?;
        self.inner.list_trading_days(start, end)
    }

    fn get_many_on_day(
        &self,
        symbols: &[String],
        date: NaiveDate,
    ) -> Result<HashMap<String, f64>, FactorError> {
        self.check()?;
        self.inner.get_many_on_day(symbols, date)
    }

    fn latest_trading_day(&self) -> Result<Option<NaiveDate>, FactorError> {
        self.check()?;
        self.inner.latest_trading_day()
    }
}

impl FundamentalsStore for MockStore {
    fn get(&self, symbol: &str, date: NaiveDate) -> Result<Option<Fundamentals>, FactorError> {
        self.check()?;
        FundamentalsStore::get(&self.inner, symbol, date)
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn symbols(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Monday to Friday dates in `[start, end]`.
pub fn weekdays(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| d.weekday().number_from_monday() <= 5)
        .collect()
}

/// Consecutive weekday prices starting at `start`.
pub fn series(start: NaiveDate, prices: &[f64]) -> Vec<(NaiveDate, f64)> {
    start
        .iter_days()
        .filter(|d| d.weekday().number_from_monday() <= 5)
        .zip(prices.iter().copied())
        .collect()
}

/// Linear weekday prices over `[start, end]`: `base`, `base + step`, ...
pub fn ramp(start: NaiveDate, end: NaiveDate, base: f64, step: f64) -> Vec<(NaiveDate, f64)> {
    weekdays(start, end)
        .into_iter()
        .enumerate()
        .map(|(i, d)| (d, base + step * i as f64))
        .collect()
}
