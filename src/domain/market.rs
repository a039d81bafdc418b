//! Market data records exchanged with the stores.

use chrono::{NaiveDate, NaiveDateTime};

/// One stored closing price. A symbol has at most one price per date.
#[derive(Debug, Clone, PartialEq)]
pub struct PricePoint {
    pub symbol: String,
    pub date: NaiveDate,
    pub price: f64,
}

impl PricePoint {
    pub fn new(symbol: &str, date: NaiveDate, price: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            date,
            price,
        }
    }
}

/// Inclusive date range to fetch for one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRange {
    pub symbol: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Balance-sheet figures on file for a symbol. Any field may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Fundamentals {
    pub shares_outstanding: Option<f64>,
    pub eps: Option<f64>,
    pub total_assets: Option<f64>,
    pub total_liabilities: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveQuote {
    pub price: f64,
    pub timestamp: NaiveDateTime,
}

impl LiveQuote {
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }
}

/// Percent change from `start` to `end`, measured against `end`.
pub fn percent_change(start: f64, end: f64) -> f64 {
    (end - start) / end * 100.0
}
