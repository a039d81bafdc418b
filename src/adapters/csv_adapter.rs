//! CSV directory data adapter.
//!
//! Reads `prices.csv` (`symbol,date,price`) and, when present,
//! `fundamentals.csv` (`symbol,date,shares_outstanding,eps,total_assets,total_liabilities`,
//! empty cells meaning not on file). Files are loaded once and served from
//! memory.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Deserialize;

use crate::adapters::memory_adapter::InMemoryStore;
use crate::domain::error::FactorError;
use crate::domain::market::{Fundamentals, PricePoint, SymbolRange};
use crate::ports::fundamentals_port::FundamentalsStore;
use crate::ports::price_port::PriceStore;

pub const PRICES_FILE: &str = "prices.csv";
pub const FUNDAMENTALS_FILE: &str = "fundamentals.csv";

#[derive(Debug, Deserialize)]
struct PriceRow {
    symbol: String,
    date: NaiveDate,
    price: f64,
}

#[derive(Debug, Deserialize)]
struct FundamentalsRow {
    symbol: String,
    date: NaiveDate,
    shares_outstanding: Option<f64>,
    eps: Option<f64>,
    total_assets: Option<f64>,
    total_liabilities: Option<f64>,
}

pub struct CsvStore {
    base_path: PathBuf,
    store: InMemoryStore,
}

impl CsvStore {
    pub fn open(base_path: PathBuf, min_symbols_per_day: usize) -> Result<Self, FactorError> {
        let mut store = InMemoryStore::new().with_min_symbols_per_day(min_symbols_per_day);

        let prices_path = base_path.join(PRICES_FILE);
        let mut count = 0usize;
        for row in read_rows::<PriceRow>(&prices_path)? {
            if !row.price.is_finite() || row.price <= 0.0 {
                return Err(FactorError::Store {
                    reason: format!(
                        "{}: invalid price {} for {} on {}",
                        prices_path.display(),
                        row.price,
                        row.symbol,
                        row.date
                    ),
                });
            }
            store.insert_price(&row.symbol.to_uppercase(), row.date, row.price);
            count += 1;
        }

        let fundamentals_path = base_path.join(FUNDAMENTALS_FILE);
        if fundamentals_path.exists() {
            for row in read_rows::<FundamentalsRow>(&fundamentals_path)? {
                let record = Fundamentals {
                    shares_outstanding: row.shares_outstanding,
                    eps: row.eps,
                    total_assets: row.total_assets,
                    total_liabilities: row.total_liabilities,
                };
                store.insert_fundamentals(&row.symbol.to_uppercase(), row.date, record);
            }
        }

        tracing::info!(
            path = %base_path.display(),
            prices = count,
            symbols = store.symbols().len(),
            "loaded csv prices"
        );
        Ok(Self { base_path, store })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn symbols(&self) -> Vec<String> {
        self.store.symbols()
    }
}

fn read_rows<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>, FactorError> {
    let content = fs::read_to_string(path).map_err(|e| FactorError::Store {
        reason: format!("failed to read {}: {}", path.display(), e),
    })?;
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());
    rdr.deserialize()
        .map(|row| {
            row.map_err(|e| FactorError::Store {
                reason: format!("CSV parse error in {}: {}", path.display(), e),
            })
        })
        .collect()
}

impl PriceStore for CsvStore {
    fn get_many(&self, ranges: &[SymbolRange]) -> Result<Vec<PricePoint>, FactorError> {
        self.store.get_many(ranges)
    }

    fn list_trading_days(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>, FactorError> {
        self.store.list_trading_days(start, end)
    }

    fn get_many_on_day(
        &self,
        symbols: &[String],
        date: NaiveDate,
    ) -> Result<HashMap<String, f64>, FactorError> {
        self.store.get_many_on_day(symbols, date)
    }

    fn latest_trading_day(&self) -> Result<Option<NaiveDate>, FactorError> {
        self.store.latest_trading_day()
    }
}

impl FundamentalsStore for CsvStore {
    fn get(&self, symbol: &str, date: NaiveDate) -> Result<Option<Fundamentals>, FactorError> {
        FundamentalsStore::get(&self.store, symbol, date)
    }
}
