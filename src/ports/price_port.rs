//! Price store port trait.

use crate::domain::error::FactorError;
use crate::domain::market::{PricePoint, SymbolRange};
use chrono::NaiveDate;
use std::collections::HashMap;

pub trait PriceStore {
    /// Every stored point inside any of the given ranges.
    fn get_many(&self, ranges: &[SymbolRange]) -> Result<Vec<PricePoint>, FactorError>;

    /// Ordered, deduplicated trading days in `[start, end]`.
    fn list_trading_days(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>, FactorError>;

    /// Exact-date prices for the given symbols. Symbols without a price that
    /// day are absent from the map.
    fn get_many_on_day(
        &self,
        symbols: &[String],
        date: NaiveDate,
    ) -> Result<HashMap<String, f64>, FactorError>;

    fn latest_trading_day(&self) -> Result<Option<NaiveDate>, FactorError>;
}
