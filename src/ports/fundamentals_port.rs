//! Fundamentals store port trait.

use crate::domain::error::FactorError;
use crate::domain::market::Fundamentals;
use chrono::NaiveDate;

pub trait FundamentalsStore {
    /// The latest record on or before `date`, if any.
    fn get(&self, symbol: &str, date: NaiveDate) -> Result<Option<Fundamentals>, FactorError>;
}
