//! Live quote source port trait.

use crate::domain::error::FactorError;
use crate::domain::market::LiveQuote;
use std::collections::HashMap;

pub trait LiveQuoteSource {
    fn latest_quotes(&self, symbols: &[String]) -> Result<HashMap<String, LiveQuote>, FactorError>;
}
