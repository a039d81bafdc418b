//! Asset universe: symbol lists from configuration, narrowed to symbols the
//! price store actually covers.

use std::collections::HashSet;

use chrono::NaiveDate;

use crate::domain::error::FactorError;
use crate::domain::market::SymbolRange;
use crate::domain::price_cache::{GAP_FILL_DAYS, days_before};
use crate::ports::price_port::PriceStore;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UniverseError {
    #[error("empty token in symbol list")]
    EmptyToken,

    #[error("duplicate symbol: {0}")]
    DuplicateSymbol(String),
}

/// Comma-separated symbols, trimmed and upper-cased, without duplicates.
pub fn parse_symbols(input: &str) -> Result<Vec<String>, UniverseError> {
    let mut symbols = Vec::new();
    let mut seen = HashSet::new();

    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(UniverseError::EmptyToken);
        }
        let symbol = trimmed.to_uppercase();
        if !seen.insert(symbol.clone()) {
            return Err(UniverseError::DuplicateSymbol(symbol));
        }
        symbols.push(symbol);
    }

    Ok(symbols)
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniverseCoverage {
    pub symbols: Vec<String>,
    /// Symbols with no stored price in the window.
    pub skipped: Vec<String>,
}

/// Keep the symbols that have at least one stored price in
/// `[start - GAP_FILL_DAYS, end]`. Fails when none do.
pub fn check_coverage(
    store: &dyn PriceStore,
    symbols: &[String],
    start: NaiveDate,
    end: NaiveDate,
) -> Result<UniverseCoverage, FactorError> {
    let window_start = days_before(start, GAP_FILL_DAYS);
    let ranges: Vec<SymbolRange> = symbols
        .iter()
        .map(|symbol| SymbolRange {
            symbol: symbol.clone(),
            start: window_start,
            end,
        })
        .collect();
    let priced: HashSet<String> = store
        .get_many(&ranges)?
        .into_iter()
        .map(|point| point.symbol)
        .collect();

    let (covered, skipped): (Vec<String>, Vec<String>) = symbols
        .iter()
        .cloned()
        .partition(|symbol| priced.contains(symbol));
    for symbol in &skipped {
        tracing::warn!(%symbol, %start, %end, "no prices in backtest window, skipping");
    }
    if covered.is_empty() {
        return Err(FactorError::NoInputs);
    }

    Ok(UniverseCoverage {
        symbols: covered,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_adapter::InMemoryStore;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    #[test]
    fn parse_symbols_basic() {
        let result = parse_symbols("AAPL,MSFT,GOOG,NVDA").unwrap();
        assert_eq!(result, vec!["AAPL", "MSFT", "GOOG", "NVDA"]);
    }

    #[test]
    fn parse_symbols_with_whitespace() {
        let result = parse_symbols("  AAPL , MSFT ,GOOG,  NVDA  ").unwrap();
        assert_eq!(result, vec!["AAPL", "MSFT", "GOOG", "NVDA"]);
    }

    #[test]
    fn parse_symbols_uppercase() {
        let result = parse_symbols("aapl,msft,brk.b").unwrap();
        assert_eq!(result, vec!["AAPL", "MSFT", "BRK.B"]);
    }

    #[test]
    fn parse_symbols_empty_token() {
        let result = parse_symbols("AAPL,,MSFT");
        assert_eq!(result, Err(UniverseError::EmptyToken));
        assert_eq!(parse_symbols(""), Err(UniverseError::EmptyToken));
    }

    #[test]
    fn parse_symbols_duplicate() {
        let result = parse_symbols("AAPL,MSFT,aapl");
        assert!(matches!(result, Err(UniverseError::DuplicateSymbol(s)) if s == "AAPL"));
    }

    #[test]
    fn coverage_skips_unpriced_symbols() {
        let store = InMemoryStore::new()
            .with_price("AAPL", date(1, 3), 10.0)
            .with_price("MSFT", date(2, 20), 10.0)
            .with_price("GOOG", date(1, 1), 10.0);
        let symbols = parse_symbols("AAPL,MSFT,GOOG").unwrap();
        let coverage = check_coverage(&store, &symbols, date(1, 5), date(1, 31)).unwrap();
        assert_eq!(coverage.symbols, vec!["AAPL", "GOOG"]);
        assert_eq!(coverage.skipped, vec!["MSFT"]);
    }

    #[test]
    fn coverage_requires_one_symbol() {
        let store = InMemoryStore::new();
        let symbols = parse_symbols("AAPL").unwrap();
        let err = check_coverage(&store, &symbols, date(1, 5), date(1, 31)).unwrap_err();
        assert!(matches!(err, FactorError::NoInputs));
    }
}
