//! Price and volatility cache.
//!
//! Built once per batch from the dry-run [`Requirements`], then read-only.
//! It holds exactly the requested points, each either stored on that date or
//! copied forward from at most [`GAP_FILL_DAYS`] calendar days earlier.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{Duration, NaiveDate};

use crate::domain::dependency::Requirements;
use crate::domain::error::{CacheMiss, EvalError, FactorError};
use crate::domain::expr_eval::MetricSource;
use crate::domain::market::{Fundamentals, SymbolRange, percent_change};
use crate::ports::fundamentals_port::FundamentalsStore;
use crate::ports::price_port::PriceStore;
use crate::ports::quote_port::LiveQuoteSource;

/// How far back a missing price may be filled from, and how close a return
/// series must reach to a volatility window's boundaries.
pub const GAP_FILL_DAYS: i64 = 7;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

type Window = (NaiveDate, NaiveDate);

#[derive(Debug, Default)]
pub struct PriceCache {
    prices: HashMap<String, BTreeMap<NaiveDate, f64>>,
    stdevs: HashMap<String, HashMap<Window, f64>>,
    fundamentals: HashMap<String, HashMap<NaiveDate, Option<Fundamentals>>>,
    trading_days: Vec<NaiveDate>,
    requested_prices: HashMap<String, HashSet<NaiveDate>>,
    requested_stdevs: HashMap<String, HashSet<Window>>,
}

impl PriceCache {
    pub fn get(&self, symbol: &str, date: NaiveDate) -> Result<f64, CacheMiss> {
        self.prices
            .get(symbol)
            .and_then(|by_date| by_date.get(&date))
            .copied()
            .ok_or_else(|| CacheMiss::Price {
                symbol: symbol.to_string(),
                date,
                requested: self
                    .requested_prices
                    .get(symbol)
                    .is_some_and(|dates| dates.contains(&date)),
            })
    }

    pub fn get_stdev(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<f64, CacheMiss> {
        self.stdevs
            .get(symbol)
            .and_then(|windows| windows.get(&(start, end)))
            .copied()
            .ok_or_else(|| CacheMiss::Stdev {
                symbol: symbol.to_string(),
                start,
                end,
                requested: self
                    .requested_stdevs
                    .get(symbol)
                    .is_some_and(|windows| windows.contains(&(start, end))),
            })
    }

    pub fn get_fundamentals(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<Fundamentals>, CacheMiss> {
        self.fundamentals
            .get(symbol)
            .and_then(|by_date| by_date.get(&date))
            .copied()
            .ok_or_else(|| CacheMiss::Fundamentals {
                symbol: symbol.to_string(),
                date,
            })
    }

    /// Known trading days in the loaded range, ascending.
    pub fn trading_days(&self) -> &[NaiveDate] {
        &self.trading_days
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        self.trading_days.binary_search(&date).is_ok()
    }

    /// Number of cached price points.
    pub fn len(&self) -> usize {
        self.prices.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetricSource for PriceCache {
    fn price(&self, symbol: &str, date: NaiveDate) -> Result<f64, EvalError> {
        Ok(self.get(symbol, date)?)
    }

    fn stdev(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<f64, EvalError> {
        Ok(self.get_stdev(symbol, start, end)?)
    }

    fn fundamentals(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<Fundamentals>, EvalError> {
        Ok(self.get_fundamentals(symbol, date)?)
    }
}

/// Loads a [`PriceCache`] from the stores.
pub struct PriceCacheLoader<'a> {
    prices: &'a dyn PriceStore,
    fundamentals: Option<&'a dyn FundamentalsStore>,
    quotes: Option<&'a dyn LiveQuoteSource>,
}

impl<'a> PriceCacheLoader<'a> {
    pub fn new(prices: &'a dyn PriceStore) -> Self {
        Self {
            prices,
            fundamentals: None,
            quotes: None,
        }
    }

    pub fn with_fundamentals(mut self, store: &'a dyn FundamentalsStore) -> Self {
        self.fundamentals = Some(store);
        self
    }

    pub fn with_live_quotes(mut self, source: &'a dyn LiveQuoteSource) -> Self {
        self.quotes = Some(source);
        self
    }

    pub fn load(&self, requirements: &Requirements) -> Result<PriceCache, FactorError> {
        let mut cache = PriceCache::default();
        for req in &requirements.prices {
            cache
                .requested_prices
                .entry(req.symbol.clone())
                .or_default()
                .insert(req.date);
        }
        for req in &requirements.stdevs {
            cache
                .requested_stdevs
                .entry(req.symbol.clone())
                .or_default()
                .insert((req.start, req.end));
        }

        let windows = symbol_windows(requirements);
        if let Some((abs_min, abs_max)) = absolute_window(&windows) {
            let ranges: Vec<SymbolRange> = windows
                .iter()
                .map(|(symbol, (min, max))| SymbolRange {
                    symbol: symbol.clone(),
                    start: days_before(*min, GAP_FILL_DAYS),
                    end: *max,
                })
                .collect();

            let mut raw: HashMap<String, BTreeMap<NaiveDate, f64>> = HashMap::new();
            for point in self.prices.get_many(&ranges)? {
                raw.entry(point.symbol).or_default().insert(point.date, point.price);
            }
            let mut trading_days = self.prices.list_trading_days(days_before(abs_min, GAP_FILL_DAYS), abs_max)?;

            if let Some(quotes) = self.quotes {
                let symbols: Vec<String> = windows.keys().cloned().collect();
                merge_live_quotes(quotes, &symbols, &mut raw, &mut trading_days)?;
            }

            for req in &requirements.prices {
                let filled = raw
                    .get(&req.symbol)
                    .and_then(|by_date| latest_within(by_date, req.date));
                if let Some(price) = filled {
                    cache
                        .prices
                        .entry(req.symbol.clone())
                        .or_default()
                        .insert(req.date, price);
                }
            }

            let mut returns_by_symbol: HashMap<&str, Vec<(NaiveDate, f64)>> = HashMap::new();
            for req in &requirements.stdevs {
                let returns = returns_by_symbol
                    .entry(req.symbol.as_str())
                    .or_insert_with(|| {
                        match (raw.get(&req.symbol), windows.get(&req.symbol)) {
                            (Some(by_date), Some(window)) => daily_returns(by_date, *window),
                            _ => Vec::new(),
                        }
                    });
                let stdev = annualized_stdev(returns, req.start, req.end);
                match stdev {
                    Some(value) => {
                        cache
                            .stdevs
                            .entry(req.symbol.clone())
                            .or_default()
                            .insert((req.start, req.end), value);
                    }
                    None => tracing::debug!(
                        symbol = %req.symbol,
                        start = %req.start,
                        end = %req.end,
                        "volatility window not covered by stored prices"
                    ),
                }
            }

            cache.trading_days = trading_days;
        }

        for req in &requirements.fundamentals {
            let record = match self.fundamentals {
                Some(store) => store.get(&req.symbol, req.date)?,
                None => None,
            };
            cache
                .fundamentals
                .entry(req.symbol.clone())
                .or_default()
                .insert(req.date, record);
        }

        tracing::info!(
            symbols = windows.len(),
            prices = cache.len(),
            requested_prices = requirements.prices.len(),
            stdevs = requirements.stdevs.len(),
            trading_days = cache.trading_days.len(),
            "price cache loaded"
        );
        Ok(cache)
    }
}

fn symbol_windows(requirements: &Requirements) -> BTreeMap<String, Window> {
    let mut windows: BTreeMap<String, Window> = BTreeMap::new();
    let mut widen = |symbol: &str, lo: NaiveDate, hi: NaiveDate| {
        windows
            .entry(symbol.to_string())
            .and_modify(|(min, max)| {
                *min = (*min).min(lo);
                *max = (*max).max(hi);
            })
            .or_insert((lo, hi));
    };
    for req in &requirements.prices {
        widen(&req.symbol, req.date, req.date);
    }
    for req in &requirements.stdevs {
        widen(&req.symbol, req.start, req.end);
    }
    windows
}

fn absolute_window(windows: &BTreeMap<String, Window>) -> Option<Window> {
    let min = windows.values().map(|(lo, _)| *lo).min()?;
    let max = windows.values().map(|(_, hi)| *hi).max()?;
    Some((min, max))
}

/// Appends quotes dated after the last known trading day, adding their
/// dates as trading days.
fn merge_live_quotes(
    source: &dyn LiveQuoteSource,
    symbols: &[String],
    raw: &mut HashMap<String, BTreeMap<NaiveDate, f64>>,
    trading_days: &mut Vec<NaiveDate>,
) -> Result<(), FactorError> {
    let last_known = trading_days.last().copied();
    let mut new_days = BTreeSet::new();

    for (symbol, quote) in source.latest_quotes(symbols)? {
        let date = quote.date();
        if last_known.is_none_or(|last| date > last) {
            raw.entry(symbol).or_default().insert(date, quote.price);
            new_days.insert(date);
        }
    }

    if !new_days.is_empty() {
        tracing::debug!(days = new_days.len(), "merged live quotes as trading days");
    }
    trading_days.extend(new_days);
    Ok(())
}

/// `date` moved back `days` calendar days, clamped to the earliest
/// representable date.
pub fn days_before(date: NaiveDate, days: i64) -> NaiveDate {
    Duration::try_days(days)
        .and_then(|d| date.checked_sub_signed(d))
        .unwrap_or(NaiveDate::MIN)
}

/// `date` moved forward `days` calendar days, clamped to the latest
/// representable date.
pub fn days_after(date: NaiveDate, days: i64) -> NaiveDate {
    Duration::try_days(days)
        .and_then(|d| date.checked_add_signed(d))
        .unwrap_or(NaiveDate::MAX)
}

/// Price on `date`, or the nearest earlier price within [`GAP_FILL_DAYS`].
fn latest_within(by_date: &BTreeMap<NaiveDate, f64>, date: NaiveDate) -> Option<f64> {
    let earliest = days_before(date, GAP_FILL_DAYS);
    by_date
        .range(earliest..=date)
        .next_back()
        .map(|(_, price)| *price)
}

/// Returns between consecutive stored prices inside `window`, keyed by the
/// later date.
fn daily_returns(by_date: &BTreeMap<NaiveDate, f64>, window: Window) -> Vec<(NaiveDate, f64)> {
    let points: Vec<(&NaiveDate, &f64)> = by_date.range(window.0..=window.1).collect();
    points
        .windows(2)
        .map(|pair| (*pair[1].0, percent_change(*pair[0].1, *pair[1].1)))
        .collect()
}

/// Sample standard deviation of the returns in `[start, end]`, scaled by
/// sqrt(252). `None` when the series does not reach within
/// [`GAP_FILL_DAYS`] of both boundaries or holds fewer than two returns.
fn annualized_stdev(returns: &[(NaiveDate, f64)], start: NaiveDate, end: NaiveDate) -> Option<f64> {
    let (first, _) = returns.first()?;
    let (last, _) = returns.last()?;
    if *first > days_after(start, GAP_FILL_DAYS) || *last < days_before(end, GAP_FILL_DAYS) {
        return None;
    }

    let inside: Vec<f64> = returns
        .iter()
        .filter(|(date, _)| *date >= start && *date <= end)
        .map(|(_, r)| *r)
        .collect();
    sample_stdev(&inside).map(|s| s * TRADING_DAYS_PER_YEAR.sqrt())
}

pub fn sample_stdev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_adapter::InMemoryStore;
    use crate::domain::dependency::{PriceRequest, StdevRequest};
    use crate::domain::market::LiveQuote;
    use chrono::Datelike;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn price_req(symbol: &str, date: NaiveDate) -> PriceRequest {
        PriceRequest {
            symbol: symbol.to_string(),
            date,
        }
    }

    fn stdev_req(symbol: &str, start: NaiveDate, end: NaiveDate) -> StdevRequest {
        StdevRequest {
            symbol: symbol.to_string(),
            start,
            end,
        }
    }

    fn prices_only(reqs: Vec<PriceRequest>) -> Requirements {
        Requirements {
            prices: reqs,
            ..Default::default()
        }
    }

    /// Weekday prices for January 2024, rising by one each session.
    fn january_store() -> InMemoryStore {
        let mut store = InMemoryStore::new();
        let mut price = 100.0;
        for day in 1..=31 {
            let d = date(2024, 1, day);
            if d.weekday().number_from_monday() <= 5 {
                store.insert_price("AAPL", d, price);
                price += 1.0;
            }
        }
        store
    }

    #[test]
    fn exact_points_round_trip() {
        let store = january_store();
        let reqs = prices_only(vec![
            price_req("AAPL", date(2024, 1, 2)),
            price_req("AAPL", date(2024, 1, 10)),
        ]);
        let cache = PriceCacheLoader::new(&store).load(&reqs).unwrap();
        assert!((cache.get("AAPL", date(2024, 1, 2)).unwrap() - 101.0).abs() < f64::EPSILON);
        assert!((cache.get("AAPL", date(2024, 1, 10)).unwrap() - 107.0).abs() < f64::EPSILON);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn weekend_is_filled_from_friday() {
        let store = january_store();
        let reqs = prices_only(vec![price_req("AAPL", date(2024, 1, 7))]);
        let cache = PriceCacheLoader::new(&store).load(&reqs).unwrap();
        // Friday Jan 5 is the fifth session.
        assert!((cache.get("AAPL", date(2024, 1, 7)).unwrap() - 104.0).abs() < f64::EPSILON);
    }

    #[test]
    fn gap_fill_reaches_exactly_seven_days() {
        let store = InMemoryStore::new().with_price("AAPL", date(2024, 1, 1), 50.0);
        let reqs = prices_only(vec![
            price_req("AAPL", date(2024, 1, 8)),
            price_req("AAPL", date(2024, 1, 9)),
        ]);
        let cache = PriceCacheLoader::new(&store).load(&reqs).unwrap();
        assert!((cache.get("AAPL", date(2024, 1, 8)).unwrap() - 50.0).abs() < f64::EPSILON);
        let miss = cache.get("AAPL", date(2024, 1, 9)).unwrap_err();
        assert!(!miss.is_internal_fault());
    }

    #[test]
    fn only_requested_points_are_cached() {
        let store = january_store();
        let reqs = prices_only(vec![price_req("AAPL", date(2024, 1, 10))]);
        let cache = PriceCacheLoader::new(&store).load(&reqs).unwrap();
        assert_eq!(cache.len(), 1);
        let miss = cache.get("AAPL", date(2024, 1, 9)).unwrap_err();
        assert!(miss.is_internal_fault());
    }

    #[test]
    fn trading_days_include_buffer() {
        let store = january_store();
        let reqs = prices_only(vec![price_req("AAPL", date(2024, 1, 10))]);
        let cache = PriceCacheLoader::new(&store).load(&reqs).unwrap();
        assert_eq!(cache.trading_days().first(), Some(&date(2024, 1, 3)));
        assert_eq!(cache.trading_days().last(), Some(&date(2024, 1, 10)));
        assert!(cache.is_trading_day(date(2024, 1, 5)));
        assert!(!cache.is_trading_day(date(2024, 1, 6)));
    }

    #[test]
    fn empty_requirements_load_empty_cache() {
        let store = january_store();
        let cache = PriceCacheLoader::new(&store)
            .load(&Requirements::default())
            .unwrap();
        assert!(cache.is_empty());
        assert!(cache.trading_days().is_empty());
    }

    #[test]
    fn store_failure_propagates() {
        let store = january_store().with_failure("connection reset");
        let reqs = prices_only(vec![price_req("AAPL", date(2024, 1, 10))]);
        let err = PriceCacheLoader::new(&store).load(&reqs).unwrap_err();
        assert!(matches!(err, FactorError::Store { .. }));
    }

    #[test]
    fn stdev_matches_hand_computation() {
        let store = InMemoryStore::new()
            .with_price("AAPL", date(2024, 1, 1), 100.0)
            .with_price("AAPL", date(2024, 1, 2), 110.0)
            .with_price("AAPL", date(2024, 1, 3), 99.0)
            .with_price("AAPL", date(2024, 1, 4), 108.0);
        let reqs = Requirements {
            stdevs: vec![stdev_req("AAPL", date(2024, 1, 1), date(2024, 1, 4))],
            ..Default::default()
        };
        let cache = PriceCacheLoader::new(&store).load(&reqs).unwrap();

        let returns = [
            percent_change(100.0, 110.0),
            percent_change(110.0, 99.0),
            percent_change(99.0, 108.0),
        ];
        let expected = sample_stdev(&returns).unwrap() * 252f64.sqrt();
        let actual = cache.get_stdev("AAPL", date(2024, 1, 1), date(2024, 1, 4)).unwrap();
        approx::assert_relative_eq!(actual, expected, epsilon = 1e-12);
    }

    #[test]
    fn stdev_window_beyond_data_is_a_miss() {
        let store = january_store();
        let reqs = Requirements {
            stdevs: vec![
                stdev_req("AAPL", date(2023, 12, 1), date(2024, 1, 31)),
                stdev_req("AAPL", date(2024, 1, 1), date(2024, 1, 31)),
            ],
            ..Default::default()
        };
        let cache = PriceCacheLoader::new(&store).load(&reqs).unwrap();
        let miss = cache
            .get_stdev("AAPL", date(2023, 12, 1), date(2024, 1, 31))
            .unwrap_err();
        assert!(!miss.is_internal_fault());
        assert!(cache.get_stdev("AAPL", date(2024, 1, 1), date(2024, 1, 31)).is_ok());
    }

    #[test]
    fn stdev_window_past_end_of_data_is_a_miss() {
        let store = january_store();
        let reqs = Requirements {
            stdevs: vec![stdev_req("AAPL", date(2024, 1, 1), date(2024, 2, 15))],
            ..Default::default()
        };
        let cache = PriceCacheLoader::new(&store).load(&reqs).unwrap();
        assert!(cache.get_stdev("AAPL", date(2024, 1, 1), date(2024, 2, 15)).is_err());
    }

    #[test]
    fn constant_prices_have_zero_stdev() {
        let mut store = InMemoryStore::new();
        for day in 1..=10 {
            store.insert_price("MSFT", date(2024, 1, day), 42.0);
        }
        let reqs = Requirements {
            stdevs: vec![stdev_req("MSFT", date(2024, 1, 1), date(2024, 1, 10))],
            ..Default::default()
        };
        let cache = PriceCacheLoader::new(&store).load(&reqs).unwrap();
        assert_eq!(cache.get_stdev("MSFT", date(2024, 1, 1), date(2024, 1, 10)).unwrap(), 0.0);
    }

    #[test]
    fn live_quote_after_last_trading_day_is_merged() {
        let timestamp = date(2024, 2, 1).and_hms_opt(14, 0, 0).unwrap();
        let store = january_store().with_quote(
            "AAPL",
            LiveQuote {
                price: 200.0,
                timestamp,
            },
        );
        let reqs = prices_only(vec![
            price_req("AAPL", date(2024, 1, 31)),
            price_req("AAPL", date(2024, 2, 1)),
        ]);
        let cache = PriceCacheLoader::new(&store)
            .with_live_quotes(&store)
            .load(&reqs)
            .unwrap();
        assert!((cache.get("AAPL", date(2024, 2, 1)).unwrap() - 200.0).abs() < f64::EPSILON);
        assert_eq!(cache.trading_days().last(), Some(&date(2024, 2, 1)));
    }

    #[test]
    fn stale_live_quote_is_ignored() {
        let timestamp = date(2024, 1, 10).and_hms_opt(14, 0, 0).unwrap();
        let store = january_store().with_quote(
            "AAPL",
            LiveQuote {
                price: 999.0,
                timestamp,
            },
        );
        let reqs = prices_only(vec![price_req("AAPL", date(2024, 1, 10))]);
        let cache = PriceCacheLoader::new(&store)
            .with_live_quotes(&store)
            .load(&reqs)
            .unwrap();
        assert!((cache.get("AAPL", date(2024, 1, 10)).unwrap() - 107.0).abs() < f64::EPSILON);
    }

    #[test]
    fn fundamentals_are_prefetched() {
        let record = Fundamentals {
            eps: Some(3.0),
            ..Default::default()
        };
        let store = january_store().with_fundamentals("AAPL", date(2023, 12, 31), record);
        let reqs = Requirements {
            fundamentals: vec![
                price_req("AAPL", date(2024, 1, 10)),
                price_req("MSFT", date(2024, 1, 10)),
            ],
            ..Default::default()
        };
        let cache = PriceCacheLoader::new(&store)
            .with_fundamentals(&store)
            .load(&reqs)
            .unwrap();
        assert_eq!(
            cache.get_fundamentals("AAPL", date(2024, 1, 10)).unwrap(),
            Some(record)
        );
        assert_eq!(cache.get_fundamentals("MSFT", date(2024, 1, 10)).unwrap(), None);
        assert!(cache.get_fundamentals("AAPL", date(2024, 1, 11)).is_err());
    }

    #[test]
    fn windows_near_calendar_edges_clamp() {
        let store = InMemoryStore::new()
            .with_price("AAPL", NaiveDate::MIN, 5.0)
            .with_price("AAPL", date(2024, 1, 2), 10.0);
        let edge = NaiveDate::MIN.succ_opt().unwrap();
        let reqs = Requirements {
            prices: vec![price_req("AAPL", edge), price_req("AAPL", date(2024, 1, 2))],
            stdevs: vec![stdev_req("AAPL", edge, NaiveDate::MAX)],
            ..Default::default()
        };
        let cache = PriceCacheLoader::new(&store).load(&reqs).unwrap();
        assert!((cache.get("AAPL", edge).unwrap() - 5.0).abs() < f64::EPSILON);
        assert!(cache.get_stdev("AAPL", edge, NaiveDate::MAX).is_err());
        assert_eq!(days_before(edge, GAP_FILL_DAYS), NaiveDate::MIN);
        assert_eq!(days_after(NaiveDate::MAX, 1), NaiveDate::MAX);
    }

    #[test]
    fn sample_stdev_needs_two_values() {
        assert_eq!(sample_stdev(&[]), None);
        assert_eq!(sample_stdev(&[1.0]), None);
        approx::assert_relative_eq!(sample_stdev(&[1.0, 3.0]).unwrap(), 2f64.sqrt());
    }
}
