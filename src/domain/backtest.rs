//! Backtest driver.
//!
//! Scores for every rebalance day are computed up front, then the simulation
//! walks the days in order, each day starting from the previous day's
//! resulting portfolio.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{Duration, NaiveDate};

use crate::domain::error::{FactorError, TargetError};
use crate::domain::expr::FactorExpression;
use crate::domain::portfolio::Portfolio;
use crate::domain::price_cache::PriceCacheLoader;
use crate::domain::scoring::{CancelToken, DEFAULT_WORKERS, ScoreOrchestrator};
use crate::domain::snapshot::{Snapshot, build_snapshots};
use crate::domain::target::compute_target_portfolio;
use crate::domain::trade_diff::{ExcessLedger, ProposedTrade, diff, filter_low_volume_trades};
use crate::domain::weighting::WeightingPolicy;
use crate::ports::fundamentals_port::FundamentalsStore;
use crate::ports::price_port::PriceStore;

pub const DEFAULT_REBALANCE_INTERVAL_DAYS: i64 = 7;
pub const DEFAULT_STARTING_CASH: f64 = 10_000.0;
pub const DEFAULT_NUM_TICKERS: usize = 3;
pub const DEFAULT_MIN_TRADE_QUANTITY: f64 = 0.0001;

/// Fraction of skipped days at which the whole backtest fails.
pub const ERROR_BUDGET: f64 = 0.1;

/// Number of skipped-day errors quoted when the budget is exceeded.
pub const REPORTED_ERRORS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub rebalance_interval_days: i64,
    pub starting_cash: f64,
    pub num_tickers: usize,
    pub min_trade_quantity: f64,
    pub weighting: WeightingPolicy,
    pub workers: usize,
}

impl BacktestConfig {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date,
            end_date,
            rebalance_interval_days: DEFAULT_REBALANCE_INTERVAL_DAYS,
            starting_cash: DEFAULT_STARTING_CASH,
            num_tickers: DEFAULT_NUM_TICKERS,
            min_trade_quantity: DEFAULT_MIN_TRADE_QUANTITY,
            weighting: WeightingPolicy::default(),
            workers: DEFAULT_WORKERS,
        }
    }
}

/// One rebalance.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestSample {
    pub date: NaiveDate,
    /// Portfolio after rebalancing.
    pub portfolio: Portfolio,
    /// Value of the incoming portfolio at this day's prices.
    pub total_value: f64,
    pub weights: BTreeMap<String, f64>,
    pub scores: BTreeMap<String, f64>,
    pub trades: Vec<ProposedTrade>,
    /// Universe prices on this day.
    pub prices: HashMap<String, f64>,
}

/// A rebalance day that could not produce a target portfolio.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedDay {
    pub date: NaiveDate,
    pub error: TargetError,
}

impl fmt::Display for SkippedDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.date, self.error)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestReport {
    pub rebalance_days: Vec<NaiveDate>,
    pub samples: Vec<BacktestSample>,
    pub snapshots: BTreeMap<NaiveDate, Snapshot>,
    pub skipped: Vec<SkippedDay>,
    /// Non-fatal per-symbol scoring errors across all days.
    pub score_errors: usize,
    /// Trade quantities still held back by the low-volume filter.
    pub excess: ExcessLedger,
}

impl BacktestReport {
    pub fn final_value(&self) -> Option<f64> {
        self.samples.last().map(|s| s.total_value)
    }
}

/// Rebalance days within `[first trading day, end]`.
///
/// Starting at the first trading day, a trading day is kept and the cursor
/// jumps by the interval; a non-trading day advances the cursor by one day.
pub fn select_rebalance_days(
    trading_days: &[NaiveDate],
    end: NaiveDate,
    interval_days: i64,
) -> Vec<NaiveDate> {
    let Some(first) = trading_days.first().copied() else {
        return Vec::new();
    };
    let interval = Duration::try_days(interval_days.max(1)).unwrap_or(Duration::MAX);
    let one_day = Duration::days(1);

    let mut selected = Vec::new();
    let mut current = first;
    while current <= end {
        let step = if trading_days.binary_search(&current).is_ok() {
            selected.push(current);
            interval
        } else {
            one_day
        };
        match current.checked_add_signed(step) {
            Some(next) => current = next,
            None => break,
        }
    }
    selected
}

pub struct Backtester<'a> {
    prices: &'a dyn PriceStore,
    fundamentals: Option<&'a dyn FundamentalsStore>,
    cancel: CancelToken,
}

impl<'a> Backtester<'a> {
    pub fn new(prices: &'a dyn PriceStore) -> Self {
        Self {
            prices,
            fundamentals: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_fundamentals(mut self, store: &'a dyn FundamentalsStore) -> Self {
        self.fundamentals = Some(store);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run(
        &self,
        expression: &FactorExpression,
        universe: &[String],
        config: &BacktestConfig,
    ) -> Result<BacktestReport, FactorError> {
        if universe.is_empty() {
            return Err(FactorError::NoInputs);
        }

        let trading_days = self
            .prices
            .list_trading_days(config.start_date, config.end_date)?;
        let rebalance_days =
            select_rebalance_days(&trading_days, config.end_date, config.rebalance_interval_days);
        if rebalance_days.is_empty() {
            return Err(FactorError::NoTradingDays {
                start: config.start_date,
                end: config.end_date,
            });
        }
        tracing::info!(
            symbols = universe.len(),
            days = rebalance_days.len(),
            "starting backtest"
        );

        let mut loader = PriceCacheLoader::new(self.prices);
        if let Some(fundamentals) = self.fundamentals {
            loader = loader.with_fundamentals(fundamentals);
        }
        let scores_by_day = ScoreOrchestrator::new(loader)
            .with_workers(config.workers)
            .with_cancel_token(self.cancel.clone())
            .calculate_factor_scores(&rebalance_days, universe, expression)?;

        let mut current = Portfolio::new(config.starting_cash);
        let mut ledger = ExcessLedger::new();
        let mut samples = Vec::with_capacity(rebalance_days.len());
        let mut skipped = Vec::new();
        let mut score_errors = 0;

        for &date in &rebalance_days {
            let prices = self.prices.get_many_on_day(universe, date)?;
            let total_value = current.total_value(&prices).map_err(|e| match e {
                TargetError::MissingPrice { symbol } => {
                    FactorError::MissingHoldingPrice { symbol, date }
                }
                other => FactorError::Target(other),
            })?;

            let day_scores = scores_by_day.get(&date).ok_or_else(|| FactorError::Internal {
                reason: format!("no factor scores computed for {date}"),
            })?;
            score_errors += day_scores.errors.len();

            let target = match compute_target_portfolio(
                date,
                &day_scores.scores,
                &prices,
                config.num_tickers,
                total_value,
                &config.weighting,
            ) {
                Ok(target) => target,
                Err(error) => {
                    tracing::warn!(%date, %error, "skipping rebalance");
                    skipped.push(SkippedDay { date, error });
                    continue;
                }
            };

            let trades = diff(&current, &target.portfolio, &prices)?;
            let trades = filter_low_volume_trades(trades, config.min_trade_quantity, &mut ledger);
            tracing::debug!(%date, value = total_value, trades = trades.len(), "rebalanced");

            current = target.portfolio.clone();
            samples.push(BacktestSample {
                date,
                portfolio: target.portfolio,
                total_value,
                weights: target.weights,
                scores: target.scores,
                trades,
                prices,
            });
        }

        check_error_budget(&skipped, rebalance_days.len())?;

        let snapshots = build_snapshots(&samples);
        tracing::info!(
            samples = samples.len(),
            skipped = skipped.len(),
            score_errors,
            "backtest complete"
        );
        Ok(BacktestReport {
            rebalance_days,
            samples,
            snapshots,
            skipped,
            score_errors,
            excess: ledger,
        })
    }
}

fn check_error_budget(skipped: &[SkippedDay], days: usize) -> Result<(), FactorError> {
    if days == 0 || skipped.is_empty() {
        return Ok(());
    }
    let ratio = skipped.len() as f64 / days as f64;
    if ratio < ERROR_BUDGET {
        return Ok(());
    }
    tracing::error!(skipped = skipped.len(), days, "backtest error budget exceeded");
    Err(FactorError::TooManyFailures {
        percent: ratio * 100.0,
        first: skipped
            .iter()
            .take(REPORTED_ERRORS)
            .map(ToString::to_string)
            .collect(),
    })
}
