//! Holdings and trades for the most recent trading day.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::Serialize;

use crate::domain::error::{FactorError, TargetError};
use crate::domain::expr::FactorExpression;
use crate::domain::portfolio::Portfolio;
use crate::domain::price_cache::PriceCacheLoader;
use crate::domain::scoring::{CancelToken, DEFAULT_WORKERS, ScoreOrchestrator, ScoreResult};
use crate::domain::snapshot::AssetMetrics;
use crate::domain::target::{TargetPortfolio, compute_target_portfolio};
use crate::domain::trade_diff::{ExcessLedger, ProposedTrade, diff, filter_low_volume_trades};
use crate::domain::weighting::WeightingPolicy;
use crate::ports::fundamentals_port::FundamentalsStore;
use crate::ports::price_port::PriceStore;
use crate::ports::quote_port::LiveQuoteSource;

/// Notional value used to express the latest holdings.
pub const LATEST_HOLDINGS_VALUE: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestHoldings {
    pub date: NaiveDate,
    pub assets: BTreeMap<String, AssetMetrics>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RebalancePlan {
    pub date: NaiveDate,
    pub portfolio_value: f64,
    pub target: TargetPortfolio,
    /// Trades left after the low-volume filter.
    pub trades: Vec<ProposedTrade>,
}

pub struct Rebalancer<'a> {
    prices: &'a dyn PriceStore,
    fundamentals: Option<&'a dyn FundamentalsStore>,
    quotes: Option<&'a dyn LiveQuoteSource>,
    num_tickers: usize,
    weighting: WeightingPolicy,
    workers: usize,
}

impl<'a> Rebalancer<'a> {
    pub fn new(prices: &'a dyn PriceStore, num_tickers: usize) -> Self {
        Self {
            prices,
            fundamentals: None,
            quotes: None,
            num_tickers,
            weighting: WeightingPolicy::default(),
            workers: DEFAULT_WORKERS,
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

    pub fn with_weighting(mut self, weighting: WeightingPolicy) -> Self {
        self.weighting = weighting;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Target weights and scores on the latest stored trading day, sized
    /// for a notional portfolio.
    pub fn latest_holdings(
        &self,
        expression: &FactorExpression,
        universe: &[String],
    ) -> Result<LatestHoldings, FactorError> {
        let date = self.latest_trading_day()?;
        let prices = self.prices.get_many_on_day(universe, date)?;
        let scores = self.score_day(expression, universe, date, false)?;
        let target = compute_target_portfolio(
            date,
            &scores.scores,
            &prices,
            self.num_tickers,
            LATEST_HOLDINGS_VALUE,
            &self.weighting,
        )?;

        let assets = target
            .weights
            .iter()
            .map(|(symbol, weight)| {
                let metrics = AssetMetrics {
                    asset_weight: *weight,
                    factor_score: target.scores.get(symbol).copied().unwrap_or_default(),
                    price_change_til_next_resampling: None,
                };
                (symbol.clone(), metrics)
            })
            .collect();
        Ok(LatestHoldings { date, assets })
    }

    /// Trades that move `current` to today's target. Live quotes dated after
    /// the last stored trading day, when attached, price the trades and move
    /// the date forward.
    pub fn plan_rebalance(
        &self,
        expression: &FactorExpression,
        universe: &[String],
        current: &Portfolio,
        min_trade_quantity: f64,
        ledger: &mut ExcessLedger,
    ) -> Result<RebalancePlan, FactorError> {
        let stored_day = self.latest_trading_day()?;
        let mut prices = self.prices.get_many_on_day(universe, stored_day)?;
        let mut date = stored_day;
        if let Some(source) = self.quotes {
            for (symbol, quote) in source.latest_quotes(universe)? {
                if quote.date() > stored_day {
                    date = date.max(quote.date());
                    prices.insert(symbol, quote.price);
                }
            }
        }

        let scores = self.score_day(expression, universe, date, true)?;
        let portfolio_value = holding_value(current, &prices, date)?;
        let target = compute_target_portfolio(
            date,
            &scores.scores,
            &prices,
            self.num_tickers,
            portfolio_value,
            &self.weighting,
        )?;

        let trades = diff(current, &target.portfolio, &prices)?;
        let proposed = trades.len();
        let trades = filter_low_volume_trades(trades, min_trade_quantity, ledger);
        if trades.len() != proposed {
            tracing::warn!(dropped = proposed - trades.len(), "dropped low volume trades");
        }
        tracing::info!(%date, value = portfolio_value, trades = trades.len(), "rebalance planned");

        Ok(RebalancePlan {
            date,
            portfolio_value,
            target,
            trades,
        })
    }

    fn latest_trading_day(&self) -> Result<NaiveDate, FactorError> {
        self.prices.latest_trading_day()?.ok_or(FactorError::NoPriceData)
    }

    fn score_day(
        &self,
        expression: &FactorExpression,
        universe: &[String],
        date: NaiveDate,
        live: bool,
    ) -> Result<ScoreResult, FactorError> {
        let mut loader = PriceCacheLoader::new(self.prices);
        if let Some(store) = self.fundamentals {
            loader = loader.with_fundamentals(store);
        }
        if let (true, Some(source)) = (live, self.quotes) {
            loader = loader.with_live_quotes(source);
        }
        let mut by_day = ScoreOrchestrator::new(loader)
            .with_workers(self.workers)
            .with_cancel_token(CancelToken::new())
            .calculate_factor_scores(&[date], universe, expression)?;
        Ok(by_day.remove(&date).unwrap_or_default())
    }
}

fn holding_value(
    portfolio: &Portfolio,
    prices: &HashMap<String, f64>,
    date: NaiveDate,
) -> Result<f64, FactorError> {
    portfolio.total_value(prices).map_err(|e| match e {
        TargetError::MissingPrice { symbol } => FactorError::MissingHoldingPrice { symbol, date },
        other => FactorError::Target(other),
    })
}
