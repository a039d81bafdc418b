//! Target portfolio for one day from that day's scores.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;

use crate::domain::error::TargetError;
use crate::domain::portfolio::Portfolio;
use crate::domain::weighting::WeightingPolicy;

pub const MIN_TICKERS: usize = 3;

/// Portfolios at or below this value are not rebalanced.
pub const MIN_PORTFOLIO_VALUE: f64 = 0.001;

#[derive(Debug, Clone, PartialEq)]
pub struct TargetPortfolio {
    pub date: NaiveDate,
    /// Holdings only; a target never carries cash.
    pub portfolio: Portfolio,
    pub weights: BTreeMap<String, f64>,
    /// Scores of the selected symbols.
    pub scores: BTreeMap<String, f64>,
}

/// Round to three decimal places.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Select and weight the top `num_tickers` scored symbols and convert the
/// weights into quantities worth `portfolio_value` at `prices`.
pub fn compute_target_portfolio(
    date: NaiveDate,
    scores: &BTreeMap<String, f64>,
    prices: &HashMap<String, f64>,
    num_tickers: usize,
    portfolio_value: f64,
    policy: &WeightingPolicy,
) -> Result<TargetPortfolio, TargetError> {
    if portfolio_value.is_nan() || portfolio_value <= MIN_PORTFOLIO_VALUE {
        return Err(TargetError::ValueTooSmall(portfolio_value));
    }
    if num_tickers < MIN_TICKERS {
        return Err(TargetError::TooFewTickers {
            minimum: MIN_TICKERS,
            found: num_tickers,
        });
    }

    let weights = policy.weights(scores, num_tickers)?;

    let mut portfolio = Portfolio::new(0.0);
    for (symbol, weight) in &weights {
        let price = prices
            .get(symbol)
            .copied()
            .filter(|p| *p > 0.0)
            .ok_or_else(|| TargetError::MissingPrice {
                symbol: symbol.clone(),
            })?;
        let dollars = round3(portfolio_value * weight);
        portfolio.set_quantity(symbol, dollars / price);
    }

    let selected_scores = weights
        .keys()
        .filter_map(|symbol| scores.get(symbol).map(|s| (symbol.clone(), *s)))
        .collect();

    Ok(TargetPortfolio {
        date,
        portfolio,
        weights,
        scores: selected_scores,
    })
}
