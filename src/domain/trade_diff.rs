//! Trades that move one portfolio to another, and suppression of trades too
//! small to place.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::domain::error::TargetError;
use crate::domain::portfolio::Portfolio;

/// One leg of a rebalance. Negative quantity sells.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedTrade {
    pub symbol: String,
    pub quantity: f64,
    pub expected_price: f64,
}

impl ProposedTrade {
    pub fn new(symbol: &str, quantity: f64, expected_price: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            quantity,
            expected_price,
        }
    }

    pub fn is_sell(&self) -> bool {
        self.quantity < 0.0
    }

    /// Absolute dollar amount of the trade.
    pub fn expected_amount(&self) -> f64 {
        (self.quantity * self.expected_price).abs()
    }
}

/// Signed differences between `target` and `current`, one trade per symbol
/// whose quantity changes, ordered by symbol. Symbols held but absent from
/// the target are closed in full.
pub fn diff(
    current: &Portfolio,
    target: &Portfolio,
    prices: &HashMap<String, f64>,
) -> Result<Vec<ProposedTrade>, TargetError> {
    let symbols: BTreeSet<&String> = current
        .positions
        .keys()
        .chain(target.positions.keys())
        .collect();

    let mut trades = Vec::new();
    for symbol in symbols {
        let delta = target.quantity(symbol) - current.quantity(symbol);
        if delta == 0.0 {
            continue;
        }
        let price = prices
            .get(symbol.as_str())
            .copied()
            .ok_or_else(|| TargetError::MissingPrice {
                symbol: symbol.clone(),
            })?;
        trades.push(ProposedTrade::new(symbol, delta, price));
    }
    Ok(trades)
}

/// Quantities held back from suppressed trades, per symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExcessLedger {
    excess: BTreeMap<String, f64>,
}

impl ExcessLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str) -> f64 {
        self.excess.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.excess.is_empty()
    }

    pub fn len(&self) -> usize {
        self.excess.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.excess.iter().map(|(s, q)| (s.as_str(), *q))
    }

    /// Add `quantity` to the carried excess of `symbol`.
    pub fn carry(&mut self, symbol: &str, quantity: f64) {
        let total = self.get(symbol) + quantity;
        if total == 0.0 {
            self.excess.remove(symbol);
        } else {
            self.excess.insert(symbol.to_string(), total);
        }
    }

    fn take(&mut self, symbol: &str) -> f64 {
        self.excess.remove(symbol).unwrap_or(0.0)
    }
}

/// Drop trades whose absolute quantity does not exceed `threshold`.
///
/// Each trade is first netted with the excess carried for its symbol. The
/// dollar amount of every sell still at or below the threshold is then taken
/// out of the buys, smallest buy first. Trades left above the threshold are
/// kept, ordered by symbol; whatever quantity remains on a dropped trade goes
/// back into the ledger.
pub fn filter_low_volume_trades(
    trades: Vec<ProposedTrade>,
    threshold: f64,
    ledger: &mut ExcessLedger,
) -> Vec<ProposedTrade> {
    let (mut buys, mut sells): (Vec<ProposedTrade>, Vec<ProposedTrade>) = trades
        .into_iter()
        .map(|mut trade| {
            trade.quantity += ledger.take(&trade.symbol);
            trade
        })
        .partition(|trade| trade.quantity > 0.0);

    sort_by_amount(&mut buys);
    for sell in sells.iter_mut().filter(|t| t.quantity.abs() <= threshold) {
        let remaining = absorb_into_buys(sell.expected_amount(), &mut buys);
        sell.quantity = if sell.expected_price > 0.0 {
            -remaining / sell.expected_price
        } else {
            0.0
        };
        sort_by_amount(&mut buys);
    }

    let mut kept: Vec<ProposedTrade> = Vec::with_capacity(buys.len() + sells.len());
    for trade in buys.into_iter().chain(sells) {
        if trade.quantity.abs() > threshold {
            kept.push(trade);
        } else {
            tracing::debug!(symbol = %trade.symbol, quantity = trade.quantity, "trade below threshold, carried");
            ledger.carry(&trade.symbol, trade.quantity);
        }
    }
    kept.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    kept
}

/// Smallest dollar amount first, ties by symbol.
fn sort_by_amount(trades: &mut [ProposedTrade]) {
    trades.sort_by(|a, b| {
        a.expected_amount()
            .partial_cmp(&b.expected_amount())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
}

/// Reduce `buys` in order by up to `amount` dollars. Returns the part of
/// `amount` the buys could not cover.
fn absorb_into_buys(amount: f64, buys: &mut [ProposedTrade]) -> f64 {
    let mut remaining = amount;
    for buy in buys.iter_mut().filter(|b| b.expected_price > 0.0) {
        if remaining <= 0.0 {
            break;
        }
        let left = buy.expected_amount() - remaining;
        if left < 0.0 {
            remaining = -left;
            buy.quantity = 0.0;
        } else {
            remaining = 0.0;
            buy.quantity = left / buy.expected_price;
        }
    }
    remaining
}
