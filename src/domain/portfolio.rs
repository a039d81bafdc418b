//! Portfolio holdings and valuation.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::domain::error::TargetError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: f64,
}

/// Holdings plus a cash balance. `Clone` is a deep copy; samples never share
/// positions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Portfolio {
    pub positions: BTreeMap<String, Position>,
    pub cash: f64,
}

impl Portfolio {
    pub fn new(cash: f64) -> Self {
        Portfolio {
            positions: BTreeMap::new(),
            cash,
        }
    }

    /// Set the held quantity of `symbol`. Zero removes the position.
    pub fn set_quantity(&mut self, symbol: &str, quantity: f64) {
        if quantity == 0.0 {
            self.positions.remove(symbol);
            return;
        }
        self.positions.insert(
            symbol.to_string(),
            Position {
                symbol: symbol.to_string(),
                quantity,
            },
        );
    }

    pub fn with_position(mut self, symbol: &str, quantity: f64) -> Self {
        self.set_quantity(symbol, quantity);
        self
    }

    pub fn get_position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// Held quantity, zero when the symbol is not held.
    pub fn quantity(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).map_or(0.0, |p| p.quantity)
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn remove_position(&mut self, symbol: &str) -> Option<Position> {
        self.positions.remove(symbol)
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn held_symbols(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    /// Cash plus every position marked at `prices`. Every held symbol must
    /// have a price.
    pub fn total_value(&self, prices: &HashMap<String, f64>) -> Result<f64, TargetError> {
        let mut value = self.cash;
        for position in self.positions.values() {
            let price = prices
                .get(&position.symbol)
                .ok_or_else(|| TargetError::MissingPrice {
                    symbol: position.symbol.clone(),
                })?;
            value += position.quantity * price;
        }
        Ok(value)
    }
}
