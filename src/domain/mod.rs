//! Core domain types and logic.

pub mod expr;
pub mod expr_parser;
pub mod expr_eval;
pub mod dependency;
pub mod market;
pub mod price_cache;
pub mod scoring;
pub mod weighting;
pub mod portfolio;
pub mod target;
pub mod trade_diff;
pub mod backtest;
pub mod snapshot;
pub mod rebalance;
pub mod metrics;
pub mod universe;
pub mod config_validation;
pub mod error;
