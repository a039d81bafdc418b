//! Configuration validation.
//!
//! Checks every key a run reads before any data is loaded.

use chrono::NaiveDate;

use crate::domain::backtest::{
    DEFAULT_MIN_TRADE_QUANTITY, DEFAULT_NUM_TICKERS, DEFAULT_REBALANCE_INTERVAL_DAYS,
    DEFAULT_STARTING_CASH,
};
use crate::domain::error::FactorError;
use crate::domain::expr::FactorExpression;
use crate::domain::scoring::DEFAULT_WORKERS;
use crate::domain::target::MIN_TICKERS;
use crate::domain::universe::parse_symbols;
use crate::domain::weighting::DEFAULT_FACTOR_INTENSITY;
use crate::ports::config_port::ConfigPort;

pub const DATA_SOURCES: [&str; 3] = ["csv", "sqlite", "memory"];
pub const WEIGHTINGS: [&str; 2] = ["zscore", "equal"];

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), FactorError> {
    validate_dates(config)?;
    validate_starting_cash(config)?;
    validate_num_tickers(config)?;
    validate_rebalance_interval(config)?;
    validate_min_trade_quantity(config)?;
    validate_workers(config)?;
    Ok(())
}

pub fn validate_strategy_config(config: &dyn ConfigPort) -> Result<(), FactorError> {
    validate_expression(config)?;
    validate_universe(config)?;
    validate_weighting(config)?;
    Ok(())
}

pub fn validate_data_config(config: &dyn ConfigPort) -> Result<(), FactorError> {
    let source = config
        .get_string("data", "source")
        .unwrap_or_else(|| "csv".to_string());
    match source.trim() {
        "csv" => require(config, "data", "csv_dir").map(|_| ()),
        "sqlite" => require(config, "sqlite", "path").map(|_| ()),
        "memory" => Ok(()),
        other => Err(invalid(
            "data",
            "source",
            format!("unknown source '{other}', expected one of {}", DATA_SOURCES.join(", ")),
        )),
    }
}

fn invalid(section: &str, key: &str, reason: String) -> FactorError {
    FactorError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason,
    }
}

fn require(config: &dyn ConfigPort, section: &str, key: &str) -> Result<String, FactorError> {
    match config.get_string(section, key) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(FactorError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }),
    }
}

/// Parse a required `YYYY-MM-DD` value.
pub fn parse_config_date(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<NaiveDate, FactorError> {
    let value = require(config, section, key)?;
    NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|_| {
        invalid(
            section,
            key,
            format!("invalid {key} format, expected YYYY-MM-DD"),
        )
    })
}

fn validate_dates(config: &dyn ConfigPort) -> Result<(), FactorError> {
    let start_date = parse_config_date(config, "backtest", "start_date")?;
    let end_date = parse_config_date(config, "backtest", "end_date")?;
    if start_date > end_date {
        return Err(invalid(
            "backtest",
            "start_date",
            "start_date must not be after end_date".to_string(),
        ));
    }
    Ok(())
}

fn validate_starting_cash(config: &dyn ConfigPort) -> Result<(), FactorError> {
    let value = config.get_double("backtest", "starting_cash", DEFAULT_STARTING_CASH);
    if !value.is_finite() || value <= 0.0 {
        return Err(invalid(
            "backtest",
            "starting_cash",
            "starting_cash must be positive".to_string(),
        ));
    }
    Ok(())
}

fn validate_num_tickers(config: &dyn ConfigPort) -> Result<(), FactorError> {
    let value = config.get_int("backtest", "num_tickers", DEFAULT_NUM_TICKERS as i64);
    if value < MIN_TICKERS as i64 {
        return Err(invalid(
            "backtest",
            "num_tickers",
            format!("num_tickers must be at least {MIN_TICKERS}"),
        ));
    }
    Ok(())
}

fn validate_rebalance_interval(config: &dyn ConfigPort) -> Result<(), FactorError> {
    let value = config.get_int(
        "backtest",
        "rebalance_interval_days",
        DEFAULT_REBALANCE_INTERVAL_DAYS,
    );
    if value < 1 {
        return Err(invalid(
            "backtest",
            "rebalance_interval_days",
            "rebalance_interval_days must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_min_trade_quantity(config: &dyn ConfigPort) -> Result<(), FactorError> {
    let value = config.get_double("backtest", "min_trade_quantity", DEFAULT_MIN_TRADE_QUANTITY);
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(
            "backtest",
            "min_trade_quantity",
            "min_trade_quantity must be non-negative".to_string(),
        ));
    }
    Ok(())
}

fn validate_workers(config: &dyn ConfigPort) -> Result<(), FactorError> {
    let value = config.get_int("backtest", "workers", DEFAULT_WORKERS as i64);
    if value < 1 {
        return Err(invalid(
            "backtest",
            "workers",
            "workers must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_expression(config: &dyn ConfigPort) -> Result<(), FactorError> {
    let source = require(config, "strategy", "expression")?;
    FactorExpression::parse(&source)?;
    Ok(())
}

fn validate_universe(config: &dyn ConfigPort) -> Result<(), FactorError> {
    let list = require(config, "strategy", "universe")?;
    parse_symbols(&list).map_err(|e| invalid("strategy", "universe", e.to_string()))?;
    Ok(())
}

fn validate_weighting(config: &dyn ConfigPort) -> Result<(), FactorError> {
    if let Some(weighting) = config.get_string("strategy", "weighting") {
        if !WEIGHTINGS.contains(&weighting.trim()) {
            return Err(invalid(
                "strategy",
                "weighting",
                format!("expected one of {}", WEIGHTINGS.join(", ")),
            ));
        }
    }
    let intensity = config.get_double("strategy", "factor_intensity", DEFAULT_FACTOR_INTENSITY);
    if !(intensity > 0.0 && intensity <= 1.0) {
        return Err(invalid(
            "strategy",
            "factor_intensity",
            "factor_intensity must be in (0, 1]".to_string(),
        ));
    }
    Ok(())
}
