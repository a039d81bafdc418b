//! CLI definition and dispatch.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::CsvStore;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::memory_adapter::InMemoryStore;
use crate::domain::backtest::{
    BacktestConfig, BacktestReport, Backtester, DEFAULT_MIN_TRADE_QUANTITY, DEFAULT_NUM_TICKERS,
    DEFAULT_REBALANCE_INTERVAL_DAYS, DEFAULT_STARTING_CASH,
};
use crate::domain::config_validation::{
    parse_config_date, validate_backtest_config, validate_data_config, validate_strategy_config,
};
use crate::domain::dependency::dry_run;
use crate::domain::error::FactorError;
use crate::domain::expr::FactorExpression;
use crate::domain::metrics::Metrics;
use crate::domain::price_cache::PriceCacheLoader;
use crate::domain::rebalance::{LatestHoldings, Rebalancer};
use crate::domain::scoring::{DEFAULT_WORKERS, ScoreOrchestrator, ScoreResult};
use crate::domain::universe::{check_coverage, parse_symbols};
use crate::domain::weighting::{DEFAULT_FACTOR_INTENSITY, WeightingPolicy};
use crate::ports::config_port::ConfigPort;
use crate::ports::fundamentals_port::FundamentalsStore;
use crate::ports::price_port::PriceStore;

#[derive(Parser, Debug)]
#[command(name = "factorbt", about = "Factor formula backtester")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Write snapshots as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print factor scores for one trading day
    Scores {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        date: NaiveDate,
    },
    /// Print the latest target holdings as JSON
    Holdings {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Parse a formula and list the data it reads
    Validate {
        #[arg(short, long)]
        expression: String,
        #[arg(long, default_value = "SAMPLE")]
        symbol: String,
        #[arg(long, default_value = "2024-01-02")]
        date: NaiveDate,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest { config, output } => run_backtest(&config, output.as_deref()),
        Command::Scores { config, date } => run_scores(&config, date),
        Command::Holdings { config } => run_holdings(&config),
        Command::Validate {
            expression,
            symbol,
            date,
        } => run_validate(&expression, &symbol, date),
    }
}

/// The configured price and fundamentals source.
pub enum DataSource {
    Csv(CsvStore),
    #[cfg(feature = "sqlite")]
    Sqlite(crate::adapters::sqlite_adapter::SqliteStore),
    Memory(InMemoryStore),
}

impl DataSource {
    pub fn prices(&self) -> &dyn PriceStore {
        match self {
            DataSource::Csv(store) => store,
            #[cfg(feature = "sqlite")]
            DataSource::Sqlite(store) => store,
            DataSource::Memory(store) => store,
        }
    }

    pub fn fundamentals(&self) -> &dyn FundamentalsStore {
        match self {
            DataSource::Csv(store) => store,
            #[cfg(feature = "sqlite")]
            DataSource::Sqlite(store) => store,
            DataSource::Memory(store) => store,
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|err| {
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

pub fn open_store(config: &dyn ConfigPort) -> Result<DataSource, FactorError> {
    validate_data_config(config)?;
    let min_symbols = config.get_int("data", "min_symbols_per_day", 1).max(1) as usize;
    let source = config
        .get_string("data", "source")
        .unwrap_or_else(|| "csv".to_string());

    match source.trim() {
        "csv" => {
            let dir = config.get_string("data", "csv_dir").unwrap_or_default();
            Ok(DataSource::Csv(CsvStore::open(
                PathBuf::from(dir.trim()),
                min_symbols,
            )?))
        }
        "sqlite" => open_sqlite(config),
        _ => Ok(DataSource::Memory(
            InMemoryStore::new().with_min_symbols_per_day(min_symbols),
        )),
    }
}

#[cfg(feature = "sqlite")]
fn open_sqlite(config: &dyn ConfigPort) -> Result<DataSource, FactorError> {
    use crate::adapters::sqlite_adapter::SqliteStore;

    let store = SqliteStore::from_config(config)?;
    store.initialize_schema()?;
    Ok(DataSource::Sqlite(store))
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(_config: &dyn ConfigPort) -> Result<DataSource, FactorError> {
    Err(FactorError::ConfigInvalid {
        section: "data".into(),
        key: "source".into(),
        reason: "sqlite feature is required for source = sqlite".into(),
    })
}

pub fn build_backtest_config(adapter: &dyn ConfigPort) -> Result<BacktestConfig, FactorError> {
    let start_date = parse_config_date(adapter, "backtest", "start_date")?;
    let end_date = parse_config_date(adapter, "backtest", "end_date")?;

    Ok(BacktestConfig {
        start_date,
        end_date,
        rebalance_interval_days: adapter.get_int(
            "backtest",
            "rebalance_interval_days",
            DEFAULT_REBALANCE_INTERVAL_DAYS,
        ),
        starting_cash: adapter.get_double("backtest", "starting_cash", DEFAULT_STARTING_CASH),
        num_tickers: adapter.get_int("backtest", "num_tickers", DEFAULT_NUM_TICKERS as i64)
            as usize,
        min_trade_quantity: adapter.get_double(
            "backtest",
            "min_trade_quantity",
            DEFAULT_MIN_TRADE_QUANTITY,
        ),
        weighting: build_weighting(adapter)?,
        workers: adapter.get_int("backtest", "workers", DEFAULT_WORKERS as i64) as usize,
    })
}

pub fn build_weighting(adapter: &dyn ConfigPort) -> Result<WeightingPolicy, FactorError> {
    let name = adapter
        .get_string("strategy", "weighting")
        .unwrap_or_else(|| "zscore".to_string());
    match name.trim() {
        "zscore" => Ok(WeightingPolicy::ZScoreTilt {
            intensity: adapter.get_double("strategy", "factor_intensity", DEFAULT_FACTOR_INTENSITY),
        }),
        "equal" => Ok(WeightingPolicy::EqualWeight),
        other => Err(FactorError::ConfigInvalid {
            section: "strategy".into(),
            key: "weighting".into(),
            reason: format!("unknown weighting '{other}'"),
        }),
    }
}

/// Formula and universe from `[strategy]`.
pub fn build_strategy(
    adapter: &dyn ConfigPort,
) -> Result<(FactorExpression, Vec<String>), FactorError> {
    validate_strategy_config(adapter)?;
    let source = adapter
        .get_string("strategy", "expression")
        .unwrap_or_default();
    let expression = FactorExpression::parse(source.trim())?;
    let list = adapter
        .get_string("strategy", "universe")
        .unwrap_or_default();
    let universe = parse_symbols(&list).map_err(|e| FactorError::ConfigInvalid {
        section: "strategy".into(),
        key: "universe".into(),
        reason: e.to_string(),
    })?;
    Ok((expression, universe))
}

fn report_error(e: &FactorError) -> ExitCode {
    eprintln!("error: {e}");
    e.into()
}

fn run_backtest(config_path: &Path, output_path: Option<&Path>) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    match execute_backtest(&adapter) {
        Ok(report) => {
            print_summary(&report);
            match output_path {
                Some(path) => match write_snapshots(&report, path) {
                    Ok(()) => {
                        eprintln!("\nSnapshots written to: {}", path.display());
                        ExitCode::SUCCESS
                    }
                    Err(e) => report_error(&e),
                },
                None => ExitCode::SUCCESS,
            }
        }
        Err(e) => report_error(&e),
    }
}

/// Validate, open the store and run the backtest described by `adapter`.
pub fn execute_backtest(adapter: &dyn ConfigPort) -> Result<BacktestReport, FactorError> {
    validate_backtest_config(adapter)?;
    let (expression, universe) = build_strategy(adapter)?;
    let bt_config = build_backtest_config(adapter)?;
    let store = open_store(adapter)?;

    let coverage = check_coverage(
        store.prices(),
        &universe,
        bt_config.start_date,
        bt_config.end_date,
    )?;
    eprintln!(
        "Running backtest: {} symbols, {} to {}",
        coverage.symbols.len(),
        bt_config.start_date,
        bt_config.end_date,
    );
    eprintln!("  Formula: {expression}");

    Backtester::new(store.prices())
        .with_fundamentals(store.fundamentals())
        .run(&expression, &coverage.symbols, &bt_config)
}

fn print_summary(report: &BacktestReport) {
    let metrics = Metrics::from_samples(&report.samples);

    eprintln!("\n=== Backtest Results ===");
    eprintln!("Rebalance Days:   {}", report.rebalance_days.len());
    eprintln!("Rebalanced:       {}", report.samples.len());
    eprintln!("Skipped:          {}", report.skipped.len());
    eprintln!("Score Errors:     {}", report.score_errors);
    if let Some(value) = report.final_value() {
        eprintln!("Final Value:      {value:.2}");
    }
    eprintln!("Total Return:     {:.2}%", metrics.total_return * 100.0);
    eprintln!(
        "Annualized:       {:.2}%",
        metrics.annualized_return * 100.0
    );
    eprintln!("Volatility:       {:.2}%", metrics.annualized_stdev * 100.0);
    eprintln!("Sharpe Ratio:     {:.2}", metrics.sharpe_ratio);
    eprintln!("Max Drawdown:     -{:.1}%", metrics.max_drawdown * 100.0);

    for day in &report.skipped {
        eprintln!("  skipped {day}");
    }
}

pub fn write_snapshots(report: &BacktestReport, path: &Path) -> Result<(), FactorError> {
    let json = serde_json::to_string_pretty(&report.snapshots).map_err(|e| FactorError::Internal {
        reason: format!("failed to serialize snapshots: {e}"),
    })?;
    fs::write(path, json)?;
    Ok(())
}

fn run_scores(config_path: &Path, date: NaiveDate) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    match compute_scores(&adapter, date) {
        Ok(result) => {
            for (symbol, score) in &result.scores {
                println!("{symbol}\t{score}");
            }
            for error in &result.errors {
                eprintln!("  {}: {}", error.symbol, error.error);
            }
            eprintln!(
                "{} scored, {} errors on {}",
                result.scores.len(),
                result.errors.len(),
                date
            );
            ExitCode::SUCCESS
        }
        Err(e) => report_error(&e),
    }
}

/// Scores of the configured formula for every universe symbol on `date`.
pub fn compute_scores(adapter: &dyn ConfigPort, date: NaiveDate) -> Result<ScoreResult, FactorError> {
    let (expression, universe) = build_strategy(adapter)?;
    let store = open_store(adapter)?;
    let workers = adapter.get_int("backtest", "workers", DEFAULT_WORKERS as i64).max(1) as usize;

    if !store.prices().list_trading_days(date, date)?.contains(&date) {
        return Err(FactorError::NoTradingDays {
            start: date,
            end: date,
        });
    }

    let loader = PriceCacheLoader::new(store.prices()).with_fundamentals(store.fundamentals());
    let mut daily = ScoreOrchestrator::new(loader)
        .with_workers(workers)
        .calculate_factor_scores(&[date], &universe, &expression)?;
    Ok(daily.remove(&date).unwrap_or_default())
}

fn run_holdings(config_path: &Path) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    let result = compute_holdings(&adapter).and_then(|holdings| {
        serde_json::to_string_pretty(&holdings).map_err(|e| FactorError::Internal {
            reason: format!("failed to serialize holdings: {e}"),
        })
    });

    match result {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => report_error(&e),
    }
}

/// Target weights on the latest stored trading day.
pub fn compute_holdings(adapter: &dyn ConfigPort) -> Result<LatestHoldings, FactorError> {
    let (expression, universe) = build_strategy(adapter)?;
    let store = open_store(adapter)?;
    let num_tickers =
        adapter.get_int("backtest", "num_tickers", DEFAULT_NUM_TICKERS as i64) as usize;
    let workers = adapter.get_int("backtest", "workers", DEFAULT_WORKERS as i64).max(1) as usize;
    Rebalancer::new(store.prices(), num_tickers)
        .with_fundamentals(store.fundamentals())
        .with_weighting(build_weighting(adapter)?)
        .with_workers(workers)
        .latest_holdings(&expression, &universe)
}

fn run_validate(expression: &str, symbol: &str, date: NaiveDate) -> ExitCode {
    eprintln!("Validating formula: {expression}");
    let parsed = match FactorExpression::parse(expression) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("  error: {}", e.display_with_context(expression));
            return (&FactorError::from(e)).into();
        }
    };
    eprintln!("  Parsed: {parsed}");

    let symbol = symbol.to_uppercase();
    let requirements = match dry_run(&parsed, &symbol, date) {
        Ok(requirements) => requirements,
        Err(e) => {
            eprintln!("  error for {symbol} on {date}: {e}");
            return (&FactorError::from(e)).into();
        }
    };

    eprintln!("\nData read for {symbol} on {date}:");
    for request in &requirements.prices {
        eprintln!("  price {} {}", request.symbol, request.date);
    }
    for request in &requirements.stdevs {
        eprintln!(
            "  stdev {} {}..{}",
            request.symbol, request.start, request.end
        );
    }
    for request in &requirements.fundamentals {
        eprintln!("  fundamentals {} {}", request.symbol, request.date);
    }
    if requirements.is_empty() {
        eprintln!("  (none)");
    }

    eprintln!("\nFormula is valid.");
    ExitCode::SUCCESS
}
