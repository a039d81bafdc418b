//! Domain error types.

use chrono::NaiveDate;

/// A parse error with position information for factor formulas.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with a caret pointing at the error position in the input.
    pub fn display_with_context(&self, input: &str) -> String {
        let caret = " ".repeat(self.position) + "^";
        format!(
            "{input}\n{caret}\n{err}",
            input = input,
            caret = caret,
            err = self
        )
    }
}

/// A lookup against the price cache that found nothing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CacheMiss {
    #[error("no price for {symbol} on {date}")]
    Price {
        symbol: String,
        date: NaiveDate,
        requested: bool,
    },

    #[error("no volatility for {symbol} over {start}..{end}")]
    Stdev {
        symbol: String,
        start: NaiveDate,
        end: NaiveDate,
        requested: bool,
    },

    #[error("fundamentals for {symbol} on {date} were not loaded")]
    Fundamentals { symbol: String, date: NaiveDate },
}

impl CacheMiss {
    /// True when the point was never discovered by the dry run, meaning the
    /// evaluator and the dependency collector disagree.
    pub fn is_internal_fault(&self) -> bool {
        match self {
            CacheMiss::Price { requested, .. } | CacheMiss::Stdev { requested, .. } => !requested,
            CacheMiss::Fundamentals { .. } => true,
        }
    }
}

/// Failure evaluating one formula for one (symbol, date).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("{function} expects {expected} arguments, got {found}")]
    Arity {
        function: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("{function} argument {index}: expected {expected}, got {found}")]
    ArgumentType {
        function: &'static str,
        index: usize,
        expected: &'static str,
        found: String,
    },

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("{function} cannot look ahead (n = {n})")]
    LookAhead { function: &'static str, n: i64 },

    #[error("operator '{op}' needs numbers, got {found}")]
    OperandType { op: char, found: String },

    #[error("formula produced a text value, not a number")]
    NonNumeric,

    #[error("formula produced a non-finite value: {0}")]
    NonFinite(f64),

    #[error("missing data for {symbol} on {date}: {reason}")]
    MissingData {
        symbol: String,
        date: NaiveDate,
        reason: String,
    },

    #[error(transparent)]
    CacheMiss(#[from] CacheMiss),
}

impl EvalError {
    pub fn is_missing_data(&self) -> bool {
        matches!(self, EvalError::MissingData { .. })
    }

    pub fn is_internal_fault(&self) -> bool {
        match self {
            EvalError::CacheMiss(miss) => miss.is_internal_fault(),
            _ => false,
        }
    }
}

/// Failure building a target portfolio for one day.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TargetError {
    #[error("num_tickers must be at least {minimum}, got {found}")]
    TooFewTickers { minimum: usize, found: usize },

    #[error("portfolio value {0} is too small")]
    ValueTooSmall(f64),

    #[error("target portfolio should have {expected} assets but calculated scores for {found}")]
    NotEnoughScores { expected: usize, found: usize },

    #[error("invalid weights: {reason}")]
    InvalidWeights { reason: String },

    #[error("no price for {symbol}")]
    MissingPrice { symbol: String },
}

/// Top-level error type for factorbt.
#[derive(Debug, thiserror::Error)]
pub enum FactorError {
    #[error("store error: {reason}")]
    Store { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    FormulaParse(#[from] ParseError),

    #[error("formula error: {0}")]
    Formula(#[from] EvalError),

    #[error("internal fault: {reason}")]
    Internal { reason: String },

    #[error("score computation cancelled")]
    Cancelled,

    #[error("no (date, symbol) pairs to score")]
    NoInputs,

    #[error("price store has no trading days")]
    NoPriceData,

    #[error("no trading days between {start} and {end}")]
    NoTradingDays { start: NaiveDate, end: NaiveDate },

    #[error("missing price for held symbol {symbol} on {date}")]
    MissingHoldingPrice { symbol: String, date: NaiveDate },

    #[error(transparent)]
    Target(#[from] TargetError),

    #[error("too many backtest errors ({percent:.1} %). first {}: {}", .first.len(), .first.join("; "))]
    TooManyFailures { percent: f64, first: Vec<String> },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&FactorError> for std::process::ExitCode {
    fn from(err: &FactorError) -> Self {
        let code: u8 = match err {
            FactorError::Io(_) => 1,
            FactorError::ConfigParse { .. }
            | FactorError::ConfigMissing { .. }
            | FactorError::ConfigInvalid { .. } => 2,
            FactorError::Store { .. } => 3,
            FactorError::FormulaParse(_) | FactorError::Formula(_) => 4,
            FactorError::NoInputs
            | FactorError::NoPriceData
            | FactorError::NoTradingDays { .. }
            | FactorError::MissingHoldingPrice { .. }
            | FactorError::Target(_) => 5,
            FactorError::TooManyFailures { .. } => 6,
            FactorError::Internal { .. } | FactorError::Cancelled => 7,
        };
        std::process::ExitCode::from(code)
    }
}
