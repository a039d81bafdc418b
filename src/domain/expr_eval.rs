//! Factor formula evaluation.
//!
//! Formulas are branch-free, so evaluation is a single walk of the AST.
//! Metric lookups go through [`MetricSource`], which is the price cache in a
//! real run and a recorder during the dry run.

use chrono::{Duration, Months, NaiveDate};

use crate::domain::error::EvalError;
use crate::domain::expr::{BinaryOp, Expr, FactorExpression, Function, ParamKind};
use crate::domain::market::{Fundamentals, percent_change};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Data the metric functions read.
pub trait MetricSource {
    fn price(&self, symbol: &str, date: NaiveDate) -> Result<f64, EvalError>;

    /// Annualized standard deviation of daily returns over `[start, end]`.
    fn stdev(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<f64, EvalError>;

    fn fundamentals(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<Fundamentals>, EvalError>;
}

/// Runtime value. Dates travel as ISO text.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    fn describe(&self) -> String {
        match self {
            Value::Number(n) => format!("number {n}"),
            Value::Text(s) => format!("text '{s}'"),
        }
    }
}

enum Arg {
    Date(NaiveDate),
    Integer(i64),
}

struct Evaluator<'a> {
    symbol: &'a str,
    date: NaiveDate,
    metrics: &'a dyn MetricSource,
}

/// Evaluate `expression` for `symbol` on `date`. The result must be finite.
pub fn evaluate(
    expression: &FactorExpression,
    symbol: &str,
    date: NaiveDate,
    metrics: &dyn MetricSource,
) -> Result<f64, EvalError> {
    let value = evaluate_unchecked(expression, symbol, date, metrics)?;
    if !value.is_finite() {
        return Err(EvalError::NonFinite(value));
    }
    Ok(value)
}

/// Evaluate without the finiteness post-condition.
pub fn evaluate_unchecked(
    expression: &FactorExpression,
    symbol: &str,
    date: NaiveDate,
    metrics: &dyn MetricSource,
) -> Result<f64, EvalError> {
    let evaluator = Evaluator {
        symbol,
        date,
        metrics,
    };
    match evaluator.eval(expression.ast())? {
        Value::Number(n) => Ok(n),
        Value::Text(_) => Err(EvalError::NonNumeric),
    }
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(text: &str) -> Result<NaiveDate, EvalError> {
    NaiveDate::parse_from_str(text.trim(), DATE_FORMAT)
        .map_err(|_| EvalError::InvalidDate(text.to_string()))
}

/// Shift `date` by whole years, months and days. Month arithmetic clamps to
/// the last day of the target month.
pub fn shift_date(
    date: NaiveDate,
    years: i64,
    months: i64,
    days: i64,
) -> Result<NaiveDate, EvalError> {
    let overflow = || EvalError::InvalidDate(format!("{date} shifted by {years}y {months}m {days}d"));

    let total_months = years
        .checked_mul(12)
        .and_then(|m| m.checked_add(months))
        .ok_or_else(overflow)?;
    let magnitude = u32::try_from(total_months.unsigned_abs()).map_err(|_| overflow())?;
    let shifted = if total_months >= 0 {
        date.checked_add_months(Months::new(magnitude))
    } else {
        date.checked_sub_months(Months::new(magnitude))
    }
    .ok_or_else(overflow)?;

    Duration::try_days(days)
        .and_then(|d| shifted.checked_add_signed(d))
        .ok_or_else(overflow)
}

impl Evaluator<'_> {
    fn eval(&self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Text(s) => Ok(Value::Text(s.clone())),
            Expr::CurrentDate => Ok(Value::Text(format_date(self.date))),
            Expr::Neg(inner) => match self.eval(inner)? {
                Value::Number(n) => Ok(Value::Number(-n)),
                other => Err(EvalError::OperandType {
                    op: '-',
                    found: other.describe(),
                }),
            },
            Expr::Binary { op, left, right } => {
                let l = self.number_operand(*op, self.eval(left)?)?;
                let r = self.number_operand(*op, self.eval(right)?)?;
                Ok(Value::Number(match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Sub => l - r,
                    BinaryOp::Mul => l * r,
                    BinaryOp::Div => l / r,
                }))
            }
            Expr::Call { function, args } => self.call(*function, args),
        }
    }

    fn number_operand(&self, op: BinaryOp, value: Value) -> Result<f64, EvalError> {
        match value {
            Value::Number(n) => Ok(n),
            other => Err(EvalError::OperandType {
                op: op.symbol(),
                found: other.describe(),
            }),
        }
    }

    fn check_args(&self, function: Function, args: &[Expr]) -> Result<Vec<Arg>, EvalError> {
        let params = function.params();
        if args.len() != params.len() {
            return Err(EvalError::Arity {
                function: function.name(),
                expected: params.len(),
                found: args.len(),
            });
        }

        params
            .iter()
            .zip(args)
            .enumerate()
            .map(|(index, (kind, arg))| {
                let value = self.eval(arg)?;
                match (kind, value) {
                    (ParamKind::Date, Value::Text(s)) => parse_date(&s).map(Arg::Date),
                    (ParamKind::Integer, Value::Number(n)) if n.fract() == 0.0 && n.is_finite() => {
                        Ok(Arg::Integer(n as i64))
                    }
                    (kind, other) => Err(EvalError::ArgumentType {
                        function: function.name(),
                        index,
                        expected: kind.describe(),
                        found: other.describe(),
                    }),
                }
            })
            .collect()
    }

    fn call(&self, function: Function, args: &[Expr]) -> Result<Value, EvalError> {
        let args = self.check_args(function, args)?;

        match (function, args.as_slice()) {
            (Function::AddDate, [Arg::Date(d), Arg::Integer(y), Arg::Integer(m), Arg::Integer(n)]) => {
                shift_date(*d, *y, *m, *n).map(|d| Value::Text(format_date(d)))
            }
            (Function::NDaysAgo, [Arg::Integer(n)]) => self.ago(function, *n, 0, 0, 1),
            (Function::NMonthsAgo, [Arg::Integer(n)]) => self.ago(function, *n, 0, 1, 0),
            (Function::NYearsAgo, [Arg::Integer(n)]) => self.ago(function, *n, 1, 0, 0),
            (Function::Price, [Arg::Date(d)]) => {
                self.metrics.price(self.symbol, *d).map(Value::Number)
            }
            (Function::PricePercentChange, [Arg::Date(start), Arg::Date(end)]) => {
                let start_price = self.metrics.price(self.symbol, *start)?;
                let end_price = self.metrics.price(self.symbol, *end)?;
                Ok(Value::Number(percent_change(start_price, end_price)))
            }
            (Function::Stdev, [Arg::Date(start), Arg::Date(end)]) => self
                .metrics
                .stdev(self.symbol, *start, *end)
                .map(Value::Number),
            (Function::MarketCap, [Arg::Date(d)]) => {
                let shares = self.required(*d, |f| f.shares_outstanding, "shares outstanding")?;
                let price = self.metrics.price(self.symbol, *d)?;
                Ok(Value::Number(shares * price))
            }
            (Function::PeRatio, [Arg::Date(d)]) => {
                let eps = self.required(*d, |f| f.eps, "eps")?;
                let price = self.metrics.price(self.symbol, *d)?;
                Ok(Value::Number(price / eps))
            }
            (Function::PbRatio, [Arg::Date(d)]) => {
                let assets = self.required(*d, |f| f.total_assets, "total assets")?;
                let liabilities = self.required(*d, |f| f.total_liabilities, "total liabilities")?;
                let shares = self.required(*d, |f| f.shares_outstanding, "shares outstanding")?;
                let price = self.metrics.price(self.symbol, *d)?;
                let book_per_share = (assets - liabilities) / shares;
                Ok(Value::Number(price / book_per_share))
            }
            (function, args) => Err(EvalError::Arity {
                function: function.name(),
                expected: function.arity(),
                found: args.len(),
            }),
        }
    }

    fn ago(
        &self,
        function: Function,
        n: i64,
        years: i64,
        months: i64,
        days: i64,
    ) -> Result<Value, EvalError> {
        if n < 0 {
            return Err(EvalError::LookAhead {
                function: function.name(),
                n,
            });
        }
        shift_date(
            self.date,
            -n.saturating_mul(years),
            -n.saturating_mul(months),
            -n.saturating_mul(days),
        )
        .map(|d| Value::Text(format_date(d)))
    }

    fn required(
        &self,
        date: NaiveDate,
        field: impl Fn(&Fundamentals) -> Option<f64>,
        name: &str,
    ) -> Result<f64, EvalError> {
        let missing = |reason: String| EvalError::MissingData {
            symbol: self.symbol.to_string(),
            date,
            reason,
        };
        let record = self
            .metrics
            .fundamentals(self.symbol, date)?
            .ok_or_else(|| missing("no fundamentals on file".to_string()))?;
        field(&record).ok_or_else(|| missing(format!("no {name} on file")))
    }
}
