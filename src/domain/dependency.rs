//! Dependency discovery by dry run.
//!
//! The formula is evaluated once per (symbol, date) against a recorder that
//! answers every lookup with a placeholder and remembers what was asked.
//! Formulas cannot branch, so the recorded set is exactly what a real run
//! reads.

use std::cell::RefCell;
use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::domain::error::EvalError;
use crate::domain::expr::FactorExpression;
use crate::domain::expr_eval::{MetricSource, evaluate_unchecked};
use crate::domain::market::Fundamentals;

/// A (symbol, date) point the formula reads.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PriceRequest {
    pub symbol: String,
    pub date: NaiveDate,
}

/// A (symbol, start, end) volatility window the formula reads.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StdevRequest {
    pub symbol: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Deduplicated, sorted data requirements of a batch of evaluations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Requirements {
    pub prices: Vec<PriceRequest>,
    pub stdevs: Vec<StdevRequest>,
    pub fundamentals: Vec<PriceRequest>,
}

impl Requirements {
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty() && self.stdevs.is_empty() && self.fundamentals.is_empty()
    }

    /// Earliest and latest date mentioned by any request.
    pub fn date_span(&self) -> Option<(NaiveDate, NaiveDate)> {
        let dates = self
            .prices
            .iter()
            .map(|p| (p.date, p.date))
            .chain(self.stdevs.iter().map(|s| (s.start, s.end)));
        dates.fold(None, |acc, (lo, hi)| match acc {
            None => Some((lo, hi)),
            Some((min, max)) => Some((min.min(lo), max.max(hi))),
        })
    }
}

const PLACEHOLDER: f64 = 1.0;

#[derive(Default)]
struct Recorded {
    prices: BTreeSet<PriceRequest>,
    stdevs: BTreeSet<StdevRequest>,
    fundamentals: BTreeSet<PriceRequest>,
}

/// Stand-in metric source that records every lookup.
#[derive(Default)]
pub struct RecordingMetrics {
    recorded: RefCell<Recorded>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_requirements(self) -> Requirements {
        let recorded = self.recorded.into_inner();
        Requirements {
            prices: recorded.prices.into_iter().collect(),
            stdevs: recorded.stdevs.into_iter().collect(),
            fundamentals: recorded.fundamentals.into_iter().collect(),
        }
    }
}

impl MetricSource for RecordingMetrics {
    fn price(&self, symbol: &str, date: NaiveDate) -> Result<f64, EvalError> {
        self.recorded.borrow_mut().prices.insert(PriceRequest {
            symbol: symbol.to_string(),
            date,
        });
        Ok(PLACEHOLDER)
    }

    fn stdev(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<f64, EvalError> {
        self.recorded.borrow_mut().stdevs.insert(StdevRequest {
            symbol: symbol.to_string(),
            start,
            end,
        });
        Ok(PLACEHOLDER)
    }

    fn fundamentals(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<Fundamentals>, EvalError> {
        self.recorded.borrow_mut().fundamentals.insert(PriceRequest {
            symbol: symbol.to_string(),
            date,
        });
        Ok(Some(Fundamentals {
            shares_outstanding: Some(PLACEHOLDER),
            eps: Some(PLACEHOLDER),
            total_assets: Some(PLACEHOLDER * 2.0),
            total_liabilities: Some(PLACEHOLDER),
        }))
    }
}

/// Dry-run `expression` for every (date, symbol) job and collect what it reads.
///
/// Usage errors that do not depend on data (wrong arity, bad date literal,
/// look-ahead) are left for the real run to report per job.
pub fn collect_requirements<'a, I>(expression: &FactorExpression, jobs: I) -> Requirements
where
    I: IntoIterator<Item = (NaiveDate, &'a str)>,
{
    let recorder = RecordingMetrics::new();
    for (date, symbol) in jobs {
        if let Err(err) = evaluate_unchecked(expression, symbol, date, &recorder) {
            tracing::debug!(%symbol, %date, error = %err, "dry run could not complete");
        }
    }
    recorder.into_requirements()
}

/// Dry-run `expression` once and fail on the first error, data or not.
pub fn dry_run(
    expression: &FactorExpression,
    symbol: &str,
    date: NaiveDate,
) -> Result<Requirements, EvalError> {
    let recorder = RecordingMetrics::new();
    evaluate_unchecked(expression, symbol, date, &recorder)?;
    Ok(recorder.into_requirements())
}
