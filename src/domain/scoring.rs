//! Factor score orchestration.
//!
//! Every (day, symbol) pair is an independent job. The dry run sizes the
//! cache once for the whole batch, then a fixed pool of scoped worker
//! threads drains a pre-filled bounded queue against the frozen cache.
//! Results are merged by (day, symbol), so completion order does not matter.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;

use chrono::NaiveDate;
use parking_lot::Mutex;

use crate::domain::dependency::collect_requirements;
use crate::domain::error::{EvalError, FactorError};
use crate::domain::expr::FactorExpression;
use crate::domain::expr_eval::{MetricSource, evaluate};
use crate::domain::price_cache::{PriceCache, PriceCacheLoader};

pub const DEFAULT_WORKERS: usize = 10;

/// Cooperative cancellation shared by every worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// A non-fatal evaluation failure for one symbol on one day.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreError {
    pub symbol: String,
    pub date: NaiveDate,
    pub error: EvalError,
}

/// Scores for one trading day. A symbol absent from `scores` either hit
/// missing data or failed with an error listed in `errors`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreResult {
    pub scores: BTreeMap<String, f64>,
    pub errors: Vec<ScoreError>,
}

pub type DailyScores = BTreeMap<NaiveDate, ScoreResult>;

#[derive(Debug, Clone, Copy)]
struct Job<'a> {
    date: NaiveDate,
    symbol: &'a str,
}

pub struct ScoreOrchestrator<'a> {
    loader: PriceCacheLoader<'a>,
    workers: usize,
    cancel: CancelToken,
}

impl<'a> ScoreOrchestrator<'a> {
    pub fn new(loader: PriceCacheLoader<'a>) -> Self {
        Self {
            loader,
            workers: DEFAULT_WORKERS,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Score `expression` for every symbol on every trading day.
    pub fn calculate_factor_scores(
        &self,
        trading_days: &[NaiveDate],
        symbols: &[String],
        expression: &FactorExpression,
    ) -> Result<DailyScores, FactorError> {
        let jobs = build_jobs(trading_days, symbols);
        if jobs.is_empty() {
            return Err(FactorError::NoInputs);
        }

        let requirements =
            collect_requirements(expression, jobs.iter().map(|job| (job.date, job.symbol)));
        tracing::info!(
            jobs = jobs.len(),
            prices = requirements.prices.len(),
            stdevs = requirements.stdevs.len(),
            "dry run complete"
        );

        let cache = self.loader.load(&requirements)?;
        run_jobs(&cache, expression, jobs, self.workers, &self.cancel)
    }
}

/// Score every (day, symbol) pair against an already loaded cache.
pub fn score_with_cache(
    cache: &PriceCache,
    expression: &FactorExpression,
    trading_days: &[NaiveDate],
    symbols: &[String],
    workers: usize,
    cancel: &CancelToken,
) -> Result<DailyScores, FactorError> {
    let jobs = build_jobs(trading_days, symbols);
    if jobs.is_empty() {
        return Err(FactorError::NoInputs);
    }
    run_jobs(cache, expression, jobs, workers.max(1), cancel)
}

fn build_jobs<'a>(trading_days: &[NaiveDate], symbols: &'a [String]) -> Vec<Job<'a>> {
    trading_days
        .iter()
        .flat_map(|date| {
            symbols.iter().map(|symbol| Job {
                date: *date,
                symbol: symbol.as_str(),
            })
        })
        .collect()
}

type Outcome<'a> = (Job<'a>, Result<f64, EvalError>);

fn run_jobs(
    metrics: &(dyn MetricSource + Sync),
    expression: &FactorExpression,
    jobs: Vec<Job<'_>>,
    workers: usize,
    cancel: &CancelToken,
) -> Result<DailyScores, FactorError> {
    let job_count = jobs.len();
    let mut results: DailyScores = jobs
        .iter()
        .map(|job| (job.date, ScoreResult::default()))
        .collect();

    let (job_tx, job_rx) = mpsc::sync_channel(job_count);
    for job in jobs {
        job_tx.send(job).map_err(|_| FactorError::Internal {
            reason: "job queue closed before scoring started".to_string(),
        })?;
    }
    drop(job_tx);
    let job_rx = Mutex::new(job_rx);

    let stop = CancelToken::new();
    let (result_tx, result_rx) = mpsc::channel::<Outcome<'_>>();
    let pool_size = workers.min(job_count);
    tracing::debug!(jobs = job_count, workers = pool_size, "scoring started");

    let mut completed = 0usize;
    let mut fault: Option<EvalError> = None;

    thread::scope(|scope| -> Result<(), FactorError> {
        for id in 0..pool_size {
            let result_tx = result_tx.clone();
            let job_rx = &job_rx;
            let stop = &stop;
            thread::Builder::new()
                .name(format!("score-worker-{id}"))
                .spawn_scoped(scope, move || {
                    loop {
                        if cancel.is_cancelled() || stop.is_cancelled() {
                            break;
                        }
                        let Ok(job) = job_rx.lock().recv() else {
                            break;
                        };
                        let outcome = evaluate(expression, job.symbol, job.date, metrics);
                        if outcome.as_ref().is_err_and(EvalError::is_internal_fault) {
                            stop.cancel();
                        }
                        if result_tx.send((job, outcome)).is_err() {
                            break;
                        }
                    }
                })?;
        }
        drop(result_tx);

        for (job, outcome) in result_rx {
            completed += 1;
            let day = results.entry(job.date).or_default();
            match outcome {
                Ok(score) => {
                    day.scores.insert(job.symbol.to_string(), score);
                }
                Err(error) if error.is_missing_data() => {
                    tracing::trace!(symbol = job.symbol, date = %job.date, %error, "missing data");
                }
                Err(error) if error.is_internal_fault() => {
                    fault.get_or_insert(error);
                }
                Err(error) => day.errors.push(ScoreError {
                    symbol: job.symbol.to_string(),
                    date: job.date,
                    error,
                }),
            }
        }
        Ok(())
    })?;

    if let Some(error) = fault {
        return Err(FactorError::Internal {
            reason: format!("cache lookup outside dry-run requirements: {error}"),
        });
    }
    if completed < job_count {
        tracing::warn!(completed, total = job_count, "scoring cancelled");
        return Err(FactorError::Cancelled);
    }

    for day in results.values_mut() {
        day.errors.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    }
    tracing::info!(jobs = job_count, days = results.len(), "scoring complete");
    Ok(results)
}
