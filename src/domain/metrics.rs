//! Performance metrics over a backtest's value series.

use chrono::NaiveDate;
use serde::Serialize;

use super::backtest::BacktestSample;
use super::price_cache::sample_stdev;

const DAYS_PER_YEAR: f64 = 365.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValuePoint {
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub total_return: f64,
    pub annualized_return: f64,
    /// Sample standard deviation of per-rebalance returns, scaled to a year.
    pub annualized_stdev: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    /// Longest run of samples spent below a previous peak.
    pub max_drawdown_duration: usize,
}

impl Metrics {
    pub fn from_samples(samples: &[BacktestSample]) -> Self {
        let points: Vec<ValuePoint> = samples
            .iter()
            .map(|s| ValuePoint {
                date: s.date,
                value: s.total_value,
            })
            .collect();
        Self::compute(&points)
    }

    pub fn compute(points: &[ValuePoint]) -> Self {
        let (Some(first), Some(last)) = (points.first(), points.last()) else {
            return Self::zero();
        };

        let total_return = if first.value > 0.0 {
            (last.value - first.value) / first.value
        } else {
            0.0
        };

        let years = (last.date - first.date).num_days() as f64 / DAYS_PER_YEAR;
        let annualized_return = if years > 0.0 && first.value > 0.0 && last.value >= 0.0 {
            (last.value / first.value).powf(1.0 / years) - 1.0
        } else {
            0.0
        };

        let returns: Vec<f64> = points
            .windows(2)
            .map(|w| {
                if w[0].value > 0.0 {
                    (w[1].value - w[0].value) / w[0].value
                } else {
                    0.0
                }
            })
            .collect();
        let annualized_stdev = match sample_stdev(&returns) {
            Some(stdev) if years > 0.0 => stdev * (returns.len() as f64 / years).sqrt(),
            _ => 0.0,
        };

        let sharpe_ratio = if annualized_stdev > 0.0 {
            annualized_return / annualized_stdev
        } else {
            0.0
        };

        let (max_drawdown, max_drawdown_duration) = compute_drawdown(points);

        Metrics {
            total_return,
            annualized_return,
            annualized_stdev,
            sharpe_ratio,
            max_drawdown,
            max_drawdown_duration,
        }
    }

    fn zero() -> Self {
        Metrics {
            total_return: 0.0,
            annualized_return: 0.0,
            annualized_stdev: 0.0,
            sharpe_ratio: 0.0,
            max_drawdown: 0.0,
            max_drawdown_duration: 0,
        }
    }
}

fn compute_drawdown(points: &[ValuePoint]) -> (f64, usize) {
    let Some(first) = points.first() else {
        return (0.0, 0);
    };

    let mut peak = first.value;
    let mut max_dd = 0.0_f64;
    let mut max_duration = 0usize;
    let mut duration = 0usize;

    for point in points {
        if point.value > peak {
            peak = point.value;
            duration = 0;
        } else if peak > 0.0 && point.value < peak {
            max_dd = max_dd.max((peak - point.value) / peak);
            duration += 1;
            max_duration = max_duration.max(duration);
        }
    }

    (max_dd, max_duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn curve(values: &[(i64, f64)]) -> Vec<ValuePoint> {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        values
            .iter()
            .map(|&(offset, value)| ValuePoint {
                date: start + chrono::Duration::days(offset),
                value,
            })
            .collect()
    }

    #[test]
    fn metrics_empty_series() {
        let m = Metrics::compute(&[]);
        assert_eq!(m, Metrics::zero());
    }

    #[test]
    fn metrics_single_point() {
        let m = Metrics::compute(&curve(&[(0, 1000.0)]));
        assert!((m.total_return).abs() < f64::EPSILON);
        assert!((m.annualized_return).abs() < f64::EPSILON);
        assert!((m.annualized_stdev).abs() < f64::EPSILON);
    }

    #[test]
    fn metrics_total_return() {
        let m = Metrics::compute(&curve(&[(0, 1000.0), (7, 1100.0), (14, 1200.0)]));
        assert_relative_eq!(m.total_return, 0.2, epsilon = 1e-12);
    }

    #[test]
    fn metrics_annualized_return_over_two_years() {
        let m = Metrics::compute(&curve(&[(0, 100.0), (365, 110.0), (730, 121.0)]));
        assert_relative_eq!(m.annualized_return, 0.1, epsilon = 1e-9);
    }

    #[test]
    fn metrics_constant_returns_have_no_volatility() {
        let m = Metrics::compute(&curve(&[(0, 100.0), (365, 110.0), (730, 121.0)]));
        assert!(m.annualized_stdev.abs() < 1e-12);
    }

    #[test]
    fn metrics_sharpe_ratio_positive() {
        let m = Metrics::compute(&curve(&[
            (0, 100.0),
            (91, 104.0),
            (182, 103.0),
            (273, 108.0),
            (365, 112.0),
        ]));
        assert!(m.annualized_stdev > 0.0);
        assert!(m.sharpe_ratio > 0.0);
        assert_relative_eq!(m.sharpe_ratio, m.annualized_return / m.annualized_stdev, epsilon = 1e-12);
    }

    #[test]
    fn metrics_max_drawdown() {
        let m = Metrics::compute(&curve(&[
            (0, 100.0),
            (1, 120.0),
            (2, 90.0),
            (3, 96.0),
            (4, 130.0),
        ]));
        assert_relative_eq!(m.max_drawdown, 0.25, epsilon = 1e-12);
        assert_eq!(m.max_drawdown_duration, 2);
    }
}
