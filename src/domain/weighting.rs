//! Selection and weighting of the top-ranked symbols.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::domain::error::TargetError;
use crate::domain::price_cache::sample_stdev;

pub const DEFAULT_FACTOR_INTENSITY: f64 = 0.999;

/// Tolerance on the sum of weights.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-4;

/// How selected symbols share the portfolio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeightingPolicy {
    EqualWeight,
    /// Start from equal weights and tilt each by its score's z-score, scaled
    /// so no weight leaves [0, 1]. `intensity` in (0, 1] is how much of that
    /// headroom is used.
    ZScoreTilt { intensity: f64 },
}

impl Default for WeightingPolicy {
    fn default() -> Self {
        WeightingPolicy::ZScoreTilt {
            intensity: DEFAULT_FACTOR_INTENSITY,
        }
    }
}

impl WeightingPolicy {
    /// Weights for the top `num_tickers` symbols by score.
    pub fn weights(
        &self,
        scores: &BTreeMap<String, f64>,
        num_tickers: usize,
    ) -> Result<BTreeMap<String, f64>, TargetError> {
        let selected = top_n(scores, num_tickers);
        if selected.len() != num_tickers {
            return Err(TargetError::NotEnoughScores {
                expected: num_tickers,
                found: selected.len(),
            });
        }

        let weights = match self {
            _ if selected.len() == 1 => selected.iter().map(|(s, _)| (s.to_string(), 1.0)).collect(),
            WeightingPolicy::EqualWeight => equal_weights(&selected),
            WeightingPolicy::ZScoreTilt { intensity } => tilted_weights(&selected, *intensity),
        };
        validate_weights(&weights)?;
        Ok(weights)
    }
}

/// Highest scores first, ties broken by symbol ascending.
pub fn rank(scores: &BTreeMap<String, f64>) -> Vec<(&str, f64)> {
    let mut ranked: Vec<(&str, f64)> = scores.iter().map(|(s, v)| (s.as_str(), *v)).collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });
    ranked
}

fn top_n(scores: &BTreeMap<String, f64>, n: usize) -> Vec<(&str, f64)> {
    let mut ranked = rank(scores);
    ranked.truncate(n);
    ranked
}

fn equal_weights(selected: &[(&str, f64)]) -> BTreeMap<String, f64> {
    let weight = 1.0 / selected.len() as f64;
    selected
        .iter()
        .map(|(symbol, _)| (symbol.to_string(), weight))
        .collect()
}

fn tilted_weights(selected: &[(&str, f64)], intensity: f64) -> BTreeMap<String, f64> {
    let anchor = equal_weights(selected);
    let values: Vec<f64> = selected.iter().map(|(_, v)| *v).collect();
    let Some(stdev) = sample_stdev(&values).filter(|s| *s > 0.0) else {
        return anchor;
    };
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let z_scores: Vec<(&str, f64)> = selected
        .iter()
        .map(|(symbol, v)| (*symbol, (v - mean) / stdev))
        .collect();

    let base = 1.0 / selected.len() as f64;
    let max_scale = z_scores
        .iter()
        .filter(|(_, z)| *z != 0.0)
        .map(|(_, z)| if *z > 0.0 { (1.0 - base) / z } else { base / -z })
        .fold(1.0_f64, f64::min);
    let scale = max_scale * intensity;

    z_scores
        .into_iter()
        .map(|(symbol, z)| (symbol.to_string(), (base + scale * z).max(0.0)))
        .collect()
}

fn validate_weights(weights: &BTreeMap<String, f64>) -> Result<(), TargetError> {
    for (symbol, weight) in weights {
        if !weight.is_finite() {
            return Err(TargetError::InvalidWeights {
                reason: format!("weight for {symbol} is {weight}"),
            });
        }
        if *weight < 0.0 {
            return Err(TargetError::InvalidWeights {
                reason: format!("negative weight {weight} for {symbol}"),
            });
        }
    }
    let sum: f64 = weights.values().sum();
    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(TargetError::InvalidWeights {
            reason: format!("weights should sum to 1, got {sum}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scores(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(s, v)| (s.to_string(), *v)).collect()
    }

    #[test]
    fn rank_descending_with_symbol_tie_break() {
        let s = scores(&[("MSFT", 1.0), ("AAPL", 2.0), ("GOOG", 2.0), ("AMZN", 0.5)]);
        let order: Vec<&str> = rank(&s).into_iter().map(|(sym, _)| sym).collect();
        assert_eq!(order, vec!["AAPL", "GOOG", "MSFT", "AMZN"]);
    }

    #[test]
    fn equal_weight_selects_top_n() {
        let s = scores(&[("A", 4.0), ("B", 3.0), ("C", 2.0), ("D", 1.0)]);
        let w = WeightingPolicy::EqualWeight.weights(&s, 3).unwrap();
        assert_eq!(w.keys().collect::<Vec<_>>(), vec!["A", "B", "C"]);
        for weight in w.values() {
            assert!((weight - 1.0 / 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn too_few_scores_is_an_error() {
        let s = scores(&[("A", 4.0), ("B", 3.0)]);
        let err = WeightingPolicy::default().weights(&s, 3).unwrap_err();
        assert_eq!(
            err,
            TargetError::NotEnoughScores {
                expected: 3,
                found: 2
            }
        );
    }

    #[test]
    fn zscore_tilt_favors_higher_scores() {
        let s = scores(&[("A", 3.0), ("B", 2.0), ("C", 1.0)]);
        let w = WeightingPolicy::default().weights(&s, 3).unwrap();
        assert!(w["A"] > w["B"]);
        assert!(w["B"] > w["C"]);
        assert!((w["B"] - 1.0 / 3.0).abs() < 1e-12);
        approx::assert_relative_eq!(w.values().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn zscore_tilt_hand_computed() {
        // z-scores are 1, 0, -1; headroom is min((1 - 1/3) / 1, (1/3) / 1) = 1/3.
        let s = scores(&[("A", 3.0), ("B", 2.0), ("C", 1.0)]);
        let w = WeightingPolicy::ZScoreTilt { intensity: 0.5 }
            .weights(&s, 3)
            .unwrap();
        approx::assert_relative_eq!(w["A"], 1.0 / 3.0 + 1.0 / 6.0, epsilon = 1e-12);
        approx::assert_relative_eq!(w["C"], 1.0 / 3.0 - 1.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn full_intensity_drives_lowest_to_zero() {
        let s = scores(&[("A", 3.0), ("B", 2.0), ("C", 1.0)]);
        let w = WeightingPolicy::ZScoreTilt { intensity: 1.0 }
            .weights(&s, 3)
            .unwrap();
        assert!(w["C"].abs() < 1e-12);
    }

    #[test]
    fn identical_scores_fall_back_to_equal() {
        let s = scores(&[("A", 5.0), ("B", 5.0), ("C", 5.0)]);
        let w = WeightingPolicy::default().weights(&s, 3).unwrap();
        for weight in w.values() {
            assert!((weight - 1.0 / 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn single_ticker_gets_everything() {
        let s = scores(&[("A", 1.0), ("B", 2.0)]);
        let w = WeightingPolicy::default().weights(&s, 1).unwrap();
        assert_eq!(w.len(), 1);
        assert!((w["B"] - 1.0).abs() < f64::EPSILON);
    }

    proptest! {
        #[test]
        fn tilted_weights_are_valid(values in prop::collection::vec(-1e6f64..1e6, 3..30), n in 3usize..10) {
            let s: BTreeMap<String, f64> = values
                .iter()
                .enumerate()
                .map(|(i, v)| (format!("S{i:02}"), *v))
                .collect();
            let n = n.min(s.len());
            let w = WeightingPolicy::default().weights(&s, n).unwrap();
            prop_assert_eq!(w.len(), n);
            prop_assert!(w.values().all(|x| *x >= 0.0 && *x <= 1.0));
            prop_assert!((w.values().sum::<f64>() - 1.0).abs() < WEIGHT_SUM_TOLERANCE);
        }
    }
}
