//! Date-keyed summaries of backtest samples for reporting.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::domain::backtest::BacktestSample;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMetrics {
    pub asset_weight: f64,
    pub factor_score: f64,
    /// Percent move of the asset's price until the next sample; absent on
    /// the last sample.
    pub price_change_til_next_resampling: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub date: NaiveDate,
    pub value: f64,
    /// Percent change of `value` against the first sample.
    pub value_percent_change: f64,
    pub asset_metrics: BTreeMap<String, AssetMetrics>,
}

pub fn build_snapshots(samples: &[BacktestSample]) -> BTreeMap<NaiveDate, Snapshot> {
    let Some(first) = samples.first() else {
        return BTreeMap::new();
    };

    samples
        .iter()
        .enumerate()
        .map(|(i, sample)| {
            let value_percent_change = if i == 0 || first.total_value == 0.0 {
                0.0
            } else {
                100.0 * (sample.total_value - first.total_value) / first.total_value
            };
            let next = samples.get(i + 1);
            let asset_metrics = sample
                .weights
                .iter()
                .map(|(symbol, weight)| {
                    let change = next.and_then(|next| {
                        let start = sample.prices.get(symbol)?;
                        let end = next.prices.get(symbol)?;
                        (*start != 0.0).then(|| 100.0 * (end - start) / start)
                    });
                    let metrics = AssetMetrics {
                        asset_weight: *weight,
                        factor_score: sample.scores.get(symbol).copied().unwrap_or_default(),
                        price_change_til_next_resampling: change,
                    };
                    (symbol.clone(), metrics)
                })
                .collect();

            let snapshot = Snapshot {
                date: sample.date,
                value: sample.total_value,
                value_percent_change,
                asset_metrics,
            };
            (sample.date, snapshot)
        })
        .collect()
}
