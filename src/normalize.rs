//! Score normalization into the open interval (0, 1).
//!
//! Every method preserves strict ordering: a higher raw score always maps to
//! a higher normalized score, and no output is exactly 0 or 1. A final
//! repair pass enforces both properties where floating-point saturation
//! (e.g. `tanh` of a large z-score) would otherwise collapse neighbours.

use serde::{Deserialize, Serialize};

use crate::result::{RankedResult, sort_by_score};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMethod {
    #[default]
    ZScoreTanh,
    MinMax,
    Percentile,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    pub method: NormalizationMethod,
    pub clip_min: f64,
    pub clip_max: f64,
    /// Divisor applied to z-scores before `tanh`.
    pub tanh_scale: f64,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            method: NormalizationMethod::ZScoreTanh,
            clip_min: 0.02,
            clip_max: 0.98,
            tanh_scale: 2.0,
        }
    }
}

/// Normalize scores, returning the results sorted descending.
pub fn normalize(
    mut results: Vec<RankedResult>,
    config: &NormalizationConfig,
) -> Vec<RankedResult> {
    if results.is_empty() {
        return results;
    }
    sort_by_score(&mut results);

    let raw: Vec<f64> = results
        .iter()
        .map(|r| if r.score.is_finite() { r.score } else { 0.0 })
        .collect();
    let mapped = match config.method {
        NormalizationMethod::ZScoreTanh => z_score_tanh(&raw, config.tanh_scale),
        NormalizationMethod::MinMax => min_max(&raw, config),
        NormalizationMethod::Percentile => percentile(&raw, config),
    };
    let scores = repair(&raw, mapped);

    results
        .into_iter()
        .zip(scores)
        .map(|(result, score)| result.rescore(score))
        .collect()
}

fn z_score_tanh(raw: &[f64], scale: f64) -> Vec<f64> {
    let n = raw.len() as f64;
    let mean = raw.iter().sum::<f64>() / n;
    let variance = raw.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    if std == 0.0 || !std.is_finite() {
        return vec![0.5; raw.len()];
    }
    let scale = if scale > 0.0 { scale } else { 1.0 };
    raw.iter()
        .map(|s| 0.5 + 0.5 * ((s - mean) / std / scale).tanh())
        .collect()
}

/// `raw` is sorted descending.
fn min_max(raw: &[f64], config: &NormalizationConfig) -> Vec<f64> {
    let max = raw[0];
    let min = raw[raw.len() - 1];
    if max == min {
        return vec![0.5; raw.len()];
    }
    raw.iter()
        .map(|s| {
            let t = (s - min) / (max - min);
            config.clip_min + t * (config.clip_max - config.clip_min)
        })
        .collect()
}

/// Rank-based position; tied scores share their average rank. `raw` is
/// sorted descending.
fn percentile(raw: &[f64], config: &NormalizationConfig) -> Vec<f64> {
    let n = raw.len();
    if n == 1 {
        return vec![0.5];
    }
    let mut out = vec![0.0; n];
    let mut start = 0;
    while start < n {
        let mut end = start;
        while end + 1 < n && raw[end + 1] == raw[start] {
            end += 1;
        }
        // Ascending ranks of positions start..=end, averaged.
        let ascending = (n - 1 - end + n - 1 - start) as f64 / 2.0;
        let t = ascending / (n - 1) as f64;
        let value = config.clip_min + t * (config.clip_max - config.clip_min);
        out[start..=end].fill(value);
        start = end + 1;
    }
    out
}

/// Largest `f64` strictly below `x`, staying positive.
fn next_below(x: f64) -> f64 {
    if x <= 0.0 || x.to_bits() <= 1 {
        return x;
    }
    f64::from_bits(x.to_bits() - 1)
}

/// Force outputs into (0, 1) and make them strictly decreasing wherever the
/// (descending) raw scores are.
fn repair(raw: &[f64], mapped: Vec<f64>) -> Vec<f64> {
    let upper = next_below(1.0);
    let mut out: Vec<f64> = Vec::with_capacity(mapped.len());
    for (i, value) in mapped.into_iter().enumerate() {
        let mut value = if value.is_finite() { value } else { 0.5 };
        value = value.clamp(f64::MIN_POSITIVE, upper);
        if let Some(&prev) = out.last() {
            if raw[i] == raw[i - 1] {
                value = prev;
            } else if value >= prev {
                value = next_below(prev);
            }
        }
        out.push(value);
    }
    out
}
