//! Percentile statistics over measured probe results.
//!
//! Percentiles use linear interpolation between the two nearest ranks:
//! `rank = p / 100 * (n - 1)`, and the value is
//! `sorted[floor] + (sorted[ceil] - sorted[floor]) * (rank - floor)`.
//! Warmup runs and failed probes never contribute.

use serde::Serialize;

use crate::probes::ProbeResult;
use crate::types::ModelId;

/// Linear-interpolation percentile of an ascending slice.
///
/// `None` when the slice is empty or `p` is outside `0.0..=100.0` (including NaN).
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if !(0.0..=100.0).contains(&p) {
        return None;
    }
    match sorted.len() {
        0 => None,
        1 => Some(sorted[0]),
        n => {
            let rank = (p / 100.0) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            if lower == upper {
                return Some(sorted[lower]);
            }
            let fraction = rank - lower as f64;
            Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl Percentiles {
    /// Sorts a copy of `values`. `None` when there are no values.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        Some(Self {
            p50: percentile(&sorted, 50.0)?,
            p95: percentile(&sorted, 95.0)?,
            p99: percentile(&sorted, 99.0)?,
        })
    }
}

/// TTFT and TPS distribution over a set of measured results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricStatistics {
    /// Successful measured results
    pub sample_count: usize,
    /// Failed measured results
    pub error_count: usize,
    pub ttft_ms: Option<Percentiles>,
    pub tps: Option<Percentiles>,
}

impl MetricStatistics {
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a ProbeResult>) -> Self {
        let mut ttft = Vec::new();
        let mut tps = Vec::new();
        let mut error_count = 0;

        for result in results.into_iter().filter(|r| !r.is_warmup) {
            match result.metrics() {
                Some(metrics) => {
                    ttft.push(metrics.ttft_ms);
                    tps.push(metrics.tps);
                }
                None => error_count += 1,
            }
        }

        Self {
            sample_count: ttft.len(),
            error_count,
            ttft_ms: Percentiles::from_values(&ttft),
            tps: Percentiles::from_values(&tps),
        }
    }
}

/// Statistics for one model of a benchmark run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateStatistics {
    pub model_id: ModelId,
    pub model_name: String,
    #[serde(flatten)]
    pub stats: MetricStatistics,
}

/// Per-model statistics, in order of each model's first appearance in `results`.
pub fn per_model(results: &[ProbeResult]) -> Vec<AggregateStatistics> {
    let mut order: Vec<(ModelId, &str)> = Vec::new();
    for result in results {
        if !order.iter().any(|(id, _)| *id == result.model_id) {
            order.push((result.model_id, &result.model_name));
        }
    }

    order
        .into_iter()
        .map(|(model_id, model_name)| AggregateStatistics {
            model_id,
            model_name: model_name.to_string(),
            stats: MetricStatistics::from_results(results.iter().filter(|r| r.model_id == model_id)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_single_value() {
        assert_eq!(percentile(&[], 50.0), None);
        assert_eq!(percentile(&[42.0], 99.0), Some(42.0));
        assert_eq!(Percentiles::from_values(&[]), None);
    }

    #[test]
    fn interpolates_between_ranks() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        // rank 1.5
        assert_eq!(percentile(&sorted, 50.0), Some(2.5));
        // rank 0.0 and 3.0 land exactly on elements
        assert_eq!(percentile(&sorted, 0.0), Some(1.0));
        assert_eq!(percentile(&sorted, 100.0), Some(4.0));
    }

    #[test]
    fn out_of_range_percentile_is_none() {
        let sorted = [1.0, 2.0, 3.0];
        assert_eq!(percentile(&sorted, 100.5), None);
        assert_eq!(percentile(&sorted, -1.0), None);
        assert_eq!(percentile(&sorted, f64::NAN), None);
        assert_eq!(percentile(&[7.0], 150.0), None);
    }

    #[test]
    fn input_order_does_not_matter() {
        let stats = Percentiles::from_values(&[30.0, 10.0, 20.0]).unwrap();
        assert_eq!(stats.p50, 20.0);
    }
}
