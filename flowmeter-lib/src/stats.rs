//! Per-flow rate statistics.
//!
//! A flow's traffic is observed as a time series with one sample per elapsed
//! second since its first packet: the number of packets and the number of
//! bytes seen during that second. Two engines summarise the series:
//!
//! - [`BucketedStats`] keeps every second and computes exact order statistics.
//! - [`StreamingStats`] keeps running moments and an extended P² sketch, so its
//!   memory does not depend on how long the flow lasts.
//!
//! Both produce the same [`StatsSnapshot`]. Which one a flow gets is decided at
//! table construction time through [`StatsParams`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    config::{FlowConfig, StatsConfig, StatsStrategy},
    error::FlowError,
};

pub mod bucketed;
pub mod p2;
pub mod streaming;

pub use bucketed::{Bucket, BucketedStats};
pub use p2::P2Estimator;
pub use streaming::StreamingStats;

/// Read/write contract shared by the statistics strategies.
pub trait StatisticsEngine {
    /// Account one packet of `byte_length` bytes to the second `elapsed_secs`.
    ///
    /// Fails with [`FlowError::OutOfRangeBucket`] when the second is outside the
    /// window the engine can represent. A failed call leaves the engine unchanged.
    fn record(&mut self, elapsed_secs: u32, byte_length: u64) -> Result<(), FlowError>;

    /// Trim trailing idle seconds, release spare memory and summarise.
    ///
    /// Calling it again without an intervening [`record`](Self::record) yields
    /// the same snapshot.
    fn finalize(&mut self) -> StatsSnapshot;

    /// Summarise the series observed so far without freezing it.
    fn snapshot(&self) -> StatsSnapshot;
}

/// Descriptive statistics of one per-second series.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SeriesSummary {
    pub mean: f64,
    /// Population standard deviation.
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    /// `(probability, value)` pairs, in configuration order.
    pub quantiles: Vec<(f64, f64)>,
}

impl SeriesSummary {
    /// Exact summary of `values`, sorting them in place.
    pub fn exact(values: &mut [f64], probabilities: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                quantiles: probabilities.iter().map(|&p| (p, 0.0)).collect(),
                ..Default::default()
            };
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;

        values.sort_by(f64::total_cmp);

        Self {
            mean,
            stddev: variance.sqrt(),
            min: values[0],
            max: values[values.len() - 1],
            median: interpolated_quantile(values, 0.5),
            quantiles: probabilities
                .iter()
                .map(|&p| (p, interpolated_quantile(values, p)))
                .collect(),
        }
    }

    /// Value of the quantile for `p`, if it was requested.
    pub fn quantile(&self, p: f64) -> Option<f64> {
        self.quantiles
            .iter()
            .find(|(prob, _)| *prob == p)
            .map(|(_, v)| *v)
    }
}

/// Summary of both per-second series of a flow.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Number of one-second samples the summary was computed over.
    pub seconds: u32,
    pub packets: SeriesSummary,
    pub bytes: SeriesSummary,
}

/// Quantile of sorted data by linear interpolation between the two nearest
/// order statistics, at rank `(n - 1) * p`.
pub fn interpolated_quantile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (n - 1) as f64 * p.clamp(0.0, 1.0);
            let lo = rank.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            sorted[lo] + (rank - lo as f64) * (sorted[hi] - sorted[lo])
        }
    }
}

/// Statistics settings shared by every flow of a table.
#[derive(Debug, Clone)]
pub struct StatsParams {
    pub strategy: StatsStrategy,
    /// Number of one-second slots a flow may use, i.e. the max flow lifetime.
    pub window_secs: u32,
    /// Reported probabilities, in configuration order.
    pub quantiles: Arc<[f64]>,
    /// Marker probabilities for the P² sketch (reported quantiles plus the median).
    pub(crate) markers: Arc<[f64]>,
}

impl StatsParams {
    pub fn new(config: &StatsConfig, window_secs: u32) -> Self {
        let mut tracked = config.quantiles.clone();
        tracked.push(0.5);
        Self {
            strategy: config.strategy,
            window_secs: window_secs.max(1),
            quantiles: config.quantiles.clone().into(),
            markers: p2::marker_probabilities(&tracked).into(),
        }
    }

    pub fn from_flow_config(config: &FlowConfig) -> Self {
        Self::new(&config.stats, config.max_lifetime_secs)
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.strategy != StatsStrategy::Disabled
    }
}

/// The statistics engine owned by one flow, chosen by configuration.
#[derive(Debug, Clone)]
pub enum FlowStats {
    Disabled,
    Exact(BucketedStats),
    Approximate(StreamingStats),
}

impl FlowStats {
    pub fn new(params: &StatsParams) -> Self {
        match params.strategy {
            StatsStrategy::Disabled => FlowStats::Disabled,
            StatsStrategy::Exact => FlowStats::Exact(BucketedStats::new(
                params.window_secs,
                params.quantiles.clone(),
            )),
            StatsStrategy::Approximate => FlowStats::Approximate(StreamingStats::new(
                params.window_secs,
                params.quantiles.clone(),
                params.markers.clone(),
            )),
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        !matches!(self, FlowStats::Disabled)
    }

    /// Seconds the engine can represent; 0 when statistics are disabled.
    #[inline]
    pub fn window(&self) -> u32 {
        match self {
            FlowStats::Disabled => 0,
            FlowStats::Exact(engine) => engine.window(),
            FlowStats::Approximate(engine) => engine.window(),
        }
    }

    #[inline]
    pub fn record(&mut self, elapsed_secs: u32, byte_length: u64) -> Result<(), FlowError> {
        match self {
            FlowStats::Disabled => Ok(()),
            FlowStats::Exact(engine) => engine.record(elapsed_secs, byte_length),
            FlowStats::Approximate(engine) => engine.record(elapsed_secs, byte_length),
        }
    }

    pub fn finalize(&mut self) -> Option<StatsSnapshot> {
        match self {
            FlowStats::Disabled => None,
            FlowStats::Exact(engine) => Some(engine.finalize()),
            FlowStats::Approximate(engine) => Some(engine.finalize()),
        }
    }

    pub fn snapshot(&self) -> Option<StatsSnapshot> {
        match self {
            FlowStats::Disabled => None,
            FlowStats::Exact(engine) => Some(engine.snapshot()),
            FlowStats::Approximate(engine) => Some(engine.snapshot()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROBS: [f64; 5] = [0.10, 0.25, 0.50, 0.75, 0.90];

    #[test]
    fn test_interpolated_quantile() {
        let data = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(interpolated_quantile(&data, 0.0), 1.0);
        assert_eq!(interpolated_quantile(&data, 0.5), 3.0);
        assert_eq!(interpolated_quantile(&data, 1.0), 5.0);
        assert_eq!(interpolated_quantile(&data, 0.25), 2.0);
        assert!((interpolated_quantile(&data, 0.1) - 1.4).abs() < 1e-12);
        assert_eq!(interpolated_quantile(&[7.0], 0.9), 7.0);
        assert_eq!(interpolated_quantile(&[], 0.9), 0.0);
    }

    #[test]
    fn test_exact_summary_population_variance() {
        let mut values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let summary = SeriesSummary::exact(&mut values, &PROBS);

        assert_eq!(summary.mean, 5.0);
        assert_eq!(summary.stddev, 2.0);
        assert_eq!(summary.min, 2.0);
        assert_eq!(summary.max, 9.0);
        assert_eq!(summary.median, 4.5);
        assert_eq!(summary.quantile(0.5), Some(4.5));
        assert_eq!(summary.quantiles.len(), 5);
        assert_eq!(summary.quantile(0.99), None);
    }

    #[test]
    fn test_exact_summary_even_median() {
        let mut values = [1.0, 0.0, 0.0, 0.0, 0.0, 1.0];
        let summary = SeriesSummary::exact(&mut values, &PROBS);
        assert_eq!(summary.median, 0.0);
        assert!((summary.mean - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_exact_summary_empty() {
        let summary = SeriesSummary::exact(&mut [], &PROBS);
        assert_eq!(summary.mean, 0.0);
        assert_eq!(summary.quantiles.len(), 5);
    }

    #[test]
    fn test_flow_stats_strategy_selection() {
        let mut config = StatsConfig::default();
        assert!(matches!(
            FlowStats::new(&StatsParams::new(&config, 60)),
            FlowStats::Exact(_)
        ));

        config.strategy = StatsStrategy::Approximate;
        assert!(matches!(
            FlowStats::new(&StatsParams::new(&config, 60)),
            FlowStats::Approximate(_)
        ));

        config.strategy = StatsStrategy::Disabled;
        let mut stats = FlowStats::new(&StatsParams::new(&config, 60));
        assert!(!stats.is_enabled());
        assert!(stats.record(1000, 10).is_ok());
        assert_eq!(stats.finalize(), None);
        assert_eq!(stats.snapshot(), None);
    }

    #[test]
    fn test_strategies_share_schema() {
        let mut config = StatsConfig::default();
        let mut exact = FlowStats::new(&StatsParams::new(&config, 60));
        config.strategy = StatsStrategy::Approximate;
        let mut approx = FlowStats::new(&StatsParams::new(&config, 60));

        for (sec, len) in [(0, 100), (0, 60), (2, 40), (3, 1500)] {
            exact.record(sec, len).unwrap();
            approx.record(sec, len).unwrap();
        }

        let a = exact.finalize().unwrap();
        let b = approx.finalize().unwrap();
        assert_eq!(a.seconds, 4);
        assert_eq!(b.seconds, 4);
        for (x, y) in [(&a.packets, &b.packets), (&a.bytes, &b.bytes)] {
            assert!((x.mean - y.mean).abs() < 1e-9);
            assert!((x.stddev - y.stddev).abs() < 1e-9);
            assert_eq!(x.min, y.min);
            assert_eq!(x.max, y.max);
            // Fewer samples than P² markers: the sketch is still exact.
            assert_eq!(x.median, y.median);
            assert_eq!(x.quantiles, y.quantiles);
        }
    }
}
