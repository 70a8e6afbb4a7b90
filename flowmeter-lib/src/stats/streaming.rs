use std::sync::Arc;

use crate::error::FlowError;
use crate::stats::{P2Estimator, SeriesSummary, StatisticsEngine, StatsSnapshot};

/// Welford running mean and variance, with extremes.
#[derive(Debug, Clone, Default)]
struct RunningMoments {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningMoments {
    fn push(&mut self, x: f64) {
        if self.count == 0 {
            self.min = x;
            self.max = x;
        } else {
            self.min = self.min.min(x);
            self.max = self.max.max(x);
        }
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    /// Population variance.
    fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }
}

#[derive(Debug, Clone)]
struct SeriesSketch {
    moments: RunningMoments,
    quantiles: P2Estimator,
}

impl SeriesSketch {
    fn new(markers: Arc<[f64]>) -> Self {
        Self {
            moments: RunningMoments::default(),
            quantiles: P2Estimator::new(markers),
        }
    }

    #[inline]
    fn push(&mut self, x: f64) {
        self.moments.push(x);
        self.quantiles.push(x);
    }

    fn summary(&self, probabilities: &[f64]) -> SeriesSummary {
        SeriesSummary {
            mean: self.moments.mean,
            stddev: self.moments.variance().sqrt(),
            min: self.moments.min,
            max: self.moments.max,
            median: self.quantiles.quantile(0.5),
            quantiles: probabilities
                .iter()
                .map(|&p| (p, self.quantiles.quantile(p)))
                .collect(),
        }
    }
}

/// The second currently receiving packets; pushed as a sample once a later
/// second opens or the series is finalized.
#[derive(Debug, Clone, Copy)]
struct OpenSecond {
    index: u32,
    packets: u32,
    bytes: u64,
}

/// Bounded-memory per-second series.
///
/// Only the open second is kept verbatim; every completed second, idle gaps
/// included, is folded into running moments and a P² sketch. A late packet
/// for a second already folded is counted in the open second instead. Idle
/// seconds after the last packet are never folded in, which trims the tail
/// the same way [`BucketedStats`](super::BucketedStats) does.
#[derive(Debug, Clone)]
pub struct StreamingStats {
    window: u32,
    quantiles: Arc<[f64]>,
    /// Seconds already folded into the sketches.
    folded: u32,
    open: Option<OpenSecond>,
    packets: SeriesSketch,
    bytes: SeriesSketch,
}

impl StreamingStats {
    pub fn new(window: u32, quantiles: Arc<[f64]>, markers: Arc<[f64]>) -> Self {
        Self {
            window,
            quantiles,
            folded: 0,
            open: None,
            packets: SeriesSketch::new(markers.clone()),
            bytes: SeriesSketch::new(markers),
        }
    }

    #[inline]
    pub fn window(&self) -> u32 {
        self.window
    }

    /// Fold the open second, then idle seconds up to (excluding) `until`.
    fn fold_until(&mut self, until: u32) {
        if let Some(open) = self.open.take() {
            self.packets.push(open.packets as f64);
            self.bytes.push(open.bytes as f64);
            self.folded = open.index + 1;
        }
        while self.folded < until {
            self.packets.push(0.0);
            self.bytes.push(0.0);
            self.folded += 1;
        }
    }

    fn summarize(&self, seconds: u32, packets: &SeriesSketch, bytes: &SeriesSketch) -> StatsSnapshot {
        StatsSnapshot {
            seconds,
            packets: packets.summary(&self.quantiles),
            bytes: bytes.summary(&self.quantiles),
        }
    }
}

impl StatisticsEngine for StreamingStats {
    fn record(&mut self, elapsed_secs: u32, byte_length: u64) -> Result<(), FlowError> {
        if elapsed_secs >= self.window {
            return Err(FlowError::OutOfRangeBucket {
                index: elapsed_secs as i64,
                len: self.window,
            });
        }
        // Folded samples cannot be reopened.
        let earliest = self.open.map_or(self.folded, |open| open.index);
        let elapsed_secs = elapsed_secs.max(earliest);

        if let Some(open) = self.open.as_mut().filter(|open| open.index == elapsed_secs) {
            open.packets = open.packets.saturating_add(1);
            open.bytes = open.bytes.saturating_add(byte_length);
            return Ok(());
        }

        self.fold_until(elapsed_secs);
        self.open = Some(OpenSecond {
            index: elapsed_secs,
            packets: 1,
            bytes: byte_length,
        });
        Ok(())
    }

    fn finalize(&mut self) -> StatsSnapshot {
        self.fold_until(0);
        self.summarize(self.folded, &self.packets, &self.bytes)
    }

    fn snapshot(&self) -> StatsSnapshot {
        match self.open {
            None => self.summarize(self.folded, &self.packets, &self.bytes),
            Some(open) => {
                let mut packets = self.packets.clone();
                let mut bytes = self.bytes.clone();
                for _ in self.folded..open.index {
                    packets.push(0.0);
                    bytes.push(0.0);
                }
                packets.push(open.packets as f64);
                bytes.push(open.bytes as f64);
                self.summarize(open.index + 1, &packets, &bytes)
            }
        }
    }
}
