use std::sync::Arc;

use crate::error::FlowError;
use crate::stats::{SeriesSummary, StatisticsEngine, StatsSnapshot};

/// Traffic aggregated over one second of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bucket {
    pub packets: u32,
    pub bytes: u64,
}

impl Bucket {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.packets == 0 && self.bytes == 0
    }
}

/// Exact per-second series: slot `i` holds the traffic of second `i` since
/// the first packet.
///
/// Slots are allocated as the flow advances, never past `window` seconds, so
/// a flow costs memory proportional to how long it has lived rather than to
/// the configured maximum.
#[derive(Debug, Clone)]
pub struct BucketedStats {
    buckets: Vec<Bucket>,
    window: u32,
    quantiles: Arc<[f64]>,
}

impl BucketedStats {
    pub fn new(window: u32, quantiles: Arc<[f64]>) -> Self {
        Self {
            buckets: Vec::new(),
            window,
            quantiles,
        }
    }

    #[inline]
    pub fn window(&self) -> u32 {
        self.window
    }

    /// The slots allocated so far, including trailing idle ones.
    #[inline]
    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    /// Length of the series once trailing idle seconds are dropped.
    fn active_len(&self) -> usize {
        self.buckets
            .iter()
            .rposition(|b| !b.is_empty())
            .map_or(0, |last| last + 1)
    }

    /// Drop trailing idle seconds so they do not bias the summary.
    pub fn trim(&mut self) {
        let len = self.active_len();
        self.buckets.truncate(len);
        self.buckets.shrink_to_fit();
    }

    fn summarize(buckets: &[Bucket], quantiles: &[f64]) -> StatsSnapshot {
        let mut packets: Vec<f64> = buckets.iter().map(|b| b.packets as f64).collect();
        let mut bytes: Vec<f64> = buckets.iter().map(|b| b.bytes as f64).collect();

        StatsSnapshot {
            seconds: buckets.len() as u32,
            packets: SeriesSummary::exact(&mut packets, quantiles),
            bytes: SeriesSummary::exact(&mut bytes, quantiles),
        }
    }
}

impl StatisticsEngine for BucketedStats {
    fn record(&mut self, elapsed_secs: u32, byte_length: u64) -> Result<(), FlowError> {
        if elapsed_secs >= self.window {
            return Err(FlowError::OutOfRangeBucket {
                index: elapsed_secs as i64,
                len: self.window,
            });
        }

        let index = elapsed_secs as usize;
        if index >= self.buckets.len() {
            self.buckets.resize(index + 1, Bucket::default());
        }

        let bucket = &mut self.buckets[index];
        bucket.packets = bucket.packets.saturating_add(1);
        bucket.bytes = bucket.bytes.saturating_add(byte_length);
        Ok(())
    }

    fn finalize(&mut self) -> StatsSnapshot {
        self.trim();
        Self::summarize(&self.buckets, &self.quantiles)
    }

    fn snapshot(&self) -> StatsSnapshot {
        Self::summarize(&self.buckets[..self.active_len()], &self.quantiles)
    }
}
