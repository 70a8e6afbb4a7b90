//! Extended P² quantile estimator.
//!
//! Tracks several quantiles of an unbounded stream with `2k + 3` markers for
//! `k` probabilities (Jain & Chlamtac's P² algorithm, generalised to multiple
//! quantiles by Raatikainen). Marker heights are adjusted with a piecewise
//! parabolic prediction, falling back to linear interpolation when the
//! parabola would break marker ordering.

use smallvec::SmallVec;
use std::sync::Arc;

use crate::stats::interpolated_quantile;

/// Inline capacity covering the default five quantiles plus the median.
type Markers<T> = SmallVec<[T; 15]>;

/// Marker probabilities for tracking `probabilities`: `0`, then each
/// probability preceded by the midpoint to its predecessor, then the
/// midpoint to `1`, then `1`.
pub fn marker_probabilities(probabilities: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = probabilities
        .iter()
        .copied()
        .filter(|p| *p > 0.0 && *p < 1.0)
        .collect();
    sorted.sort_by(f64::total_cmp);
    sorted.dedup();

    let mut markers = Vec::with_capacity(2 * sorted.len() + 3);
    markers.push(0.0);
    let mut previous = 0.0;
    for &p in &sorted {
        markers.push((previous + p) / 2.0);
        markers.push(p);
        previous = p;
    }
    markers.push((previous + 1.0) / 2.0);
    markers.push(1.0);
    markers
}

#[derive(Debug, Clone)]
pub struct P2Estimator {
    /// Desired cumulative probability of each marker.
    markers: Arc<[f64]>,
    /// Marker heights; raw samples until the estimator is primed.
    heights: Markers<f64>,
    /// Actual marker positions, 0-based ranks.
    positions: Markers<i64>,
    count: u64,
}

impl P2Estimator {
    /// `markers` as produced by [`marker_probabilities`].
    pub fn new(markers: Arc<[f64]>) -> Self {
        Self {
            heights: Markers::with_capacity(markers.len()),
            positions: Markers::new(),
            markers,
            count: 0,
        }
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// All markers hold estimates (as opposed to raw samples).
    #[inline]
    fn is_primed(&self) -> bool {
        !self.positions.is_empty()
    }

    pub fn push(&mut self, x: f64) {
        if !self.is_primed() {
            self.heights.push(x);
            self.count += 1;
            if self.heights.len() == self.markers.len() {
                self.heights.sort_by(f64::total_cmp);
                self.positions = (0..self.markers.len() as i64).collect();
            }
            return;
        }

        let m = self.heights.len();
        let cell = if x < self.heights[0] {
            self.heights[0] = x;
            0
        } else if x >= self.heights[m - 1] {
            self.heights[m - 1] = x;
            m - 2
        } else {
            (0..m - 1)
                .find(|&i| self.heights[i] <= x && x < self.heights[i + 1])
                .unwrap_or(m - 2)
        };

        for position in &mut self.positions[cell + 1..] {
            *position += 1;
        }
        self.count += 1;

        let last_rank = (self.count - 1) as f64;
        for i in 1..m - 1 {
            let drift = last_rank * self.markers[i] - self.positions[i] as f64;
            let room_up = self.positions[i + 1] - self.positions[i] > 1;
            let room_down = self.positions[i - 1] - self.positions[i] < -1;

            if (drift >= 1.0 && room_up) || (drift <= -1.0 && room_down) {
                let step: i64 = if drift > 0.0 { 1 } else { -1 };
                let candidate = self.parabolic(i, step);
                self.heights[i] =
                    if self.heights[i - 1] < candidate && candidate < self.heights[i + 1] {
                        candidate
                    } else {
                        self.linear(i, step)
                    };
                self.positions[i] += step;
            }
        }
    }

    fn parabolic(&self, i: usize, step: i64) -> f64 {
        let (q, n) = (&self.heights, &self.positions);
        let d = step as f64;
        let (n_prev, n_cur, n_next) = (n[i - 1] as f64, n[i] as f64, n[i + 1] as f64);

        q[i] + d / (n_next - n_prev)
            * ((n_cur - n_prev + d) * (q[i + 1] - q[i]) / (n_next - n_cur)
                + (n_next - n_cur - d) * (q[i] - q[i - 1]) / (n_cur - n_prev))
    }

    fn linear(&self, i: usize, step: i64) -> f64 {
        let j = (i as i64 + step) as usize;
        let (q, n) = (&self.heights, &self.positions);
        q[i] + step as f64 * (q[j] - q[i]) / (n[j] - n[i]) as f64
    }

    /// Estimate of the quantile at `p`.
    ///
    /// Exact while fewer samples than markers have been seen. Afterwards the
    /// height of the marker tracking `p`, or an interpolation between the two
    /// markers surrounding it when `p` is not tracked.
    pub fn quantile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        if !self.is_primed() {
            let mut samples = self.heights.clone();
            samples.sort_by(f64::total_cmp);
            return interpolated_quantile(&samples, p);
        }

        let p = p.clamp(0.0, 1.0);
        let upper = self
            .markers
            .iter()
            .position(|&marker| marker >= p)
            .unwrap_or(self.markers.len() - 1);
        if upper == 0 || self.markers[upper] == p {
            return self.heights[upper];
        }

        let lower = upper - 1;
        let span = self.markers[upper] - self.markers[lower];
        let weight = (p - self.markers[lower]) / span;
        self.heights[lower] + weight * (self.heights[upper] - self.heights[lower])
    }
}
