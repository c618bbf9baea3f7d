//! Summary statistics and fixed-binning histograms

use super::{approx_eq_f64, Accumulator};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Running count, sum, sum of squares, min and max of a value stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub count: u64,
    pub sum: f64,
    pub sum_sq: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    pub fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Self {
        let mut stats = Self::new();
        for value in values {
            stats.push(value);
        }
        stats
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Population variance
    pub fn variance(&self) -> Option<f64> {
        let mean = self.mean()?;
        Some((self.sum_sq / self.count as f64 - mean * mean).max(0.0))
    }

    pub fn std_dev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }
}

fn merge_extreme(a: Option<f64>, b: Option<f64>, pick: fn(f64, f64) -> f64) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(pick(a, b)),
        (a, None) => a,
        (None, b) => b,
    }
}

fn approx_eq_opt(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => approx_eq_f64(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl Accumulator for Stats {
    fn identity() -> Self {
        Self::default()
    }

    fn merge(self, other: Self) -> Self {
        Self {
            count: self.count.saturating_add(other.count),
            sum: self.sum + other.sum,
            sum_sq: self.sum_sq + other.sum_sq,
            min: merge_extreme(self.min, other.min, f64::min),
            max: merge_extreme(self.max, other.max, f64::max),
        }
    }

    fn approx_eq(&self, other: &Self) -> bool {
        self.count == other.count
            && approx_eq_f64(self.sum, other.sum)
            && approx_eq_f64(self.sum_sq, other.sum_sq)
            && approx_eq_opt(self.min, other.min)
            && approx_eq_opt(self.max, other.max)
    }
}

/// Uniformly binned histogram over `[lo, hi)` with under/overflow
///
/// A histogram with zero bins is the identity. Merging two histograms with
/// different binnings keeps the left-hand binning and counts the right-hand
/// entries in `mismatched` instead of failing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub lo: f64,
    pub hi: f64,
    pub counts: Vec<f64>,
    pub underflow: f64,
    pub overflow: f64,
    #[serde(default)]
    pub mismatched: f64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::empty()
    }
}

impl Histogram {
    /// `bins` uniform bins over `[lo, hi)`; `None` for a degenerate range
    pub fn new(bins: usize, lo: f64, hi: f64) -> Option<Self> {
        if bins == 0 || !lo.is_finite() || !hi.is_finite() || lo >= hi {
            return None;
        }
        Some(Self {
            lo,
            hi,
            counts: vec![0.0; bins],
            underflow: 0.0,
            overflow: 0.0,
            mismatched: 0.0,
        })
    }

    /// The identity histogram (no binning yet)
    pub fn empty() -> Self {
        Self {
            lo: 0.0,
            hi: 0.0,
            counts: Vec::new(),
            underflow: 0.0,
            overflow: 0.0,
            mismatched: 0.0,
        }
    }

    pub fn bins(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn fill(&mut self, value: f64) {
        self.fill_weighted(value, 1.0);
    }

    pub fn fill_weighted(&mut self, value: f64, weight: f64) {
        if self.is_empty() {
            return;
        }
        if value.is_nan() || value < self.lo {
            self.underflow += weight;
        } else if value >= self.hi {
            self.overflow += weight;
        } else {
            let width = (self.hi - self.lo) / self.bins() as f64;
            let bin = (((value - self.lo) / width) as usize).min(self.bins() - 1);
            self.counts[bin] += weight;
        }
    }

    /// Sum of weights, including under/overflow
    pub fn total(&self) -> f64 {
        self.counts.iter().sum::<f64>() + self.underflow + self.overflow
    }

    pub fn same_binning(&self, other: &Self) -> bool {
        self.bins() == other.bins() && self.lo == other.lo && self.hi == other.hi
    }
}

impl Accumulator for Histogram {
    fn identity() -> Self {
        Self::empty()
    }

    fn merge(mut self, other: Self) -> Self {
        if other.is_empty() {
            self.mismatched += other.mismatched;
            return self;
        }
        if self.is_empty() {
            let mut other = other;
            other.mismatched += self.mismatched;
            return other;
        }
        if !self.same_binning(&other) {
            warn!(
                "Histogram binning mismatch ({} bins [{}, {}) vs {} bins [{}, {}))",
                self.bins(),
                self.lo,
                self.hi,
                other.bins(),
                other.lo,
                other.hi
            );
            self.mismatched += other.total() + other.mismatched;
            return self;
        }

        for (count, extra) in self.counts.iter_mut().zip(other.counts) {
            *count += extra;
        }
        self.underflow += other.underflow;
        self.overflow += other.overflow;
        self.mismatched += other.mismatched;
        self
    }

    fn approx_eq(&self, other: &Self) -> bool {
        ((self.is_empty() && other.is_empty()) || self.same_binning(other))
            && self
                .counts
                .iter()
                .zip(&other.counts)
                .all(|(a, b)| approx_eq_f64(*a, *b))
            && approx_eq_f64(self.underflow, other.underflow)
            && approx_eq_f64(self.overflow, other.overflow)
            && approx_eq_f64(self.mismatched, other.mismatched)
    }
}
