//! Per-dataset statistics of one numeric column of line-oriented text

use super::{ProcessError, Processor};
use crate::accumulator::{Accumulator, Histogram, Stats};
use crate::plan::Chunk;
use crate::source::LineEvents;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Statistics gathered for one dataset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub values: Stats,
    pub histogram: Histogram,
    /// Lines whose column was missing or not a number
    pub malformed: u64,
}

impl Accumulator for ColumnSummary {
    fn identity() -> Self {
        Self::default()
    }

    fn merge(self, other: Self) -> Self {
        Self {
            values: self.values.merge(other.values),
            histogram: self.histogram.merge(other.histogram),
            malformed: self.malformed.merge(other.malformed),
        }
    }

    fn approx_eq(&self, other: &Self) -> bool {
        self.values.approx_eq(&other.values)
            && self.histogram.approx_eq(&other.histogram)
            && self.malformed == other.malformed
    }
}

/// Parses column `column` of every non-blank, non-`#` line
///
/// Non-finite values (`nan`, `inf`, `1e400`) and values whose square
/// overflows `f64` count as malformed, so every summary stays finite and
/// serializes to JSON the same way on every executor.
#[derive(Debug, Clone)]
pub struct ColumnStatsProcessor {
    column: usize,
    delimiter: Option<char>,
    binning: Option<(usize, f64, f64)>,
}

impl ColumnStatsProcessor {
    /// Whitespace-separated columns, no histogram
    pub fn new(column: usize) -> Self {
        Self {
            column,
            delimiter: None,
            binning: None,
        }
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = Some(delimiter);
        self
    }

    pub fn with_histogram(mut self, bins: usize, lo: f64, hi: f64) -> Self {
        self.binning = Some((bins, lo, hi));
        self
    }

    fn field<'a>(&self, line: &'a str) -> Option<&'a str> {
        match self.delimiter {
            Some(delimiter) => line.split(delimiter).nth(self.column),
            None => line.split_whitespace().nth(self.column),
        }
    }

    fn histogram(&self) -> Histogram {
        self.binning
            .and_then(|(bins, lo, hi)| Histogram::new(bins, lo, hi))
            .unwrap_or_else(Histogram::empty)
    }
}

impl Processor<LineEvents> for ColumnStatsProcessor {
    type Output = BTreeMap<String, ColumnSummary>;

    fn process(&self, chunk: &Chunk, events: LineEvents) -> Result<Self::Output, ProcessError> {
        let mut summary = ColumnSummary {
            histogram: self.histogram(),
            ..ColumnSummary::default()
        };

        for line in &events.lines {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match self.field(trimmed).map(|f| f.trim().parse::<f64>()) {
                Some(Ok(value)) if (value * value).is_finite() => {
                    summary.values.push(value);
                    summary.histogram.fill(value);
                }
                _ => summary.malformed += 1,
            }
        }

        Ok(BTreeMap::from([(chunk.dataset.clone(), summary)]))
    }
}
