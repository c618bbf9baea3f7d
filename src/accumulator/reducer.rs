//! Deterministic reduction of per-chunk results
//!
//! Completions arrive in any order from a parallel executor. The reducer
//! re-imposes chunk-index order: a result is folded into the running
//! accumulator only once every lower-indexed chunk has been folded or
//! marked as skipped. Float merges are not perfectly associative, so a
//! fixed merge order is what makes results reproducible.

use super::Accumulator;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Order in which per-chunk results are merged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReductionOrder {
    /// Left fold in chunk-index order, buffering early arrivals
    #[default]
    ChunkIndex,
    /// Merge each result as soon as it arrives
    Arrival,
}

/// Running, order-normalizing reduction
#[derive(Debug)]
pub struct OrderedReducer<A> {
    order: ReductionOrder,
    next: usize,
    pending: BTreeMap<usize, Option<A>>,
    acc: Option<A>,
    merged: usize,
    skipped: usize,
}

impl<A: Accumulator> OrderedReducer<A> {
    pub fn new(order: ReductionOrder) -> Self {
        Self {
            order,
            next: 0,
            pending: BTreeMap::new(),
            acc: None,
            merged: 0,
            skipped: 0,
        }
    }

    /// Offer the result of chunk `index`
    pub fn push(&mut self, index: usize, value: A) {
        self.offer(index, Some(value));
    }

    /// Mark chunk `index` as contributing nothing (failed within budget)
    pub fn skip(&mut self, index: usize) {
        self.offer(index, None);
    }

    fn offer(&mut self, index: usize, value: Option<A>) {
        match self.order {
            ReductionOrder::Arrival => self.absorb(value),
            ReductionOrder::ChunkIndex => {
                if index < self.next || self.pending.contains_key(&index) {
                    warn!("Ignoring duplicate result for chunk {}", index);
                    return;
                }
                self.pending.insert(index, value);
                while let Some(ready) = self.pending.remove(&self.next) {
                    self.next += 1;
                    self.absorb(ready);
                }
                if !self.pending.is_empty() {
                    debug!(
                        "Buffering {} out-of-order result(s), waiting for chunk {}",
                        self.pending.len(),
                        self.next
                    );
                }
            }
        }
    }

    fn absorb(&mut self, value: Option<A>) {
        match value {
            Some(value) => {
                self.acc = Some(match self.acc.take() {
                    Some(acc) => acc.merge(value),
                    None => value,
                });
                self.merged += 1;
            }
            None => self.skipped += 1,
        }
    }

    /// Number of results folded so far
    pub fn merged(&self) -> usize {
        self.merged
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Results waiting for a predecessor
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Final accumulator
    ///
    /// Buffered results whose predecessors never arrived (an aborted job)
    /// are folded in index order; with nothing merged this is `identity()`.
    pub fn finish(mut self) -> A {
        let pending = std::mem::take(&mut self.pending);
        for (_, value) in pending {
            self.absorb(value);
        }
        self.acc.unwrap_or_else(A::identity)
    }
}
