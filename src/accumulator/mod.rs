//! Mergeable result containers
//!
//! An [`Accumulator`] is produced once per chunk and combined across chunks.
//! `merge` must be associative and commutative, up to floating-point
//! tolerance for float-carrying accumulators; `identity()` stands for "no
//! data" and is what a job over zero chunks produces.

mod reducer;
mod stats;

pub use reducer::{OrderedReducer, ReductionOrder};
pub use stats::{Histogram, Stats};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

/// Relative tolerance used by [`approx_eq_f64`]
pub const RELATIVE_TOLERANCE: f64 = 1e-9;

/// The merge protocol every per-chunk result implements
///
/// Serialization is part of the contract so results can cross process or
/// network boundaries (distributed execution) and be written out as JSON.
pub trait Accumulator:
    Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// The empty accumulator: `identity().merge(a) == a`
    fn identity() -> Self;

    /// Combine two accumulators
    fn merge(self, other: Self) -> Self;

    /// Equality within floating-point tolerance
    fn approx_eq(&self, other: &Self) -> bool;
}

/// Left-fold a sequence of accumulators starting from the identity
pub fn merge_all<A, I>(items: I) -> A
where
    A: Accumulator,
    I: IntoIterator<Item = A>,
{
    items.into_iter().fold(A::identity(), A::merge)
}

/// Compare floats with a relative tolerance (absolute near zero)
pub fn approx_eq_f64(a: f64, b: f64) -> bool {
    if a == b || (a.is_nan() && b.is_nan()) {
        return true;
    }
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= RELATIVE_TOLERANCE * scale
}

impl Accumulator for u64 {
    fn identity() -> Self {
        0
    }

    fn merge(self, other: Self) -> Self {
        self.saturating_add(other)
    }

    fn approx_eq(&self, other: &Self) -> bool {
        self == other
    }
}

impl Accumulator for i64 {
    fn identity() -> Self {
        0
    }

    fn merge(self, other: Self) -> Self {
        self.saturating_add(other)
    }

    fn approx_eq(&self, other: &Self) -> bool {
        self == other
    }
}

impl Accumulator for f64 {
    fn identity() -> Self {
        0.0
    }

    fn merge(self, other: Self) -> Self {
        self + other
    }

    fn approx_eq(&self, other: &Self) -> bool {
        approx_eq_f64(*self, *other)
    }
}

/// Set union
impl<T> Accumulator for BTreeSet<T>
where
    T: Ord + Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    fn identity() -> Self {
        BTreeSet::new()
    }

    fn merge(mut self, mut other: Self) -> Self {
        if self.len() < other.len() {
            std::mem::swap(&mut self, &mut other);
        }
        self.extend(other);
        self
    }

    fn approx_eq(&self, other: &Self) -> bool {
        self == other
    }
}

/// Named accumulators: key-wise merge over the union of keys
impl<A: Accumulator> Accumulator for BTreeMap<String, A> {
    fn identity() -> Self {
        BTreeMap::new()
    }

    fn merge(mut self, other: Self) -> Self {
        for (key, value) in other {
            let merged = match self.remove(&key) {
                Some(existing) => existing.merge(value),
                None => value,
            };
            self.insert(key, merged);
        }
        self
    }

    fn approx_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(key, value)| other.get(key).is_some_and(|o| value.approx_eq(o)))
    }
}

/// `None` is the identity
impl<A: Accumulator> Accumulator for Option<A> {
    fn identity() -> Self {
        None
    }

    fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Some(a), Some(b)) => Some(a.merge(b)),
            (a, None) => a,
            (None, b) => b,
        }
    }

    fn approx_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.approx_eq(b),
            (None, None) => true,
            _ => false,
        }
    }
}
