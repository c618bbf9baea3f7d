//! Merge laws for the provided accumulators

use chunkflow::accumulator::{merge_all, Accumulator, Histogram, Stats};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn stats() -> impl Strategy<Value = Stats> {
    prop::collection::vec(0.0f64..1_000.0, 0..20).prop_map(Stats::from_values)
}

fn histogram() -> impl Strategy<Value = Histogram> {
    prop::collection::vec(-10.0f64..110.0, 0..30).prop_map(|values| {
        let mut histogram = Histogram::new(10, 0.0, 100.0).expect("valid binning");
        for value in values {
            histogram.fill(value);
        }
        histogram
    })
}

fn named() -> impl Strategy<Value = BTreeMap<String, u64>> {
    prop::collection::btree_map("[a-d]", 0u64..1_000, 0..4)
}

proptest! {
    #[test]
    fn test_stats_merge_is_associative(a in stats(), b in stats(), c in stats()) {
        let left = a.clone().merge(b.clone()).merge(c.clone());
        let right = a.merge(b.merge(c));
        prop_assert!(left.approx_eq(&right), "{:?} vs {:?}", left, right);
    }

    #[test]
    fn test_stats_merge_is_commutative(a in stats(), b in stats()) {
        prop_assert!(a.clone().merge(b.clone()).approx_eq(&b.merge(a)));
    }

    #[test]
    fn test_histogram_merge_laws(a in histogram(), b in histogram(), c in histogram()) {
        let left = a.clone().merge(b.clone()).merge(c.clone());
        let right = a.clone().merge(b.clone().merge(c));
        prop_assert!(left.approx_eq(&right));
        prop_assert!(a.clone().merge(b.clone()).approx_eq(&b.merge(a.clone())));
        prop_assert!(Histogram::identity().merge(a.clone()).approx_eq(&a));
    }

    #[test]
    fn test_named_merge_laws(a in named(), b in named(), c in named()) {
        let left = a.clone().merge(b.clone()).merge(c.clone());
        let right = a.clone().merge(b.clone().merge(c));
        prop_assert_eq!(&left, &right);
        prop_assert_eq!(a.clone().merge(b.clone()), b.merge(a));
    }

    #[test]
    fn test_merge_all_matches_single_stream(parts in prop::collection::vec(prop::collection::vec(0.0f64..100.0, 0..10), 0..8)) {
        let merged: Stats = merge_all(parts.iter().cloned().map(Stats::from_values));
        let direct = Stats::from_values(parts.into_iter().flatten());
        prop_assert!(merged.approx_eq(&direct));
    }
}
