//! Property tests for chunk planning

use chunkflow::plan::{partition, plan_chunks, Dataset, Fileset, PlanOptions};
use chunkflow::source::SourceError;
use proptest::prelude::*;
use std::collections::HashMap;

fn fileset_with(lengths: &[Vec<u64>]) -> (Fileset, HashMap<String, u64>) {
    let mut table = HashMap::new();
    let datasets = lengths.iter().enumerate().map(|(d, sources)| {
        let files: Vec<String> = sources
            .iter()
            .enumerate()
            .map(|(s, length)| {
                let location = format!("d{}/s{}", d, s);
                table.insert(location.clone(), *length);
                location
            })
            .collect();
        Dataset::new(format!("dataset{}", d), files)
    });
    let fileset = Fileset::new(datasets.collect::<Vec<_>>()).expect("unique names");
    (fileset, table)
}

proptest! {
    #[test]
    fn test_partition_covers_source_exactly(length in 0u64..50_000, chunk_size in 1u64..5_000) {
        let ranges = partition(length, chunk_size);

        let mut expected_start = 0;
        for (start, stop) in &ranges {
            prop_assert_eq!(*start, expected_start);
            prop_assert!(start < stop);
            prop_assert!(stop - start <= chunk_size);
            expected_start = *stop;
        }
        prop_assert_eq!(expected_start, length);
        prop_assert_eq!(ranges.len() as u64, length.div_ceil(chunk_size));
    }

    #[test]
    fn test_plan_is_deterministic_and_ordered(
        lengths in prop::collection::vec(prop::collection::vec(0u64..3_000, 0..4), 1..4),
        chunk_size in 1u64..1_000,
    ) {
        let (fileset, table) = fileset_with(&lengths);
        let probe = |d: &chunkflow::plan::SourceDescriptor| -> Result<u64, SourceError> {
            Ok(table[&d.location])
        };

        let options = PlanOptions::new(chunk_size);
        let first = plan_chunks(&fileset, &options, probe).unwrap();
        let second = plan_chunks(&fileset, &options, probe).unwrap();
        prop_assert_eq!(&first, &second);

        let total: u64 = table.values().sum();
        prop_assert_eq!(first.total_items(), total);
        for (i, chunk) in first.chunks.iter().enumerate() {
            prop_assert_eq!(chunk.index, i);
            prop_assert!(chunk.start < chunk.stop);
            prop_assert!(chunk.stop <= table[&chunk.source.location]);
        }
    }

    #[test]
    fn test_max_chunks_is_a_stable_prefix(
        lengths in prop::collection::vec(prop::collection::vec(1u64..2_000, 1..4), 1..4),
        chunk_size in 1u64..500,
        max_chunks in 1usize..40,
    ) {
        let (fileset, table) = fileset_with(&lengths);
        let probe = |d: &chunkflow::plan::SourceDescriptor| -> Result<u64, SourceError> {
            Ok(table[&d.location])
        };

        let full = plan_chunks(&fileset, &PlanOptions::new(chunk_size), probe).unwrap();
        let capped = plan_chunks(
            &fileset,
            &PlanOptions::new(chunk_size).with_max_chunks(max_chunks),
            probe,
        )
        .unwrap();

        prop_assert_eq!(capped.len(), full.len().min(max_chunks));
        prop_assert_eq!(&capped.chunks[..], &full.chunks[..capped.len()]);
    }
}
