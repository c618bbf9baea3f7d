use crate::accumulator::{approx_eq_f64, Accumulator};
use crate::plan::{Chunk, SourceDescriptor};
use crate::processor::{ProcessError, Processor};
use crate::source::{DataSource, SourceError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Deterministic value of the item at `offset`
pub fn item_value(offset: u64) -> f64 {
    ((offset.wrapping_mul(7919)) % 1000) as f64 / 7.0
}

/// What [`MockSource::open`] hands to the processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockEvents {
    pub location: String,
    pub start: u64,
    pub stop: u64,
}

/// Scriptable in-memory data source
///
/// Clones share their failure scripts and counters.
#[derive(Debug, Clone, Default)]
pub struct MockSource {
    lengths: HashMap<String, u64>,
    unavailable: HashSet<String>,
    permanent: HashSet<(String, u64)>,
    transient: Arc<Mutex<HashMap<(String, u64), u32>>>,
    delays: HashMap<String, Duration>,
    probes: Arc<AtomicUsize>,
    opens: Arc<AtomicUsize>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, location: &str, length: u64) -> Self {
        self.lengths.insert(location.to_string(), length);
        self
    }

    /// Probing `location` fails
    pub fn with_unavailable(mut self, location: &str) -> Self {
        self.unavailable.insert(location.to_string());
        self
    }

    /// The chunk of `location` starting at `start` fails transiently `times` times
    pub fn fail_transient(self, location: &str, start: u64, times: u32) -> Self {
        self.transient
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((location.to_string(), start), times);
        self
    }

    /// The chunk of `location` starting at `start` always fails permanently
    pub fn fail_permanent(mut self, location: &str, start: u64) -> Self {
        self.permanent.insert((location.to_string(), start));
        self
    }

    /// Every open of a chunk of `location` blocks for `delay`
    pub fn with_delay(mut self, location: &str, delay: Duration) -> Self {
        self.delays.insert(location.to_string(), delay);
        self
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl DataSource for MockSource {
    type Events = MockEvents;

    fn probe_length(&self, source: &SourceDescriptor) -> Result<u64, SourceError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.contains(&source.location) {
            return Err(SourceError::permanent(format!(
                "cannot open {}",
                source.location
            )));
        }
        self.lengths
            .get(&source.location)
            .copied()
            .ok_or_else(|| SourceError::permanent(format!("no such source {}", source.location)))
    }

    fn open(&self, chunk: &Chunk) -> Result<MockEvents, SourceError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let location = &chunk.source.location;

        if let Some(delay) = self.delays.get(location) {
            std::thread::sleep(*delay);
        }

        let key = (location.clone(), chunk.start);
        if self.permanent.contains(&key) {
            return Err(SourceError::permanent(format!(
                "corrupt data in {} at {}",
                location, chunk.start
            )));
        }
        {
            let mut transient = self.transient.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(remaining) = transient.get_mut(&key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(SourceError::transient(format!(
                        "connection reset reading {}",
                        location
                    )));
                }
            }
        }

        Ok(MockEvents {
            location: location.clone(),
            start: chunk.start,
            stop: chunk.stop,
        })
    }
}

/// Accumulator produced by [`MockProcessor`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MockSummary {
    pub items: u64,
    pub sum: f64,
    /// Indices of the chunks that contributed
    pub chunks: BTreeSet<usize>,
}

impl Accumulator for MockSummary {
    fn identity() -> Self {
        Self::default()
    }

    fn merge(self, other: Self) -> Self {
        Self {
            items: self.items + other.items,
            sum: self.sum + other.sum,
            chunks: self.chunks.merge(other.chunks),
        }
    }

    fn approx_eq(&self, other: &Self) -> bool {
        self.items == other.items && approx_eq_f64(self.sum, other.sum) && self.chunks == other.chunks
    }
}

/// Sums [`item_value`] over every item; can be told to fail or panic
#[derive(Debug, Clone, Default)]
pub struct MockProcessor {
    fail_on: BTreeSet<usize>,
    panic_on: BTreeSet<usize>,
    postprocessed: Arc<AtomicUsize>,
}

impl MockProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunk `index` raises a logic error
    pub fn fail_on(mut self, index: usize) -> Self {
        self.fail_on.insert(index);
        self
    }

    /// Chunk `index` panics
    pub fn panic_on(mut self, index: usize) -> Self {
        self.panic_on.insert(index);
        self
    }

    pub fn postprocess_calls(&self) -> usize {
        self.postprocessed.load(Ordering::SeqCst)
    }
}

impl Processor<MockEvents> for MockProcessor {
    type Output = MockSummary;

    fn process(&self, chunk: &Chunk, events: MockEvents) -> Result<MockSummary, ProcessError> {
        if self.panic_on.contains(&chunk.index) {
            panic!("processor blew up on chunk {}", chunk.index);
        }
        if self.fail_on.contains(&chunk.index) {
            return Err(ProcessError::Logic(format!(
                "cannot process chunk {}",
                chunk.index
            )));
        }

        Ok(MockSummary {
            items: events.stop - events.start,
            sum: (events.start..events.stop).map(item_value).sum(),
            chunks: BTreeSet::from([chunk.index]),
        })
    }

    fn postprocess(&self, accumulator: MockSummary) -> MockSummary {
        self.postprocessed.fetch_add(1, Ordering::SeqCst);
        accumulator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(location: &str, start: u64, stop: u64) -> Chunk {
        Chunk {
            index: 0,
            dataset: "A".to_string(),
            source: SourceDescriptor::new(location, None),
            start,
            stop,
            chunk_in_source: 0,
            chunks_in_source: 1,
        }
    }

    #[test]
    fn test_transient_script_runs_out() {
        let source = MockSource::new().with_source("a", 10).fail_transient("a", 0, 2);
        assert!(source.open(&chunk("a", 0, 5)).unwrap_err().is_transient());
        assert!(source.open(&chunk("a", 0, 5)).is_err());
        assert!(source.open(&chunk("a", 0, 5)).is_ok());
        assert!(source.open(&chunk("a", 5, 10)).is_ok());
        assert_eq!(source.open_count(), 4);
    }

    #[test]
    fn test_unavailable_probe() {
        let source = MockSource::new().with_unavailable("gone");
        let err = source
            .probe_length(&SourceDescriptor::new("gone", None))
            .unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(source.probe_count(), 1);
    }

    #[test]
    fn test_processor_summary() {
        let processor = MockProcessor::new().fail_on(3);
        let summary = processor
            .process(
                &chunk("a", 0, 4),
                MockEvents {
                    location: "a".to_string(),
                    start: 0,
                    stop: 4,
                },
            )
            .unwrap();
        assert_eq!(summary.items, 4);
        let expected: f64 = (0..4).map(item_value).sum();
        assert_eq!(summary.sum, expected);
    }
}
