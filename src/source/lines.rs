//! Line-oriented text files as a data source
//!
//! Every line of a file is one item. Text files have no inner tables, so a
//! tree name on the source descriptor is carried through but not used.
//! Bytes that are not valid UTF-8 are replaced with U+FFFD rather than
//! failing the chunk, so processors see them as ordinary malformed text.

use super::{DataSource, SourceError};
use crate::plan::{Chunk, SourceDescriptor};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::trace;

/// Lines between two recorded byte offsets in the line index
pub const LINE_INDEX_STRIDE: u64 = 1024;

/// Lines `[first_line, first_line + lines.len())` of one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEvents {
    pub first_line: u64,
    pub lines: Vec<String>,
}

/// Reads sources as local text files, resolving relative locations
/// against an optional root directory.
///
/// `probe_length` records the byte offset of every
/// [`LINE_INDEX_STRIDE`]th line, and `open` seeks to the closest recorded
/// offset before its first line. Reading a chunk therefore costs at most
/// `LINE_INDEX_STRIDE` skipped lines plus the chunk itself. A file opened
/// without a prior probe on this source (or a clone of it) is scanned from
/// the start.
#[derive(Debug, Clone, Default)]
pub struct LineFileSource {
    root: Option<PathBuf>,
    index: Arc<RwLock<HashMap<PathBuf, Arc<Vec<u64>>>>>,
}

impl LineFileSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Self::default()
        }
    }

    fn resolve(&self, location: &str) -> PathBuf {
        let path = Path::new(location);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn reader(&self, path: &Path) -> Result<BufReader<File>, SourceError> {
        File::open(path)
            .map(BufReader::new)
            .map_err(|e| SourceError::from_io(&format!("opening {}", path.display()), &e))
    }

    /// Closest indexed `(line, byte offset)` at or before `line`
    fn checkpoint(&self, path: &Path, line: u64) -> (u64, u64) {
        let index = self.index.read().unwrap_or_else(|e| e.into_inner());
        let Some(offsets) = index.get(path) else {
            return (0, 0);
        };
        let slot = ((line / LINE_INDEX_STRIDE) as usize).min(offsets.len().saturating_sub(1));
        match offsets.get(slot) {
            Some(&offset) => (slot as u64 * LINE_INDEX_STRIDE, offset),
            None => (0, 0),
        }
    }
}

/// Read one raw line into `buf`; `Ok(false)` at end of file
fn read_raw_line<R: BufRead>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    location: &str,
) -> Result<bool, SourceError> {
    buf.clear();
    let read = reader
        .read_until(b'\n', buf)
        .map_err(|e| SourceError::from_io(&format!("reading {location}"), &e))?;
    Ok(read > 0)
}

fn decode_line(mut raw: &[u8]) -> String {
    if let Some(rest) = raw.strip_suffix(b"\n") {
        raw = rest;
        if let Some(rest) = raw.strip_suffix(b"\r") {
            raw = rest;
        }
    }
    String::from_utf8_lossy(raw).into_owned()
}

impl DataSource for LineFileSource {
    type Events = LineEvents;

    fn probe_length(&self, source: &SourceDescriptor) -> Result<u64, SourceError> {
        let path = self.resolve(&source.location);
        let mut reader = self.reader(&path)?;
        let mut buf = Vec::new();
        let mut offsets = Vec::new();
        let mut position = 0u64;
        let mut count = 0;
        loop {
            if count % LINE_INDEX_STRIDE == 0 {
                offsets.push(position);
            }
            if !read_raw_line(&mut reader, &mut buf, &source.location)? {
                break;
            }
            position += buf.len() as u64;
            count += 1;
        }

        self.index
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path, Arc::new(offsets));
        Ok(count)
    }

    fn open(&self, chunk: &Chunk) -> Result<LineEvents, SourceError> {
        let location = &chunk.source.location;
        let path = self.resolve(location);
        let mut reader = self.reader(&path)?;
        let wanted = chunk.len() as usize;

        let (mut line, offset) = self.checkpoint(&path, chunk.start);
        if offset > 0 {
            reader
                .seek(SeekFrom::Start(offset))
                .map_err(|e| SourceError::from_io(&format!("seeking in {location}"), &e))?;
        }
        trace!("Opening {} at line {} (byte {})", location, line, offset);

        let mut buf = Vec::new();
        let mut exhausted = false;
        while line < chunk.start {
            if !read_raw_line(&mut reader, &mut buf, location)? {
                exhausted = true;
                break;
            }
            line += 1;
        }

        let mut lines = Vec::with_capacity(wanted);
        while !exhausted && lines.len() < wanted {
            if !read_raw_line(&mut reader, &mut buf, location)? {
                break;
            }
            lines.push(decode_line(&buf));
        }

        if lines.len() != wanted {
            return Err(SourceError::permanent(format!(
                "{} shrank: expected {} lines from offset {}, found {}",
                location,
                wanted,
                chunk.start,
                lines.len()
            )));
        }

        Ok(LineEvents {
            first_line: chunk.start,
            lines,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use tempfile::TempDir;

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
    fn test_probe_counts_lines_including_unterminated_last() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "1\n2\n3").unwrap();

        let source = LineFileSource::with_root(dir.path());
        let length = source
            .probe_length(&SourceDescriptor::new("a.txt", None))
            .unwrap();
        assert_eq!(length, 3);
    }

    #[test]
    fn test_open_returns_requested_range() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "l0\nl1\nl2\nl3\nl4\n").unwrap();

        let source = LineFileSource::with_root(dir.path());
        let events = source.open(&chunk("a.txt", 1, 4)).unwrap();
        assert_eq!(events.first_line, 1);
        assert_eq!(events.lines, vec!["l1", "l2", "l3"]);
    }

    #[test]
    fn test_missing_file_is_permanent() {
        let dir = TempDir::new().unwrap();
        let source = LineFileSource::with_root(dir.path());
        let err = source
            .probe_length(&SourceDescriptor::new("absent.txt", None))
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Permanent);
    }

    #[test]
    fn test_truncated_file_is_reported() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "only\n").unwrap();

        let source = LineFileSource::with_root(dir.path());
        let err = source.open(&chunk("a.txt", 0, 3)).unwrap_err();
        assert!(err.message.contains("shrank"));
    }

    #[test]
    fn test_invalid_utf8_is_replaced_not_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x 1\ny \xff\xfe 5\r\nz 2\n").unwrap();

        let source = LineFileSource::with_root(dir.path());
        let length = source
            .probe_length(&SourceDescriptor::new("a.txt", None))
            .unwrap();
        assert_eq!(length, 3);

        let events = source.open(&chunk("a.txt", 0, 3)).unwrap();
        assert_eq!(events.lines[0], "x 1");
        assert_eq!(events.lines[1], "y \u{fffd}\u{fffd} 5");
        assert_eq!(events.lines[2], "z 2");
    }

    #[test]
    fn test_open_seeks_past_indexed_lines() {
        let dir = TempDir::new().unwrap();
        let total = LINE_INDEX_STRIDE * 3 + 17;
        let content: String = (0..total).map(|n| format!("line{n}\n")).collect();
        std::fs::write(dir.path().join("big.txt"), content).unwrap();

        let source = LineFileSource::with_root(dir.path());
        let length = source
            .probe_length(&SourceDescriptor::new("big.txt", None))
            .unwrap();
        assert_eq!(length, total);

        let start = LINE_INDEX_STRIDE * 2 + 5;
        let indexed = source.open(&chunk("big.txt", start, start + 3)).unwrap();
        assert_eq!(
            indexed.lines,
            vec![
                format!("line{start}"),
                format!("line{}", start + 1),
                format!("line{}", start + 2)
            ]
        );

        // A fresh source has no index and scans from the start
        let unindexed = LineFileSource::with_root(dir.path())
            .open(&chunk("big.txt", start, start + 3))
            .unwrap();
        assert_eq!(indexed, unindexed);

        let tail = source.open(&chunk("big.txt", total - 2, total)).unwrap();
        assert_eq!(tail.lines, vec![format!("line{}", total - 2), format!("line{}", total - 1)]);
    }
}
