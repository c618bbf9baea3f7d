//! Test doubles and fixtures
//!
//! [`MockSource`] and [`MockProcessor`] script failures, delays and
//! deterministic per-item values so runner behaviour can be asserted
//! exactly. [`LineFixture`] lays out real line files in a temporary
//! directory for [`LineFileSource`](crate::source::LineFileSource) tests.

mod mocks;

pub use mocks::{item_value, MockEvents, MockProcessor, MockSource, MockSummary};

use crate::plan::{Dataset, Fileset, FilesetError};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Line files grouped into datasets under one temporary directory
pub struct LineFixture {
    dir: TempDir,
    datasets: Vec<Dataset>,
}

impl LineFixture {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            dir: TempDir::new()?,
            datasets: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `lines` to `name` and append the file to `dataset`
    pub fn add_file<I, L>(&mut self, dataset: &str, name: &str, lines: I) -> io::Result<PathBuf>
    where
        I: IntoIterator<Item = L>,
        L: AsRef<str>,
    {
        let mut content = String::new();
        for line in lines {
            content.push_str(line.as_ref());
            content.push('\n');
        }
        self.add_raw_file(dataset, name, content.as_bytes())
    }

    /// Write `content` verbatim, for files that are not valid UTF-8
    pub fn add_raw_file(&mut self, dataset: &str, name: &str, content: &[u8]) -> io::Result<PathBuf> {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content)?;

        let location = path.to_string_lossy().into_owned();
        match self.datasets.iter_mut().find(|d| d.name == dataset) {
            Some(existing) => existing.files.push(location),
            None => self.datasets.push(Dataset::new(dataset, [location])),
        }
        Ok(path)
    }

    /// A file of `count` lines `row<n> <n>`, so column 1 holds `0..count`
    pub fn add_numbered_file(&mut self, dataset: &str, name: &str, count: usize) -> io::Result<PathBuf> {
        self.add_file(dataset, name, (0..count).map(|n| format!("row{} {}", n, n)))
    }

    pub fn fileset(&self) -> Result<Fileset, FilesetError> {
        Fileset::new(self.datasets.clone())
    }

    /// Serialize the fileset as YAML next to the data files
    pub fn write_fileset(&self, name: &str) -> io::Result<PathBuf> {
        let fileset = self
            .fileset()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        let yaml = serde_yaml::to_string(&fileset)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        let path = self.dir.path().join(name);
        std::fs::write(&path, yaml)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_builds_fileset() {
        let mut fixture = LineFixture::new().unwrap();
        fixture.add_numbered_file("A", "a1.txt", 3).unwrap();
        fixture.add_numbered_file("B", "b1.txt", 2).unwrap();
        fixture.add_numbered_file("A", "a2.txt", 1).unwrap();

        let fileset = fixture.fileset().unwrap();
        assert_eq!(fileset.len(), 2);
        assert_eq!(fileset.get("A").unwrap().files.len(), 2);

        let path = fixture.write_fileset("fileset.yaml").unwrap();
        assert_eq!(Fileset::from_path(&path).unwrap(), fileset);
    }
}
