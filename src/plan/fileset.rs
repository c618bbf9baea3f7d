//! Named datasets and their source locations

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilesetError {
    #[error("Duplicate dataset name: {0}")]
    DuplicateDataset(String),

    #[error("Failed to read fileset {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse fileset {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// A named, ordered collection of source locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dataset {
    pub name: String,
    pub files: Vec<String>,
    /// Default tree/table name for every file of the dataset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub treename: Option<String>,
    /// Free-form metadata carried alongside the dataset
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Dataset {
    pub fn new<I, S>(name: impl Into<String>, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            files: files.into_iter().map(Into::into).collect(),
            treename: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_treename(mut self, treename: impl Into<String>) -> Self {
        self.treename = Some(treename.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Datasets in insertion order; names are unique
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fileset {
    datasets: Vec<Dataset>,
}

impl Fileset {
    pub fn new(datasets: impl IntoIterator<Item = Dataset>) -> Result<Self, FilesetError> {
        let mut fileset = Self::default();
        for dataset in datasets {
            fileset.push(dataset)?;
        }
        Ok(fileset)
    }

    /// Append a dataset, rejecting duplicate names
    pub fn push(&mut self, dataset: Dataset) -> Result<(), FilesetError> {
        if self.get(&dataset.name).is_some() {
            return Err(FilesetError::DuplicateDataset(dataset.name));
        }
        self.datasets.push(dataset);
        Ok(())
    }

    pub fn datasets(&self) -> &[Dataset] {
        &self.datasets
    }

    pub fn get(&self, name: &str) -> Option<&Dataset> {
        self.datasets.iter().find(|d| d.name == name)
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    /// Total number of source locations across all datasets
    pub fn source_count(&self) -> usize {
        self.datasets.iter().map(|d| d.files.len()).sum()
    }

    /// Load a fileset from a YAML or JSON document, chosen by extension
    pub fn from_path(path: &Path) -> Result<Self, FilesetError> {
        let content = std::fs::read_to_string(path).map_err(|source| FilesetError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let parsed = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content).map_err(|e| e.to_string()),
            _ => serde_yaml::from_str(&content).map_err(|e| e.to_string()),
        };

        parsed.map_err(|message| FilesetError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }
}

/// Accepted per-dataset shapes: a bare list of files, or a detailed mapping
#[derive(Deserialize)]
#[serde(untagged)]
enum DatasetSpec {
    Files(Vec<String>),
    Detailed {
        files: Vec<String>,
        #[serde(default)]
        treename: Option<String>,
        #[serde(default)]
        metadata: BTreeMap<String, String>,
    },
}

impl DatasetSpec {
    fn into_dataset(self, name: String) -> Dataset {
        match self {
            DatasetSpec::Files(files) => Dataset::new(name, files),
            DatasetSpec::Detailed {
                files,
                treename,
                metadata,
            } => Dataset {
                name,
                files,
                treename,
                metadata,
            },
        }
    }
}

impl<'de> Deserialize<'de> for Fileset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FilesetVisitor;

        impl<'de> Visitor<'de> for FilesetVisitor {
            type Value = Fileset;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of dataset names to file lists")
            }

            fn visit_map<M: MapAccess<'de>>(self, mut map: M) -> Result<Fileset, M::Error> {
                let mut fileset = Fileset::default();
                let mut seen = HashSet::new();
                while let Some((name, spec)) = map.next_entry::<String, DatasetSpec>()? {
                    if !seen.insert(name.clone()) {
                        return Err(de::Error::custom(FilesetError::DuplicateDataset(name)));
                    }
                    fileset.datasets.push(spec.into_dataset(name));
                }
                Ok(fileset)
            }
        }

        deserializer.deserialize_map(FilesetVisitor)
    }
}

impl Serialize for Fileset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Entry<'a> {
            files: &'a [String],
            #[serde(skip_serializing_if = "Option::is_none")]
            treename: Option<&'a str>,
            #[serde(skip_serializing_if = "no_metadata")]
            metadata: &'a BTreeMap<String, String>,
        }

        fn no_metadata(metadata: &&BTreeMap<String, String>) -> bool {
            metadata.is_empty()
        }

        let mut map = serializer.serialize_map(Some(self.datasets.len()))?;
        for dataset in &self.datasets {
            map.serialize_entry(
                &dataset.name,
                &Entry {
                    files: &dataset.files,
                    treename: dataset.treename.as_deref(),
                    metadata: &dataset.metadata,
                },
            )?;
        }
        map.end()
    }
}
