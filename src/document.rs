use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Represents a retrievable record with its content and metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier, stable across ingestion runs
    pub id: String,
    /// Text content handed to the embedding function
    pub content: String,
    /// Free-form metadata stored next to the content
    pub metadata: Map<String, Value>,
}

impl Record {
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> Self {
        Record {
            id: id.into(),
            content: content.into(),
            metadata,
        }
    }

    /// Read a metadata field as a string, if present
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Kinds of non-tabular source files that are wrapped into records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Jupyter notebook, stored verbatim
    Notebook,
    /// Trained Keras model, stored as a placeholder description
    KerasModel,
}

impl ArtifactKind {
    pub const EXTENSIONS: [&'static str; 2] = ["ipynb", "h5"];

    /// Detect the artifact kind from a file extension. Matching is case-sensitive.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        match path.as_ref().extension()?.to_str()? {
            "ipynb" => Some(ArtifactKind::Notebook),
            "h5" => Some(ArtifactKind::KerasModel),
            _ => None,
        }
    }

    /// Type tag written into the record metadata
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Notebook => "notebook",
            ArtifactKind::KerasModel => "keras_model",
        }
    }
}

/// Get the bare file name of a path as an owned string
pub fn file_name<P: AsRef<Path>>(path: P) -> Result<String> {
    let name = path
        .as_ref()
        .file_name()
        .context("Invalid file name")?
        .to_str()
        .context("Invalid file name encoding")?
        .to_string();
    Ok(name)
}

/// List the files directly inside `dir` whose extension is exactly one of `extensions`.
///
/// Subdirectories are not descended into and extensions are compared
/// case-sensitively. Files come back sorted by name so that repeated runs see
/// them in the same order.
pub fn source_files<P: AsRef<Path>>(dir: P, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut files = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry
            .with_context(|| format!("Failed to read source directory: {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| extensions.contains(&ext))
            .unwrap_or(false);
        if matches {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}

/// Build a record for a single artifact file.
///
/// Returns `Ok(None)` for files that are not a supported artifact kind.
pub fn load_artifact<P: AsRef<Path>>(file_path: P) -> Result<Option<Record>> {
    let path = file_path.as_ref();
    let Some(kind) = ArtifactKind::from_path(path) else {
        debug!("Skipping unsupported file: {}", path.display());
        return Ok(None);
    };
    let name = file_name(path)?;

    let content = match kind {
        ArtifactKind::Notebook => {
            info!("Processing notebook: {}", path.display());
            fs::read_to_string(path)
                .with_context(|| format!("Failed to read notebook: {}", path.display()))?
        }
        // The binary payload is never embedded
        ArtifactKind::KerasModel => {
            info!("Registering model file: {}", path.display());
            format!("Keras model file: {}", name)
        }
    };

    let mut metadata = Map::new();
    metadata.insert("id".to_string(), json!(name));
    metadata.insert("type".to_string(), json!(kind.as_str()));
    metadata.insert("filename".to_string(), json!(name));
    metadata.insert("path".to_string(), json!(path.display().to_string()));

    Ok(Some(Record::new(name, content, metadata)))
}

/// Load every notebook and model file found in the source directory
pub fn load_artifact_records<P: AsRef<Path>>(source_dir: P) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    for path in source_files(source_dir, &ArtifactKind::EXTENSIONS)? {
        if let Some(record) = load_artifact(&path)? {
            records.push(record);
        }
    }
    Ok(records)
}
