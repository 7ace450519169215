//! JSON files handed from one pipeline stage to the next.

use crate::IngestError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn extracted_text(&self) -> PathBuf {
        self.root.join("extracted_text.json")
    }

    pub fn chunks(&self) -> PathBuf {
        self.root.join("chunks.json")
    }

    pub fn chunks_with_embeddings(&self) -> PathBuf {
        self.root.join("chunks_with_embeddings.json")
    }

    pub fn document_analysis(&self) -> PathBuf {
        self.root.join("complete_document_analysis.json")
    }

    pub fn raw_analysis_response(&self) -> PathBuf {
        self.root.join("raw_response.txt")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    pub fn images_metadata(&self) -> PathBuf {
        self.root.join("images_metadata.json")
    }

    pub fn images_with_context(&self) -> PathBuf {
        self.root.join("images_with_context.json")
    }
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), IngestError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let encoded = serde_json::to_string_pretty(value)?;
    fs::write(path, encoded)?;
    debug!(path = %path.display(), "artifact written");
    Ok(())
}

/// Reads an artifact that an earlier stage must have produced.
pub fn read_required<T: DeserializeOwned>(path: &Path) -> Result<T, IngestError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            return Err(IngestError::MissingArtifact(path.to_path_buf()));
        }
        Err(error) => return Err(error.into()),
    };
    Ok(serde_json::from_str(&raw)?)
}

/// Reads an optional artifact; only a missing file yields the default.
pub fn read_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T, IngestError> {
    match read_required(path) {
        Err(IngestError::MissingArtifact(missing)) => {
            debug!(path = %missing.display(), "optional artifact missing, using default");
            Ok(T::default())
        }
        other => other,
    }
}
