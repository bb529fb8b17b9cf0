use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::error::HemlockError;

/// Graph artifact: `{entities, relations}`.
pub const GRAPH_DATA: &str = "graph_data.json";
/// Pairs whose extraction failed, for later inspection or re-runs.
pub const FAILED_QUERIES: &str = "failed_queries.json";
/// Base-text artifact: theme -> BaseText.
pub const POISON_TEXTS: &str = "poison_texts.json";
/// Enhanced-text artifact: theme -> EnhancedText.
pub const ENHANCED_POISON_TEXTS: &str = "enhanced_poison_texts.json";
/// Merged artifact, structured encoding: theme -> MergedRecord.
pub const MERGED_POISON_TEXTS_JSON: &str = "merged_poison_texts.json";
/// Merged artifact, human-readable encoding.
pub const MERGED_POISON_TEXTS_TXT: &str = "merged_poison_texts.txt";

/// Durable storage for stage artifacts: pretty-printed UTF-8 JSON files in
/// one output directory. Every stage reads its inputs and writes its output
/// through this store, so stages can run and resume independently.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).exists()
    }

    /// Fail with `MissingDependency` if a required upstream artifact is absent.
    pub fn require(&self, name: &str) -> Result<(), HemlockError> {
        if self.exists(name) {
            Ok(())
        } else {
            Err(HemlockError::MissingDependency {
                artifact: self.path(name).display().to_string(),
            })
        }
    }

    pub fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<T, HemlockError> {
        let path = self.path(name);
        let bytes = fs::read(&path).map_err(|e| {
            HemlockError::Persistence(format!("failed to read {}: {e}", path.display()))
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            HemlockError::Persistence(format!("failed to parse {}: {e}", path.display()))
        })
    }

    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<(), HemlockError> {
        self.ensure_dir()?;
        let path = self.path(name);
        let json = serde_json::to_string_pretty(value).map_err(|e| {
            HemlockError::Persistence(format!("failed to serialize {}: {e}", path.display()))
        })?;
        fs::write(&path, json).map_err(|e| {
            HemlockError::Persistence(format!("failed to write {}: {e}", path.display()))
        })?;
        info!(path = %path.display(), "Artifact written");
        Ok(())
    }

    pub fn write_text(&self, name: &str, text: &str) -> Result<(), HemlockError> {
        self.ensure_dir()?;
        let path = self.path(name);
        fs::write(&path, text).map_err(|e| {
            HemlockError::Persistence(format!("failed to write {}: {e}", path.display()))
        })?;
        info!(path = %path.display(), "Artifact written");
        Ok(())
    }

    pub fn read_text(&self, name: &str) -> Result<String, HemlockError> {
        let path = self.path(name);
        fs::read_to_string(&path).map_err(|e| {
            HemlockError::Persistence(format!("failed to read {}: {e}", path.display()))
        })
    }

    fn ensure_dir(&self) -> Result<(), HemlockError> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            HemlockError::Persistence(format!(
                "failed to create output directory {}: {e}",
                self.dir.display()
            ))
        })
    }
}
