//! Loading and exporting the identity registry.
//!
//! The matcher only ever sees a snapshot; the source of truth lives behind a
//! [`RegistryLoader`]. A JSON file is the loader shipped here.

use crate::types::IdentityEntry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("registry file {path} is malformed: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("duplicate identity id {0} in registry")]
    DuplicateId(u64),
}

/// Source of the full list of identities.
pub trait RegistryLoader: Send + Sync {
    /// Return active identities with their embeddings.
    fn load_active(&self) -> Result<Vec<IdentityEntry>, RegistryError>;
}

/// On-disk registry document.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub identities: Vec<IdentityEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Registry stored as a JSON document. A missing file is an empty registry.
pub struct JsonRegistryFile {
    path: PathBuf,
}

impl JsonRegistryFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every entry, inactive ones included.
    pub fn read_all(&self) -> Result<Vec<IdentityEntry>, RegistryError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %self.path.display(), "registry file missing; treating as empty");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(RegistryError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let file: RegistryFile =
            serde_json::from_str(&raw).map_err(|source| RegistryError::Parse {
                path: self.path.clone(),
                source,
            })?;

        let mut seen = std::collections::HashSet::new();
        for entry in &file.identities {
            if !seen.insert(entry.id) {
                return Err(RegistryError::DuplicateId(entry.id.0));
            }
        }
        Ok(file.identities)
    }

    /// Write `entries` as a registry document, stamped with the export time.
    pub fn write_all(&self, entries: &[IdentityEntry]) -> Result<(), RegistryError> {
        let doc = RegistryFile {
            identities: entries.to_vec(),
            exported_at: Some(chrono::Utc::now()),
        };
        let json = serde_json::to_string_pretty(&doc).map_err(|source| RegistryError::Parse {
            path: self.path.clone(),
            source,
        })?;
        fs::write(&self.path, json).map_err(|source| RegistryError::Io {
            path: self.path.clone(),
            source,
        })?;
        tracing::info!(path = %self.path.display(), identities = entries.len(), "registry exported");
        Ok(())
    }
}

impl RegistryLoader for JsonRegistryFile {
    fn load_active(&self) -> Result<Vec<IdentityEntry>, RegistryError> {
        Ok(self.read_all()?.into_iter().filter(|e| e.active).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, Embedding, IdentityId};

    fn entry(id: u64, active: bool) -> IdentityEntry {
        IdentityEntry {
            id: IdentityId(id),
            display_name: format!("person {id}"),
            category: Category::Resident,
            embedding: Embedding::new(vec![0.1, 0.2, 0.3]),
            active,
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loader = JsonRegistryFile::new(dir.path().join("absent.json"));
        assert!(loader.load_active().unwrap().is_empty());
    }

    #[test]
    fn test_write_then_load_filters_inactive() {
        let dir = tempfile::tempdir().unwrap();
        let loader = JsonRegistryFile::new(dir.path().join("registry.json"));
        loader.write_all(&[entry(1, true), entry(2, false)]).unwrap();

        assert_eq!(loader.read_all().unwrap().len(), 2);
        let active = loader.load_active().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, IdentityId(1));
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = JsonRegistryFile::new(&path).load_active().unwrap_err();
        assert!(matches!(err, RegistryError::Parse { .. }));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let loader = JsonRegistryFile::new(dir.path().join("registry.json"));
        loader.write_all(&[entry(3, true), entry(3, true)]).unwrap();
        assert!(matches!(
            loader.load_active(),
            Err(RegistryError::DuplicateId(3))
        ));
    }
}
