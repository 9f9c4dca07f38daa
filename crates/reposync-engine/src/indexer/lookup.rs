//! External metadata for filesystem entries.

use anyhow::Context;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use reposync_model::{Metadata, Term};

use crate::error::{Result, SyncError};

/// Supplies metadata for a path from somewhere other than the file itself.
pub trait MetadataLookup: Send + Sync {
    /// Metadata for `path`, or `None` when there is none.
    ///
    /// May fail with [`SyncError::MetadataMissing`] when the source insists
    /// on metadata being present.
    fn lookup(&self, path: &Path) -> Result<Option<Metadata>>;

    /// Files that only exist to carry metadata and are not indexed
    /// themselves.
    fn is_auxiliary(&self, _path: &Path) -> bool {
        false
    }
}

/// Never supplies anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMetadata;

impl MetadataLookup for NoMetadata {
    fn lookup(&self, _path: &Path) -> Result<Option<Metadata>> {
        Ok(None)
    }
}

/// Reads `<file><suffix>` JSON documents next to each file.
///
/// The document is an object keyed by property URI. Values are strings
/// (literals), `{"@id": "..."}` objects (references), or arrays of either;
/// numbers and booleans become literals.
#[derive(Debug, Clone)]
pub struct SidecarLookup {
    suffix: String,
    required: bool,
}

impl SidecarLookup {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
            required: false,
        }
    }

    /// Fail files without a sidecar instead of indexing them bare.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn sidecar_path(&self, path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(&self.suffix);
        PathBuf::from(name)
    }
}

impl MetadataLookup for SidecarLookup {
    fn lookup(&self, path: &Path) -> Result<Option<Metadata>> {
        let sidecar = self.sidecar_path(path);
        if !sidecar.is_file() {
            if self.required && !path.is_dir() {
                return Err(SyncError::MetadataMissing(path.to_path_buf()));
            }
            return Ok(None);
        }

        let text = fs::read_to_string(&sidecar).map_err(|e| SyncError::io(&sidecar, e))?;
        let document: Value = serde_json::from_str(&text)
            .with_context(|| format!("Invalid sidecar metadata in {}", sidecar.display()))?;
        let Value::Object(properties) = document else {
            return Err(anyhow::anyhow!(
                "Sidecar {} is not a JSON object",
                sidecar.display()
            )
            .into());
        };

        let mut metadata = Metadata::new();
        for (property, value) in properties {
            collect_terms(&property, value, &mut metadata);
        }
        Ok(Some(metadata))
    }

    fn is_auxiliary(&self, path: &Path) -> bool {
        path.file_name()
            .map(|name| name.to_string_lossy().ends_with(&self.suffix))
            .unwrap_or(false)
    }
}

fn collect_terms(property: &str, value: Value, metadata: &mut Metadata) {
    match value {
        Value::Null => {}
        Value::String(s) => {
            metadata.insert(property, Term::literal(s));
        }
        Value::Bool(b) => {
            metadata.insert(property, Term::literal(b.to_string()));
        }
        Value::Number(n) => {
            metadata.insert(property, Term::literal(n.to_string()));
        }
        Value::Array(items) => {
            for item in items {
                collect_terms(property, item, metadata);
            }
        }
        Value::Object(map) => match map.get("@id").and_then(Value::as_str) {
            Some(iri) => {
                metadata.insert(property, Term::iri(iri));
            }
            None => {
                if let Some(literal) = map.get("@value").and_then(Value::as_str) {
                    metadata.insert(property, Term::literal(literal));
                }
            }
        },
    }
}
