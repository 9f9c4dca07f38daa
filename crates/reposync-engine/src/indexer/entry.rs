//! Filesystem entries as repository object producers.

use chrono::{DateTime, SecondsFormat, Utc};
use reposync_config::ChangeDetection;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use reposync_model::{Metadata, Term, Vocabulary};

use crate::error::{Result, SyncError};
use crate::indexer::IndexOptions;
use crate::producer::ObjectProducer;
use crate::transport::Content;

/// A file or directory inspected during a walk.
#[derive(Debug, Clone)]
pub struct FileEntry {
    path: PathBuf,
    relative: PathBuf,
    is_dir: bool,
    size: u64,
    identifier: String,
    metadata: Metadata,
    upload: bool,
}

impl FileEntry {
    /// Read filesystem facts about `path` and build its candidate metadata.
    ///
    /// `parent` is the canonical id of the container the entry belongs to;
    /// `extra` is whatever a metadata lookup supplied.
    pub fn inspect(
        path: &Path,
        relative: &Path,
        vocabulary: &Vocabulary,
        options: &IndexOptions,
        parent: Option<&str>,
        extra: Option<Metadata>,
    ) -> Result<Self> {
        let stat = fs::metadata(path).map_err(|e| SyncError::io(path, e))?;
        let is_dir = stat.is_dir();
        let size = if is_dir { 0 } else { stat.len() };
        let identifier = path_identifier(&options.identifier_namespace, relative);

        let mut metadata = extra.unwrap_or_default();
        metadata.insert(&vocabulary.identifier_property, Term::iri(&identifier));
        if !metadata.has_property(&vocabulary.title_property) {
            let title = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| relative.display().to_string());
            metadata.insert(&vocabulary.title_property, Term::literal(title));
        }
        metadata.set(
            &vocabulary.location_property,
            [Term::literal(path.display().to_string())],
        );
        if let Some(parent) = parent {
            metadata.set(&vocabulary.parent_property, [Term::iri(parent)]);
        }

        if !is_dir {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            metadata.set(
                &vocabulary.mime_type_property,
                [Term::literal(mime.essence_str())],
            );
            metadata.set(
                &vocabulary.size_property,
                [Term::typed_literal(
                    size.to_string(),
                    "http://www.w3.org/2001/XMLSchema#long",
                )],
            );
            if let Ok(modified) = stat.modified() {
                let modified: DateTime<Utc> = modified.into();
                metadata.set(
                    &vocabulary.modified_property,
                    [Term::typed_literal(
                        modified.to_rfc3339_opts(SecondsFormat::Nanos, true),
                        "http://www.w3.org/2001/XMLSchema#dateTime",
                    )],
                );
            }
            if options.change_detection == ChangeDetection::Digest {
                metadata.set(
                    &vocabulary.digest_property,
                    [Term::literal(file_digest(path)?)],
                );
            }
        }

        let upload = !is_dir
            && options
                .upload_threshold_bytes
                .map_or(true, |limit| size <= limit);

        Ok(Self {
            path: path.to_path_buf(),
            relative: relative.to_path_buf(),
            is_dir,
            size,
            identifier,
            metadata,
            upload,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn relative(&self) -> &Path {
        &self.relative
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Candidate metadata for the object.
    pub fn candidate(&self) -> &Metadata {
        &self.metadata
    }

    /// Whether binary content is uploaded, as opposed to metadata only.
    pub fn uploads_content(&self) -> bool {
        self.upload
    }
}

impl ObjectProducer for FileEntry {
    fn id(&self) -> String {
        self.identifier.clone()
    }

    fn metadata(&self) -> Result<Metadata> {
        Ok(self.metadata.clone())
    }

    fn binary(&self) -> Result<Option<Content>> {
        if !self.upload {
            return Ok(None);
        }
        let bytes = fs::read(&self.path).map_err(|e| SyncError::io(&self.path, e))?;
        let mime_type = mime_guess::from_path(&self.path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Ok(Some(Content { bytes, mime_type }))
    }
}

/// Identifier derived from the path relative to the walk root.
pub fn path_identifier(namespace: &str, relative: &Path) -> String {
    let segments: Vec<String> = relative
        .components()
        .map(|c| urlencoding::encode(&c.as_os_str().to_string_lossy()).into_owned())
        .collect();
    format!("{}{}", namespace, segments.join("/"))
}

/// `blake3:<hex>` digest of a file's content.
pub fn file_digest(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| SyncError::io(path, e))?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher).map_err(|e| SyncError::io(path, e))?;
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}
