//! Versioned synchronization of a directory tree into the repository.
//!
//! Every entry maps to one object identified by its path. Existing objects
//! are updated in place, or, when their content changed and versioning is
//! on, superseded by a new object that takes over their external
//! identifiers.

pub mod entry;
pub mod filter;
pub mod lookup;

use anyhow::Context;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use reposync_config::{ChangeDetection, IndexSettings, MissingMetadataPolicy};
use reposync_model::{IdentifierClass, Metadata, RepositoryObject, Term, Vocabulary};

use crate::error::{Result, SyncError};
use crate::merge::{MergePolicy, MetadataMerge, MetadataPatch};
use crate::producer::ObjectProducer;
use crate::session::{Lookup, RepositorySession};
use crate::transport::CreateRequest;

pub use entry::FileEntry;
pub use filter::EntryFilter;
pub use lookup::{MetadataLookup, NoMetadata, SidecarLookup};

/// Configuration for a tree walk
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Levels below the root that are visited
    pub max_depth: usize,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Attach every descendant to the root instead of mirroring directories
    pub flat: bool,
    pub versioning: bool,
    pub change_detection: ChangeDetection,
    /// Files above this size are created without content
    pub upload_threshold_bytes: Option<u64>,
    /// Files without looked-up metadata count as missing metadata
    pub require_metadata: bool,
    pub on_missing_metadata: MissingMetadataPolicy,
    /// Move persistent identifiers to the new version as well
    pub migrate_persistent_ids: bool,
    /// Prefix of identifiers derived from relative paths
    pub identifier_namespace: String,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self::from(&IndexSettings::default())
    }
}

impl From<&IndexSettings> for IndexOptions {
    fn from(settings: &IndexSettings) -> Self {
        Self {
            max_depth: settings.max_depth,
            include: settings.include.clone(),
            exclude: settings.exclude.clone(),
            flat: settings.flat,
            versioning: settings.versioning,
            change_detection: settings.change_detection,
            upload_threshold_bytes: settings.upload_threshold_bytes,
            require_metadata: settings.require_metadata,
            on_missing_metadata: settings.on_missing_metadata,
            migrate_persistent_ids: settings.migrate_persistent_ids,
            identifier_namespace: settings.identifier_namespace.clone(),
        }
    }
}

/// An object and the new version that superseded it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionLink {
    pub old: RepositoryObject,
    pub new: RepositoryObject,
}

/// Outcome of one tree walk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexReport {
    /// URIs of objects created for entries seen for the first time
    pub created: Vec<String>,
    /// URIs of objects whose metadata changed in place
    pub updated: Vec<String>,
    pub versioned: Vec<VersionLink>,
    /// URIs of objects that needed no write
    pub unchanged: Vec<String>,
    /// Relative paths skipped for missing metadata
    pub skipped: Vec<String>,
}

/// The container entries of one directory are attached to.
#[derive(Debug, Clone)]
struct Container {
    uri: String,
    canonical_id: String,
}

impl From<&RepositoryObject> for Container {
    fn from(object: &RepositoryObject) -> Self {
        Self {
            uri: object.uri.clone(),
            canonical_id: object.canonical_id.clone(),
        }
    }
}

/// Walks a directory tree and mirrors it into the repository.
pub struct VersionedIndexer {
    vocabulary: Vocabulary,
    options: IndexOptions,
    filter: EntryFilter,
    lookup: Box<dyn MetadataLookup>,
    merge: MetadataMerge,
}

impl VersionedIndexer {
    pub fn new(vocabulary: &Vocabulary, options: IndexOptions) -> Result<Self> {
        let filter = EntryFilter::new(&options.include, &options.exclude)?;
        let merge = MetadataMerge::new(vocabulary).with_protected([
            vocabulary.newer_version_property.clone(),
            vocabulary.older_version_property.clone(),
        ]);
        Ok(Self {
            vocabulary: vocabulary.clone(),
            options,
            filter,
            lookup: Box::new(NoMetadata),
            merge,
        })
    }

    /// Indexer reading sidecar metadata with the configured suffix.
    pub fn from_settings(vocabulary: &Vocabulary, settings: &IndexSettings) -> Result<Self> {
        Ok(Self::new(vocabulary, IndexOptions::from(settings))?
            .with_lookup(SidecarLookup::new(settings.sidecar_suffix.clone())))
    }

    pub fn with_lookup(mut self, lookup: impl MetadataLookup + 'static) -> Self {
        self.lookup = Box::new(lookup);
        self
    }

    /// Index everything below `root`, attaching top-level entries to
    /// `parent` (the repository root when `None`).
    pub async fn index(
        &self,
        session: &mut RepositorySession,
        root: &Path,
        parent: Option<&RepositoryObject>,
    ) -> Result<IndexReport> {
        if !root.is_dir() {
            return Err(SyncError::io(
                root,
                std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
            ));
        }
        info!("Indexing {}", root.display());

        let mut report = IndexReport::default();
        let mut stack: Vec<(PathBuf, Option<Container>, usize)> =
            vec![(root.to_path_buf(), parent.map(Container::from), 0)];

        while let Some((dir, container, depth)) = stack.pop() {
            let mut subdirs = Vec::new();

            for child in list_children(&dir)? {
                let relative = child.strip_prefix(root).unwrap_or(&child).to_path_buf();
                let is_dir = child.is_dir();

                if self.lookup.is_auxiliary(&child) || !self.filter.allows(&relative, is_dir) {
                    debug!("Filtered out {}", relative.display());
                    continue;
                }

                if is_dir && self.options.flat {
                    if depth + 1 < self.options.max_depth {
                        subdirs.push((child, container.clone(), depth + 1));
                    }
                    continue;
                }

                let object = self
                    .index_entry(session, &child, &relative, container.as_ref(), &mut report)
                    .await?;

                if let Some(object) = object {
                    if is_dir && depth + 1 < self.options.max_depth {
                        subdirs.push((child, Some(Container::from(&object)), depth + 1));
                    }
                }

                session.checkpoint().await?;
            }

            stack.extend(subdirs.into_iter().rev());
        }

        info!(
            "Indexed {}: {} created, {} updated, {} versioned, {} unchanged, {} skipped",
            root.display(),
            report.created.len(),
            report.updated.len(),
            report.versioned.len(),
            report.unchanged.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Create, update or version the object for one entry.
    async fn index_entry(
        &self,
        session: &mut RepositorySession,
        path: &Path,
        relative: &Path,
        container: Option<&Container>,
        report: &mut IndexReport,
    ) -> Result<Option<RepositoryObject>> {
        let is_dir = path.is_dir();
        let extra = match self.lookup.lookup(path) {
            Ok(Some(metadata)) => Some(metadata),
            Ok(None) if self.options.require_metadata && !is_dir => {
                return self.missing_metadata(path, relative, report)
            }
            Ok(None) => None,
            Err(SyncError::MetadataMissing(_)) => {
                return self.missing_metadata(path, relative, report)
            }
            Err(e) => return Err(e),
        };

        let entry = FileEntry::inspect(
            path,
            relative,
            &self.vocabulary,
            &self.options,
            container.map(|c| c.canonical_id.as_str()),
            extra,
        )?;
        let ids = vec![entry.identifier().to_string()];
        let parent_uri = container.map(|c| c.uri.as_str());

        let current = match session.lookup(&ids).await? {
            Lookup::NotFound => {
                let object = session.create_from(&entry, parent_uri).await?;
                info!("Created {} for {}", object.uri, relative.display());
                report.created.push(object.uri.clone());
                return Ok(Some(object));
            }
            Lookup::Found(object) => object,
            Lookup::Ambiguous(candidates) => {
                return Err(SyncError::AmbiguousMatch {
                    identifiers: ids,
                    candidates: candidates.into_iter().map(|o| o.uri).collect(),
                })
            }
        };

        let changed = !is_dir && self.content_changed(&current, &entry);
        if changed && self.options.versioning {
            let link = self.create_version(session, &current, &entry, parent_uri).await?;
            let new = link.new.clone();
            report.versioned.push(link);
            return Ok(Some(new));
        }

        let patch = self
            .merge
            .plan(MergePolicy::DiffUpdate, &current.metadata, entry.candidate());
        let content = if changed { entry.binary()? } else { None };
        if patch.is_empty() && content.is_none() {
            debug!("{} is unchanged", relative.display());
            report.unchanged.push(current.uri.clone());
            return Ok(Some(current));
        }

        let mut updated = session.apply_patch(&current.uri, &patch).await?;
        if let Some(content) = content {
            updated = session.replace_content(&current.uri, &content).await?;
        }
        debug!("Updated {} in place", updated.uri);
        report.updated.push(updated.uri.clone());
        Ok(Some(updated))
    }

    fn missing_metadata(
        &self,
        path: &Path,
        relative: &Path,
        report: &mut IndexReport,
    ) -> Result<Option<RepositoryObject>> {
        match self.options.on_missing_metadata {
            MissingMetadataPolicy::Skip => {
                warn!("Skipping {}: required metadata missing", relative.display());
                report.skipped.push(relative.display().to_string());
                Ok(None)
            }
            MissingMetadataPolicy::Propagate => Err(SyncError::MetadataMissing(path.to_path_buf())),
        }
    }

    /// Whether the stored object no longer describes the file on disk.
    fn content_changed(&self, stored: &RepositoryObject, entry: &FileEntry) -> bool {
        let vocab = &self.vocabulary;
        match self.options.change_detection {
            ChangeDetection::Always => true,
            ChangeDetection::Digest => {
                let stored = stored.metadata.first_literal(&vocab.digest_property);
                let current = entry.candidate().first_literal(&vocab.digest_property);
                stored.is_none() || stored != current
            }
            ChangeDetection::Modified => {
                let parse = |md: &Metadata| {
                    md.first_literal(&vocab.modified_property)
                        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                };
                match (parse(&stored.metadata), parse(entry.candidate())) {
                    (Some(stored), Some(current)) => current > stored,
                    _ => true,
                }
            }
        }
    }

    /// Supersede `old` with a new object for the changed entry.
    ///
    /// External identifiers (and persistent ones when configured) move to
    /// the new object. The old object keeps its canonical id and UUID-shaped
    /// identifiers, gains a fresh disambiguation id, leaves its container,
    /// and links to its successor.
    pub async fn create_version(
        &self,
        session: &mut RepositorySession,
        old: &RepositoryObject,
        entry: &FileEntry,
        parent_uri: Option<&str>,
    ) -> Result<VersionLink> {
        let vocab = &self.vocabulary;
        let id_property = vocab.identifier_property.as_str();

        let held = old.identifiers(vocab);
        let migrated: BTreeSet<String> = held
            .iter()
            .filter(|id| match vocab.classify(id) {
                IdentifierClass::External => true,
                IdentifierClass::Persistent => self.options.migrate_persistent_ids,
                IdentifierClass::Canonical | IdentifierClass::Uuid => false,
            })
            .cloned()
            .collect();

        let mut retire = MetadataPatch::default();
        for id in &migrated {
            retire.delete.insert(id_property, Term::iri(id));
        }
        for value in old.metadata.values(&vocab.parent_property) {
            retire.delete.insert(vocab.parent_property.as_str(), value.clone());
        }
        let disambiguation = format!("urn:uuid:{}", Uuid::new_v4());
        retire
            .insert
            .insert(id_property, Term::iri(&disambiguation));
        session.apply_patch(&old.uri, &retire).await?;

        let mut metadata = old.metadata.clone();
        metadata.retain(|p, _| {
            p != id_property
                && p != vocab.newer_version_property
                && p != vocab.older_version_property
                && p != vocab.parent_property
                && !vocab.is_server_managed(p)
        });
        let candidate = entry.candidate();
        for property in candidate.properties() {
            if property != id_property {
                metadata.remove_property(property);
            }
        }
        for (p, v) in candidate.iter() {
            let stays_behind = p == id_property
                && v.as_iri().is_some_and(|id| held.contains(id) && !migrated.contains(id));
            if !stays_behind {
                metadata.insert(p, v.clone());
            }
        }
        for id in &migrated {
            metadata.insert(id_property, Term::iri(id));
        }
        metadata.insert(
            vocab.older_version_property.as_str(),
            Term::iri(&old.canonical_id),
        );

        let mut request = CreateRequest::new(metadata);
        request.parent = parent_uri.map(str::to_string);
        request.content = entry.binary()?;
        let new = session.create_object(request).await?;

        let link = MetadataPatch::insert_only(
            [(
                vocab.newer_version_property.clone(),
                Term::iri(&new.canonical_id),
            )]
            .into_iter()
            .collect(),
        );
        let old = session.apply_patch(&old.uri, &link).await?;

        info!(
            "Versioned {}: {} superseded by {} ({} identifiers moved)",
            entry.relative().display(),
            old.uri,
            new.uri,
            migrated.len()
        );
        Ok(VersionLink { old, new })
    }
}

/// Direct children of `dir`, sorted by file name.
fn list_children(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut children = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
        children.push(entry.into_path());
    }
    Ok(children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRepository;
    use crate::session::SessionOptions;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        repo: Arc<MemoryRepository>,
        session: RepositorySession,
        vocab: Vocabulary,
        tree: TempDir,
    }

    impl Fixture {
        async fn new() -> Self {
            Self::with_session(SessionOptions::default()).await
        }

        async fn with_session(options: SessionOptions) -> Self {
            let vocab = Vocabulary::default();
            let repo = Arc::new(MemoryRepository::new("mem:/rest", vocab.clone()));
            let session = RepositorySession::new(repo.clone(), vocab.clone(), options);
            Self {
                repo,
                session,
                vocab,
                tree: TempDir::new().unwrap(),
            }
        }

        fn write(&self, relative: &str, contents: &[u8]) {
            let path = self.tree.path().join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, contents).unwrap();
        }

        async fn run(&mut self, indexer: &VersionedIndexer) -> IndexReport {
            self.session.begin().await.unwrap();
            let report = indexer
                .index(&mut self.session, self.tree.path(), None)
                .await
                .unwrap();
            self.session.commit().await.unwrap();
            report
        }

        fn object_for(&self, objects: &[RepositoryObject], id: &str) -> RepositoryObject {
            objects
                .iter()
                .find(|o| o.identifiers(&self.vocab).contains(id))
                .cloned()
                .unwrap_or_else(|| panic!("no object holds {id}"))
        }
    }

    #[tokio::test]
    async fn hierarchy_nests_children_under_directory_objects() {
        let mut fx = Fixture::new().await;
        fx.write("maps/north.txt", b"n");
        fx.write("readme.txt", b"r");
        let indexer = VersionedIndexer::new(&fx.vocab, IndexOptions::default()).unwrap();

        let report = fx.run(&indexer).await;
        assert_eq!(report.created.len(), 3);

        let objects = fx.repo.objects().await;
        let maps = fx.object_for(&objects, "file:///maps");
        let north = fx.object_for(&objects, "file:///maps/north.txt");
        assert!(north.uri.starts_with(&maps.uri));
        assert!(north
            .metadata
            .contains(&fx.vocab.parent_property, &Term::iri(&maps.canonical_id)));
        assert_eq!(
            fx.repo.content(&north.uri).await.map(|c| c.bytes),
            Some(b"n".to_vec())
        );
    }

    #[tokio::test]
    async fn flat_mode_attaches_everything_to_the_root() {
        let mut fx = Fixture::new().await;
        fx.write("a/b/deep.txt", b"d");
        let options = IndexOptions {
            flat: true,
            ..IndexOptions::default()
        };
        let indexer = VersionedIndexer::new(&fx.vocab, options).unwrap();

        let report = fx.run(&indexer).await;

        assert_eq!(report.created.len(), 1);
        let objects = fx.repo.objects().await;
        let deep = fx.object_for(&objects, "file:///a/b/deep.txt");
        assert!(!deep.metadata.has_property(&fx.vocab.parent_property));
    }

    #[tokio::test]
    async fn depth_and_filters_bound_the_walk() {
        let mut fx = Fixture::new().await;
        fx.write("keep.tif", b"k");
        fx.write("skip.txt", b"s");
        fx.write("one/two/three.tif", b"3");
        let options = IndexOptions {
            max_depth: 2,
            include: vec!["*.tif".to_string()],
            ..IndexOptions::default()
        };
        let indexer = VersionedIndexer::new(&fx.vocab, options).unwrap();

        fx.run(&indexer).await;

        let ids: BTreeSet<String> = fx
            .repo
            .objects()
            .await
            .iter()
            .flat_map(|o| o.identifiers(&fx.vocab))
            .filter(|id| id.starts_with("file:///"))
            .collect();
        let expected: BTreeSet<String> = ["file:///keep.tif", "file:///one", "file:///one/two"]
            .into_iter()
            .map(str::to_string)
            .collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn missing_required_metadata_skips_the_entry() {
        let mut fx = Fixture::new().await;
        fx.write("described.txt", b"d");
        fx.write("described.txt.meta.json", br#"{"http://purl.org/dc/terms/title": "Described"}"#);
        fx.write("bare.txt", b"b");
        let options = IndexOptions {
            require_metadata: true,
            ..IndexOptions::default()
        };
        let indexer = VersionedIndexer::new(&fx.vocab, options)
            .unwrap()
            .with_lookup(SidecarLookup::new(".meta.json"));

        let report = fx.run(&indexer).await;

        assert_eq!(report.created.len(), 1);
        assert_eq!(report.skipped, vec!["bare.txt".to_string()]);
        let objects = fx.repo.objects().await;
        assert_eq!(objects[0].title(&fx.vocab), Some("Described"));
    }

    #[tokio::test]
    async fn missing_metadata_can_abort_the_walk() {
        let mut fx = Fixture::new().await;
        fx.write("bare.txt", b"b");
        let options = IndexOptions {
            on_missing_metadata: MissingMetadataPolicy::Propagate,
            ..IndexOptions::default()
        };
        let indexer = VersionedIndexer::new(&fx.vocab, options)
            .unwrap()
            .with_lookup(SidecarLookup::new(".meta.json").required());

        fx.session.begin().await.unwrap();
        let result = indexer.index(&mut fx.session, fx.tree.path(), None).await;
        assert!(matches!(result, Err(SyncError::MetadataMissing(_))));
        fx.session.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn modified_date_detection_ignores_untouched_files() {
        let mut fx = Fixture::new().await;
        fx.write("a.txt", b"a");
        let options = IndexOptions {
            change_detection: ChangeDetection::Modified,
            ..IndexOptions::default()
        };
        let indexer = VersionedIndexer::new(&fx.vocab, options).unwrap();

        fx.run(&indexer).await;
        let second = fx.run(&indexer).await;

        assert!(second.versioned.is_empty());
        assert_eq!(second.unchanged.len(), 1);
    }

    #[tokio::test]
    async fn persistent_ids_stay_unless_migration_is_requested() {
        let mut fx = Fixture::new().await;
        fx.write("a.txt", b"a");
        let indexer = VersionedIndexer::new(&fx.vocab, IndexOptions::default()).unwrap();
        fx.run(&indexer).await;

        let objects = fx.repo.objects().await;
        let stored = fx.object_for(&objects, "file:///a.txt");
        let pid = MetadataPatch::insert_only(
            [(
                fx.vocab.identifier_property.clone(),
                Term::iri("https://hdl.handle.net/1234/5"),
            )]
            .into_iter()
            .collect(),
        );
        fx.session.apply_patch(&stored.uri, &pid).await.unwrap();

        fx.write("a.txt", b"b");
        let report = fx.run(&indexer).await;

        let link = &report.versioned[0];
        let old_ids = link.old.identifiers(&fx.vocab);
        let new_ids = link.new.identifiers(&fx.vocab);
        assert!(old_ids.contains("https://hdl.handle.net/1234/5"));
        assert!(!new_ids.contains("https://hdl.handle.net/1234/5"));
        assert!(new_ids.contains("file:///a.txt"));
        assert!(!old_ids.contains("file:///a.txt"));
    }

    #[tokio::test]
    async fn unversioned_changes_replace_content_in_place() {
        let mut fx = Fixture::new().await;
        fx.write("a.txt", b"old");
        let options = IndexOptions {
            versioning: false,
            ..IndexOptions::default()
        };
        let indexer = VersionedIndexer::new(&fx.vocab, options).unwrap();
        fx.run(&indexer).await;

        fx.write("a.txt", b"new!");
        let report = fx.run(&indexer).await;

        assert_eq!(report.updated.len(), 1);
        assert!(report.versioned.is_empty());
        let objects = fx.repo.objects().await;
        assert_eq!(objects.len(), 1);
        let stored = &objects[0];
        assert_eq!(stored.metadata.first_literal(&fx.vocab.size_property), Some("4"));
        assert_eq!(
            stored.metadata.first_literal(&fx.vocab.digest_property).map(str::to_string),
            Some(entry::file_digest(&fx.tree.path().join("a.txt")).unwrap())
        );
        assert_eq!(
            fx.repo.content(&stored.uri).await.map(|c| c.bytes),
            Some(b"new!".to_vec())
        );
    }

    #[tokio::test]
    async fn autocommit_never_splits_a_version_pair() {
        let mut fx = Fixture::with_session(SessionOptions {
            autocommit_every: Some(1),
            ..SessionOptions::default()
        })
        .await;
        fx.write("a.txt", b"a1");
        fx.write("b.txt", b"b1");
        let indexer = VersionedIndexer::new(&fx.vocab, IndexOptions::default()).unwrap();
        fx.run(&indexer).await;

        fx.write("a.txt", b"a2");
        fx.write("b.txt", b"b2");
        let before = fx.repo.commit_count().await;
        let report = fx.run(&indexer).await;

        // one checkpoint per entry plus the final commit
        assert_eq!(report.versioned.len(), 2);
        assert_eq!(fx.repo.commit_count().await - before, 3);

        let objects = fx.repo.objects().await;
        assert_eq!(objects.len(), 4);
        for link in &report.versioned {
            let old = objects.iter().find(|o| o.uri == link.old.uri).unwrap();
            let new = objects.iter().find(|o| o.uri == link.new.uri).unwrap();
            assert!(old
                .metadata
                .contains(&fx.vocab.newer_version_property, &Term::iri(&new.canonical_id)));
            assert!(new
                .metadata
                .contains(&fx.vocab.older_version_property, &Term::iri(&old.canonical_id)));
        }
    }
}
