//! Session-scoped mapping from external identifiers to canonical ids.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use reposync_model::{Term, TriplePattern, Vocabulary};

use crate::error::{Result, SyncError};
use crate::session::{Lookup, RepositorySession};

/// What an identifier is known to denote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(String),
    Unresolved,
}

impl Resolution {
    pub fn canonical(&self) -> Option<&str> {
        match self {
            Resolution::Resolved(id) => Some(id),
            Resolution::Unresolved => None,
        }
    }
}

/// Bidirectional index between identifiers and canonical objects.
///
/// Built from one bulk query and extended as objects are created or probed.
/// The cache is owned by whoever drives an import and must be reloaded after
/// a commit, since canonical ids minted inside a transaction only reach the
/// search index once it commits.
#[derive(Debug, Clone)]
pub struct IdentityCache {
    vocabulary: Vocabulary,
    by_identifier: HashMap<String, String>,
    locations: HashMap<String, String>,
}

impl IdentityCache {
    pub fn new(vocabulary: &Vocabulary) -> Self {
        Self {
            vocabulary: vocabulary.clone(),
            by_identifier: HashMap::new(),
            locations: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_identifier.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identifier.is_empty()
    }

    /// Drop everything and rebuild from the search index.
    ///
    /// Returns the number of objects loaded. An object carrying more than
    /// one canonical id, or two objects sharing an identifier, is a
    /// [`SyncError::CacheInconsistent`].
    pub async fn reload(&mut self, session: &RepositorySession) -> Result<usize> {
        self.by_identifier.clear();
        self.locations.clear();

        let pattern = TriplePattern::with_predicate(&self.vocabulary.identifier_property);
        let mut by_subject: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for triple in session.query(&pattern).await? {
            if let (Some(subject), Some(id)) = (triple.subject.as_iri(), triple.object.as_iri()) {
                by_subject
                    .entry(subject.to_string())
                    .or_default()
                    .insert(id.to_string());
            }
        }

        let mut loaded = 0;
        for (uri, ids) in by_subject {
            let canonicals: Vec<&String> = ids
                .iter()
                .filter(|id| self.vocabulary.is_canonical(id))
                .collect();
            let canonical = match canonicals.as_slice() {
                [] => {
                    debug!("{} has identifiers but no canonical id; not cached", uri);
                    continue;
                }
                [one] => (*one).clone(),
                many => {
                    return Err(SyncError::CacheInconsistent(format!(
                        "{} carries {} canonical ids",
                        uri,
                        many.len()
                    )))
                }
            };
            self.register(&canonical, ids.iter())?;
            self.set_location(&canonical, uri);
            loaded += 1;
        }

        debug!(
            "Identity cache loaded {} objects, {} identifiers",
            loaded,
            self.by_identifier.len()
        );
        Ok(loaded)
    }

    /// Map every identifier in `ids`, and the canonical id itself, to
    /// `canonical`.
    pub fn register<I, S>(&mut self, canonical: &str, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids: Vec<String> = ids
            .into_iter()
            .map(|id| id.as_ref().to_string())
            .chain(std::iter::once(canonical.to_string()))
            .collect();

        for id in &ids {
            if let Some(existing) = self.by_identifier.get(id) {
                if existing != canonical {
                    return Err(SyncError::CacheInconsistent(format!(
                        "{} maps to both {} and {}",
                        id, existing, canonical
                    )));
                }
            }
        }
        for id in ids {
            self.by_identifier.insert(id, canonical.to_string());
        }
        Ok(())
    }

    pub fn resolve(&self, id: &str) -> Resolution {
        match self.by_identifier.get(id) {
            Some(canonical) => Resolution::Resolved(canonical.clone()),
            None => Resolution::Unresolved,
        }
    }

    /// Resolve a set of identifiers that should all denote one object.
    pub fn resolve_all(&self, ids: &[String]) -> Result<Resolution> {
        let canonicals: BTreeSet<&String> = ids
            .iter()
            .filter_map(|id| self.by_identifier.get(id))
            .collect();
        match canonicals.len() {
            0 => Ok(Resolution::Unresolved),
            1 => Ok(canonicals
                .into_iter()
                .next()
                .map_or(Resolution::Unresolved, |c| Resolution::Resolved(c.clone()))),
            _ => Err(SyncError::AmbiguousMatch {
                identifiers: ids.to_vec(),
                candidates: canonicals.into_iter().cloned().collect(),
            }),
        }
    }

    pub fn set_location(&mut self, canonical: &str, uri: impl Into<String>) {
        self.locations.insert(canonical.to_string(), uri.into());
    }

    /// Repository URI of a canonical object, when known.
    pub fn location(&self, canonical: &str) -> Option<&str> {
        self.locations.get(canonical).map(String::as_str)
    }

    /// Resolve `ids`, asking the repository about any identifier the cache
    /// has not seen.
    pub async fn probe(&mut self, session: &RepositorySession, ids: &[String]) -> Result<Resolution> {
        let unknown: Vec<String> = ids
            .iter()
            .filter(|id| !self.by_identifier.contains_key(*id))
            .cloned()
            .collect();

        if !unknown.is_empty() {
            match session.lookup(&unknown).await? {
                Lookup::Found(object) => {
                    debug!("Probed {:?} -> {}", unknown, object.canonical_id);
                    self.register(&object.canonical_id, object.identifiers(&self.vocabulary))?;
                    self.set_location(&object.canonical_id, object.uri);
                }
                Lookup::NotFound => {}
                Lookup::Ambiguous(candidates) => {
                    return Err(SyncError::AmbiguousMatch {
                        identifiers: unknown,
                        candidates: candidates.into_iter().map(|o| o.uri).collect(),
                    })
                }
            }
        }

        self.resolve_all(ids)
    }

    /// The canonical id as a reference term, for rewriting metadata.
    pub fn reference(&self, id: &str) -> Option<Term> {
        self.by_identifier.get(id).map(Term::iri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRepository;
    use crate::merge::MetadataPatch;
    use crate::session::SessionOptions;
    use crate::transport::{CreateRequest, RepositoryTransport};
    use reposync_model::Metadata;
    use std::sync::Arc;

    fn identified(id: &str) -> Metadata {
        let mut md = Metadata::new();
        md.insert(&Vocabulary::default().identifier_property, Term::iri(id));
        md
    }

    #[tokio::test]
    async fn reload_indexes_every_identifier() {
        let vocab = Vocabulary::default();
        let repo = Arc::new(MemoryRepository::new("mem:/rest", vocab.clone()));
        let object = repo
            .create_object(None, CreateRequest::new(identified("urn:ext:a")))
            .await
            .expect("create");
        let session = RepositorySession::new(repo.clone(), vocab.clone(), SessionOptions::default());

        let mut cache = IdentityCache::new(&vocab);
        assert_eq!(cache.reload(&session).await.expect("reload"), 1);

        assert_eq!(
            cache.resolve("urn:ext:a"),
            Resolution::Resolved(object.canonical_id.clone())
        );
        assert_eq!(
            cache.resolve(&object.canonical_id),
            Resolution::Resolved(object.canonical_id.clone())
        );
        assert_eq!(cache.location(&object.canonical_id), Some(object.uri.as_str()));
        assert_eq!(cache.resolve("urn:ext:other"), Resolution::Unresolved);
    }

    #[tokio::test]
    async fn two_canonical_ids_on_one_object_are_inconsistent() {
        let vocab = Vocabulary::default();
        let repo = Arc::new(MemoryRepository::new("mem:/rest", vocab.clone()));
        let object = repo
            .create_object(None, CreateRequest::new(identified("urn:ext:a")))
            .await
            .expect("create");
        let extra = MetadataPatch::insert_only(identified(&vocab.canonical_id("second")));
        repo.patch_metadata(None, &object.uri, &extra)
            .await
            .expect("patch");
        let session = RepositorySession::new(repo.clone(), vocab.clone(), SessionOptions::default());

        let mut cache = IdentityCache::new(&vocab);
        assert!(matches!(
            cache.reload(&session).await,
            Err(SyncError::CacheInconsistent(_))
        ));
    }

    #[test]
    fn conflicting_registration_is_rejected() {
        let vocab = Vocabulary::default();
        let mut cache = IdentityCache::new(&vocab);
        cache
            .register(&vocab.canonical_id("1"), ["urn:ext:a"])
            .expect("first");

        let err = cache
            .register(&vocab.canonical_id("2"), ["urn:ext:a"])
            .expect_err("conflict");
        assert!(matches!(err, SyncError::CacheInconsistent(_)));
        assert_eq!(
            cache.resolve("urn:ext:a"),
            Resolution::Resolved(vocab.canonical_id("1"))
        );
    }

    #[test]
    fn identifiers_of_different_objects_are_ambiguous() {
        let vocab = Vocabulary::default();
        let mut cache = IdentityCache::new(&vocab);
        cache.register(&vocab.canonical_id("1"), ["urn:ext:a"]).expect("a");
        cache.register(&vocab.canonical_id("2"), ["urn:ext:b"]).expect("b");

        let ids = vec!["urn:ext:a".to_string(), "urn:ext:b".to_string()];
        assert!(matches!(
            cache.resolve_all(&ids),
            Err(SyncError::AmbiguousMatch { .. })
        ));
    }

    #[tokio::test]
    async fn probe_fills_in_unknown_identifiers() {
        let vocab = Vocabulary::default();
        let repo = Arc::new(MemoryRepository::new("mem:/rest", vocab.clone()));
        let session = RepositorySession::new(repo.clone(), vocab.clone(), SessionOptions::default());
        let mut cache = IdentityCache::new(&vocab);
        cache.reload(&session).await.expect("empty reload");

        let object = repo
            .create_object(None, CreateRequest::new(identified("urn:ext:late")))
            .await
            .expect("create");
        let resolved = cache
            .probe(&session, &["urn:ext:late".to_string()])
            .await
            .expect("probe");

        assert_eq!(resolved, Resolution::Resolved(object.canonical_id));
    }
}
