//! Import of whole metadata graphs.
//!
//! Nodes are matched against existing objects through the identity cache,
//! references between nodes are rewritten to canonical ids as soon as their
//! target exists, and the work list is drained one node at a time until it
//! is empty or only nodes waiting on each other remain.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, error, info, warn};

use reposync_config::ImportSettings;
use reposync_model::{Metadata, RepositoryObject, SourceGraph, SourceNode, Term, Vocabulary};

use crate::error::{Result, SyncError};
use crate::identity::{IdentityCache, Resolution};
use crate::merge::{MergePolicy, MetadataMerge, MetadataPatch};
use crate::session::{Lookup, RepositorySession};

/// Configuration for a graph import
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// References into these namespaces must resolve to canonical ids
    pub managed_namespaces: Vec<String>,
    /// Identifier-only nodes in this namespace are created as stubs
    pub promote_namespace: Option<String>,
    pub create_stubs: bool,
    /// Report unresolvable cycles instead of failing the import
    pub tolerate_partial: bool,
    /// Never deleted by a diff update
    pub protected_properties: Vec<String>,
}

impl From<&ImportSettings> for ImportOptions {
    fn from(settings: &ImportSettings) -> Self {
        Self {
            managed_namespaces: settings.managed_namespaces.clone(),
            promote_namespace: settings.promote_namespace.clone(),
            create_stubs: settings.create_stubs,
            tolerate_partial: settings.tolerate_partial,
            protected_properties: settings.protected_properties.clone(),
        }
    }
}

/// Outcome of one import run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    /// Canonical ids of created objects
    pub created: Vec<String>,
    /// Canonical ids of objects merged into
    pub updated: Vec<String>,
    /// Nodes that can never be matched or are aliases
    pub skipped: Vec<String>,
    /// Nodes dropped after a per-node failure
    pub failed: Vec<String>,
    /// Nodes left waiting on each other when partial imports are tolerated
    pub unresolved: Vec<String>,
}

#[derive(Debug, Clone)]
struct PendingNode {
    key: String,
    subject: Term,
    ids: Vec<String>,
    properties: Metadata,
}

impl PendingNode {
    fn blank_label(&self) -> Option<&str> {
        match &self.subject {
            Term::Blank(label) => Some(label),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq)]
enum Disposition {
    /// Refers to a blank or managed node that has not been imported yet
    Wait,
    Skip(&'static str),
    /// Refers to a managed identifier nothing resolves
    Invalid(String),
    Import { stub: bool },
}

/// A reference held back from a written object until its target exists.
#[derive(Debug)]
struct DeferredLink {
    /// Canonical id of the object the reference belongs to
    source: String,
    property: String,
    /// Identifier of the pending target node
    target: String,
}

/// What every node in the current work list is known by.
struct Pending {
    ids: HashSet<String>,
    blanks: HashSet<String>,
}

impl Pending {
    fn of(nodes: &[PendingNode]) -> Self {
        Self {
            ids: nodes.iter().flat_map(|n| n.ids.iter().cloned()).collect(),
            blanks: nodes
                .iter()
                .filter_map(|n| n.blank_label().map(str::to_string))
                .collect(),
        }
    }
}

/// Imports a [`SourceGraph`] into the repository.
pub struct GraphImporter {
    vocabulary: Vocabulary,
    options: ImportOptions,
    merge: MetadataMerge,
}

impl GraphImporter {
    pub fn new(vocabulary: &Vocabulary, options: ImportOptions) -> Self {
        let merge = MetadataMerge::new(vocabulary)
            .with_protected(options.protected_properties.iter().cloned());
        Self {
            vocabulary: vocabulary.clone(),
            options,
            merge,
        }
    }

    /// Import every node of `graph` through `session`.
    ///
    /// Per-node validation failures are logged and the node is dropped.
    /// Ambiguous matches, cache inconsistencies and transaction failures
    /// abort the run.
    pub async fn import(
        &self,
        session: &mut RepositorySession,
        cache: &mut IdentityCache,
        graph: SourceGraph,
    ) -> Result<ImportReport> {
        let mut pending = self.normalize(graph);
        let aliases = self.aliases(&pending);
        info!("Importing graph of {} nodes", pending.len());

        cache.reload(session).await?;
        let mut blanks: HashMap<String, String> = HashMap::new();
        self.propagate(cache, &pending, &mut blanks)?;

        let mut report = ImportReport::default();
        let mut written: HashSet<String> = HashSet::new();
        let mut probed: HashSet<String> = HashSet::new();
        let mut deferred: Vec<DeferredLink> = Vec::new();

        loop {
            if pending.is_empty() {
                break;
            }
            self.rewrite_references(&mut pending, cache, &blanks);

            let known = Pending::of(&pending);
            let pick = |defer: bool| {
                pending.iter().enumerate().find_map(|(i, node)| {
                    match self.classify(node, &known, cache, &aliases, defer) {
                        Disposition::Wait => None,
                        other => Some((i, other)),
                    }
                })
            };
            let next = pick(false).or_else(|| pick(true));

            let Some((index, disposition)) = next else {
                let nodes: Vec<String> = pending.iter().map(|n| n.key.clone()).collect();
                if self.options.tolerate_partial {
                    warn!(
                        "Leaving {} nodes unimported; they only refer to each other: {}",
                        nodes.len(),
                        nodes.join(", ")
                    );
                    report.unresolved = nodes;
                    break;
                }
                error!(
                    "Unresolvable reference cycle among {} nodes: {}",
                    nodes.len(),
                    nodes.join(", ")
                );
                return Err(SyncError::CycleUnresolved { nodes });
            };

            if let Disposition::Invalid(reference) = &disposition {
                if probed.insert(reference.clone()) {
                    cache.probe(session, std::slice::from_ref(reference)).await?;
                    continue;
                }
            }

            let node = pending.remove(index);
            match disposition {
                Disposition::Wait => {}
                Disposition::Skip(reason) => {
                    debug!("Skipping {}: {}", node.key, reason);
                    report.skipped.push(node.key);
                }
                Disposition::Invalid(reference) => {
                    let err = SyncError::InvalidReference {
                        subject: node.key.clone(),
                        reference,
                    };
                    warn!("Dropping {}: {}", node.key, err);
                    report.failed.push(node.key);
                }
                Disposition::Import { stub } => {
                    let result = self
                        .import_node(session, cache, &node, stub, &written, &known)
                        .await;
                    match result {
                        Ok((object, created, held_back)) => {
                            cache.register(&object.canonical_id, node.ids.iter())?;
                            deferred.extend(held_back.into_iter().map(|(property, target)| {
                                DeferredLink {
                                    source: object.canonical_id.clone(),
                                    property,
                                    target,
                                }
                            }));
                            cache.set_location(&object.canonical_id, object.uri.clone());
                            if let Some(label) = node.blank_label() {
                                blanks.insert(label.to_string(), object.canonical_id.clone());
                            }
                            written.insert(object.canonical_id.clone());
                            if created {
                                report.created.push(object.canonical_id);
                            } else {
                                report.updated.push(object.canonical_id);
                            }

                            self.link_deferred(session, cache, &mut deferred).await?;

                            if session.checkpoint().await? {
                                cache.reload(session).await?;
                                self.propagate(cache, &pending, &mut blanks)?;
                            }
                        }
                        Err(e) if e.is_recoverable() => {
                            warn!("Failed to import {}: {}", node.key, e);
                            report.failed.push(node.key);
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        for link in &deferred {
            warn!(
                "Dropping reference {} {} from {}: target was never imported",
                link.property, link.target, link.source
            );
        }

        info!(
            "Import finished: {} created, {} updated, {} skipped, {} failed, {} unresolved",
            report.created.len(),
            report.updated.len(),
            report.skipped.len(),
            report.failed.len(),
            report.unresolved.len()
        );
        Ok(report)
    }

    /// Keep only reference-valued identifiers and promote IRI subjects to
    /// identifiers of their own node.
    fn normalize(&self, graph: SourceGraph) -> Vec<PendingNode> {
        let id_property = self.vocabulary.identifier_property.as_str();
        graph
            .into_nodes()
            .into_iter()
            .map(|mut node| {
                let before = node.properties.len();
                node.properties
                    .retain(|p, v| p != id_property || v.as_iri().is_some());
                if node.properties.len() < before {
                    debug!(
                        "Dropped {} non-reference identifiers of {}",
                        before - node.properties.len(),
                        node.subject
                    );
                }
                if let Term::Iri(subject) = &node.subject {
                    node.properties.insert(id_property, Term::iri(subject));
                }

                PendingNode {
                    key: node_key(&node.subject),
                    ids: node.identifiers(&self.vocabulary),
                    subject: node.subject,
                    properties: node.properties,
                }
            })
            .collect()
    }

    /// Subjects that another node lists among its identifiers.
    fn aliases(&self, nodes: &[PendingNode]) -> HashSet<String> {
        let subjects: HashSet<&str> = nodes
            .iter()
            .filter_map(|n| n.subject.as_iri())
            .collect();
        let mut aliases = HashSet::new();
        for node in nodes {
            for id in &node.ids {
                if node.subject.as_iri() != Some(id.as_str()) && subjects.contains(id.as_str()) {
                    aliases.insert(id.clone());
                }
            }
        }
        aliases
    }

    /// Register every identifier of a node once any of them resolves, until
    /// nothing changes.
    fn propagate(
        &self,
        cache: &mut IdentityCache,
        nodes: &[PendingNode],
        blanks: &mut HashMap<String, String>,
    ) -> Result<()> {
        loop {
            let mut changed = false;
            for node in nodes {
                let Resolution::Resolved(canonical) = cache.resolve_all(&node.ids)? else {
                    continue;
                };
                if node
                    .ids
                    .iter()
                    .any(|id| cache.resolve(id) == Resolution::Unresolved)
                {
                    debug!("{} resolves to {} through a shared identifier", node.key, canonical);
                    cache.register(&canonical, node.ids.iter())?;
                    changed = true;
                }
                if let Some(label) = node.blank_label() {
                    blanks.entry(label.to_string()).or_insert(canonical);
                }
            }
            if !changed {
                return Ok(());
            }
        }
    }

    /// Rewrite resolvable references to canonical ids and drop references to
    /// blank nodes that will never be imported.
    fn rewrite_references(
        &self,
        nodes: &mut [PendingNode],
        cache: &IdentityCache,
        blanks: &HashMap<String, String>,
    ) {
        let id_property = self.vocabulary.identifier_property.as_str();
        let pending_blanks: HashSet<String> = nodes
            .iter()
            .filter_map(|n| n.blank_label().map(str::to_string))
            .collect();

        for node in nodes.iter_mut() {
            node.properties.map_values(|p, v| {
                if p == id_property {
                    return None;
                }
                match v {
                    Term::Iri(iri) => cache.reference(iri),
                    Term::Blank(label) => blanks.get(label).map(Term::iri),
                    Term::Literal(_) => None,
                }
            });

            let key = &node.key;
            node.properties.retain(|p, v| match v {
                Term::Blank(label) if !pending_blanks.contains(label) => {
                    warn!("Dropping dangling reference {} {} from {}", p, v, key);
                    false
                }
                _ => true,
            });
        }
    }

    /// With `defer`, references to pending nodes outside the managed
    /// namespaces no longer block a node; they are held back at write time.
    fn classify(
        &self,
        node: &PendingNode,
        pending: &Pending,
        cache: &IdentityCache,
        aliases: &HashSet<String>,
        defer: bool,
    ) -> Disposition {
        let id_property = self.vocabulary.identifier_property.as_str();
        let own: HashSet<&str> = node.ids.iter().map(String::as_str).collect();

        for (p, v) in node.properties.iter() {
            if p == id_property {
                continue;
            }
            match v {
                Term::Blank(label) if *v != node.subject && pending.blanks.contains(label) => {
                    return Disposition::Wait;
                }
                Term::Iri(iri) => {
                    if own.contains(iri.as_str()) || cache.resolve(iri) != Resolution::Unresolved {
                        continue;
                    }
                    if pending.ids.contains(iri) && (!defer || self.is_managed(iri)) {
                        return Disposition::Wait;
                    }
                    if self.is_managed(iri) {
                        return Disposition::Invalid(iri.clone());
                    }
                }
                _ => {}
            }
        }

        if node.ids.is_empty() {
            return Disposition::Skip("no identifiers");
        }

        let descriptive = node.properties.properties().any(|p| p != id_property);
        if let Some(subject) = node.subject.as_iri() {
            if aliases.contains(subject) && !descriptive {
                return Disposition::Skip("alias of another node");
            }
        }

        if !descriptive {
            let promoted = self
                .options
                .promote_namespace
                .as_deref()
                .is_some_and(|ns| node.ids.iter().any(|id| id.starts_with(ns)));
            if self.options.create_stubs || promoted {
                return Disposition::Import { stub: true };
            }
            return Disposition::Skip("identifiers only");
        }

        Disposition::Import { stub: false }
    }

    fn is_managed(&self, iri: &str) -> bool {
        self.vocabulary.is_canonical(iri)
            || self
                .options
                .managed_namespaces
                .iter()
                .any(|ns| iri.starts_with(ns.as_str()))
    }

    /// Create or merge one node.
    ///
    /// Returns the object, whether it is new, and the references to pending
    /// nodes that were held back from the write.
    async fn import_node(
        &self,
        session: &mut RepositorySession,
        cache: &IdentityCache,
        node: &PendingNode,
        stub: bool,
        written: &HashSet<String>,
        pending: &Pending,
    ) -> Result<(RepositoryObject, bool, Vec<(String, String)>)> {
        let vocab = &self.vocabulary;
        let id_property = vocab.identifier_property.as_str();
        let mut metadata = node.properties.clone();

        if stub && !metadata.has_property(&vocab.title_property) {
            if let Some(id) = node.ids.first() {
                metadata.insert(&vocab.title_property, Term::literal(stub_title(id)));
            }
        }

        let own: HashSet<&str> = node.ids.iter().map(String::as_str).collect();
        let mut self_refs: Vec<String> = Vec::new();
        metadata.retain(|p, v| {
            let is_self = p != id_property
                && (*v == node.subject || v.as_iri().is_some_and(|iri| own.contains(iri)));
            if is_self {
                self_refs.push(p.to_string());
            }
            !is_self
        });

        let mut held_back: Vec<(String, String)> = Vec::new();
        metadata.retain(|p, v| match v.as_iri() {
            Some(iri)
                if p != id_property
                    && pending.ids.contains(iri)
                    && cache.resolve(iri) == Resolution::Unresolved =>
            {
                held_back.push((p.to_string(), iri.to_string()));
                false
            }
            _ => true,
        });

        let existing = match cache.resolve_all(&node.ids)? {
            Resolution::Resolved(canonical) => Some(self.locate(session, cache, &canonical).await?),
            Resolution::Unresolved => match session.lookup(&node.ids).await? {
                Lookup::Found(object) => Some(object),
                Lookup::NotFound => None,
                Lookup::Ambiguous(candidates) => {
                    return Err(SyncError::AmbiguousMatch {
                        identifiers: node.ids.clone(),
                        candidates: candidates.into_iter().map(|o| o.uri).collect(),
                    })
                }
            },
        };

        match existing {
            Some(current) => {
                for p in &self_refs {
                    metadata.insert(p.as_str(), Term::iri(&current.canonical_id));
                }
                let policy = if stub || written.contains(&current.canonical_id) {
                    MergePolicy::Additive
                } else {
                    MergePolicy::DiffUpdate
                };
                let updated = session
                    .merge_metadata(&current, &metadata, policy, &self.merge)
                    .await?;
                debug!("Merged {} into {}", node.key, updated.canonical_id);
                Ok((updated, false, held_back))
            }
            None => {
                let producer = SourceNode {
                    subject: node.subject.clone(),
                    properties: metadata,
                };
                let created = session.create_from(&producer, None).await?;
                debug!("Created {} for {}", created.canonical_id, node.key);
                if self_refs.is_empty() {
                    return Ok((created, true, held_back));
                }
                let insert: Metadata = self_refs
                    .into_iter()
                    .map(|p| (p, Term::iri(&created.canonical_id)))
                    .collect();
                let patched = session
                    .apply_patch(&created.uri, &MetadataPatch::insert_only(insert))
                    .await?;
                Ok((patched, true, held_back))
            }
        }
    }

    /// Write every held-back reference whose target now resolves.
    async fn link_deferred(
        &self,
        session: &mut RepositorySession,
        cache: &IdentityCache,
        deferred: &mut Vec<DeferredLink>,
    ) -> Result<()> {
        let mut ready: BTreeMap<String, Metadata> = BTreeMap::new();
        deferred.retain(|link| match cache.resolve(&link.target) {
            Resolution::Resolved(target) => {
                ready
                    .entry(link.source.clone())
                    .or_default()
                    .insert(link.property.clone(), Term::iri(target));
                false
            }
            Resolution::Unresolved => true,
        });

        for (source, insert) in ready {
            let current = self.locate(session, cache, &source).await?;
            debug!("Linking {} to {} deferred references", current.uri, insert.len());
            session
                .apply_patch(&current.uri, &MetadataPatch::insert_only(insert))
                .await?;
        }
        Ok(())
    }

    async fn locate(
        &self,
        session: &RepositorySession,
        cache: &IdentityCache,
        canonical: &str,
    ) -> Result<RepositoryObject> {
        if let Some(uri) = cache.location(canonical) {
            match session.get_object(uri).await {
                Ok(object) => return Ok(object),
                Err(SyncError::NotFound { .. }) | Err(SyncError::Deleted(_)) => {
                    debug!("Cached location {} of {} is gone", uri, canonical);
                }
                Err(e) => return Err(e),
            }
        }
        session.find_by_identifiers(&[canonical.to_string()]).await
    }
}

fn node_key(subject: &Term) -> String {
    match subject {
        Term::Iri(iri) => iri.clone(),
        other => other.to_string(),
    }
}

/// Readable title for a stub, taken from the last segment of its identifier.
fn stub_title(id: &str) -> String {
    let segment = id
        .trim_end_matches(|c| c == '/' || c == '#')
        .rsplit(|c| c == '/' || c == ':' || c == '#')
        .next()
        .unwrap_or(id);
    if segment.is_empty() {
        return id.to_string();
    }
    match urlencoding::decode(segment) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => segment.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRepository;
    use crate::session::SessionOptions;
    use crate::transport::{CreateRequest, RepositoryTransport};
    use std::sync::Arc;

    const REF: &str = "http://purl.org/dc/terms/relation";

    struct Fixture {
        repo: Arc<MemoryRepository>,
        session: RepositorySession,
        cache: IdentityCache,
        vocab: Vocabulary,
    }

    impl Fixture {
        async fn new() -> Self {
            Self::with_options(SessionOptions::default()).await
        }

        async fn with_options(options: SessionOptions) -> Self {
            let vocab = Vocabulary::default();
            let repo = Arc::new(MemoryRepository::new("mem:/rest", vocab.clone()));
            let mut session = RepositorySession::new(repo.clone(), vocab.clone(), options);
            session.begin().await.expect("begin");
            Self {
                repo,
                session,
                cache: IdentityCache::new(&vocab),
                vocab,
            }
        }

        async fn import(&mut self, options: ImportOptions, graph: SourceGraph) -> Result<ImportReport> {
            GraphImporter::new(&self.vocab, options)
                .import(&mut self.session, &mut self.cache, graph)
                .await
        }

        fn node(&self, subject: Term, id: Option<&str>, title: Option<&str>) -> SourceNode {
            let mut node = SourceNode::new(subject);
            if let Some(id) = id {
                node = node.with(&self.vocab.identifier_property, Term::iri(id));
            }
            if let Some(title) = title {
                node = node.with(&self.vocab.title_property, Term::literal(title));
            }
            node
        }
    }

    fn graph(nodes: Vec<SourceNode>) -> SourceGraph {
        let mut graph = SourceGraph::new();
        for node in nodes {
            graph.push(node);
        }
        graph
    }

    #[tokio::test]
    async fn blank_chain_resolves_in_dependency_order() {
        let mut fx = Fixture::new().await;
        let parent = fx
            .node(Term::blank("p"), Some("urn:ext:p"), Some("parent"))
            .with(REF, Term::blank("c"));
        let child = fx.node(Term::blank("c"), Some("urn:ext:c"), Some("child"));

        let report = fx
            .import(ImportOptions::default(), graph(vec![parent, child]))
            .await
            .expect("import");
        fx.session.commit().await.expect("commit");

        assert_eq!(report.created.len(), 2);
        let objects = fx.repo.objects().await;
        let parent = objects
            .iter()
            .find(|o| o.title(&fx.vocab) == Some("parent"))
            .expect("parent stored");
        let child = objects
            .iter()
            .find(|o| o.title(&fx.vocab) == Some("child"))
            .expect("child stored");
        assert!(parent
            .metadata
            .contains(REF, &Term::iri(&child.canonical_id)));
    }

    #[tokio::test]
    async fn blank_chain_survives_autocommit_between_nodes() {
        let mut fx = Fixture::with_options(SessionOptions {
            autocommit_every: Some(1),
            ..SessionOptions::default()
        })
        .await;
        let parent = fx
            .node(Term::blank("p"), Some("urn:ext:p"), Some("parent"))
            .with(REF, Term::blank("c"));
        let child = fx
            .node(Term::blank("c"), Some("urn:ext:c"), Some("child"))
            .with(REF, Term::blank("d"));
        let leaf = fx.node(Term::blank("d"), Some("urn:ext:d"), Some("leaf"));

        let report = fx
            .import(ImportOptions::default(), graph(vec![parent, child, leaf]))
            .await
            .expect("import");
        assert_eq!(fx.repo.commit_count().await, 3);
        fx.session.commit().await.expect("commit");

        assert_eq!(report.created.len(), 3);
        let objects = fx.repo.objects().await;
        let by_title = |title: &str| {
            objects
                .iter()
                .find(|o| o.title(&fx.vocab) == Some(title))
                .cloned()
                .unwrap_or_else(|| panic!("{title} stored"))
        };
        let (parent, child, leaf) = (by_title("parent"), by_title("child"), by_title("leaf"));
        assert!(parent
            .metadata
            .contains(REF, &Term::iri(&child.canonical_id)));
        assert!(child.metadata.contains(REF, &Term::iri(&leaf.canonical_id)));
        assert_eq!(parent.metadata.values(REF).count(), 1);
        assert_eq!(child.metadata.values(REF).count(), 1);
    }

    #[tokio::test]
    async fn mutual_iri_references_are_linked_after_both_exist() {
        const HAS_PART: &str = "http://purl.org/dc/terms/hasPart";
        const IS_PART_OF: &str = "http://purl.org/dc/terms/isPartOf";
        let mut fx = Fixture::new().await;
        let a = fx
            .node(Term::iri("https://ex.org/a"), None, Some("A"))
            .with(HAS_PART, Term::iri("https://ex.org/b"));
        let b = fx
            .node(Term::iri("https://ex.org/b"), None, Some("B"))
            .with(IS_PART_OF, Term::iri("https://ex.org/a"));

        let report = fx
            .import(ImportOptions::default(), graph(vec![a, b]))
            .await
            .expect("import");
        fx.session.commit().await.expect("commit");

        assert_eq!(report.created.len(), 2);
        assert!(report.unresolved.is_empty());
        let objects = fx.repo.objects().await;
        let a = objects
            .iter()
            .find(|o| o.title(&fx.vocab) == Some("A"))
            .expect("A stored");
        let b = objects
            .iter()
            .find(|o| o.title(&fx.vocab) == Some("B"))
            .expect("B stored");
        assert!(a.metadata.contains(HAS_PART, &Term::iri(&b.canonical_id)));
        assert!(b.metadata.contains(IS_PART_OF, &Term::iri(&a.canonical_id)));
        assert!(!a.metadata.contains(HAS_PART, &Term::iri("https://ex.org/b")));
    }

    #[tokio::test]
    async fn mutual_blank_references_are_a_cycle() {
        let mut fx = Fixture::new().await;
        let a = fx
            .node(Term::blank("a"), Some("urn:ext:a"), Some("A"))
            .with(REF, Term::blank("b"));
        let b = fx
            .node(Term::blank("b"), Some("urn:ext:b"), Some("B"))
            .with(REF, Term::blank("a"));

        let err = fx
            .import(ImportOptions::default(), graph(vec![a, b]))
            .await
            .expect_err("cycle");
        match err {
            SyncError::CycleUnresolved { nodes } => {
                assert_eq!(nodes, vec!["_:a".to_string(), "_:b".to_string()])
            }
            other => panic!("unexpected error: {other}"),
        }
        fx.session.commit().await.expect("commit");
        assert!(fx.repo.objects().await.is_empty());
    }

    #[tokio::test]
    async fn tolerated_cycles_are_reported() {
        let mut fx = Fixture::new().await;
        let a = fx
            .node(Term::blank("a"), Some("urn:ext:a"), Some("A"))
            .with(REF, Term::blank("b"));
        let b = fx
            .node(Term::blank("b"), Some("urn:ext:b"), Some("B"))
            .with(REF, Term::blank("a"));
        let c = fx.node(Term::blank("c"), Some("urn:ext:c"), Some("C"));
        let options = ImportOptions {
            tolerate_partial: true,
            ..ImportOptions::default()
        };

        let report = fx.import(options, graph(vec![a, b, c])).await.expect("import");
        assert_eq!(report.created.len(), 1);
        assert_eq!(report.unresolved.len(), 2);
    }

    #[tokio::test]
    async fn cycle_with_a_resolvable_member_imports() {
        let mut fx = Fixture::new().await;
        let mut seed = Metadata::new();
        seed.insert(&fx.vocab.identifier_property, Term::iri("urn:ext:a"));
        let existing = fx
            .repo
            .create_object(None, CreateRequest::new(seed))
            .await
            .expect("seed");

        let a = fx
            .node(Term::blank("a"), Some("urn:ext:a"), Some("A"))
            .with(REF, Term::blank("b"));
        let b = fx
            .node(Term::blank("b"), Some("urn:ext:b"), Some("B"))
            .with(REF, Term::blank("a"));

        let report = fx
            .import(ImportOptions::default(), graph(vec![a, b]))
            .await
            .expect("import");
        fx.session.commit().await.expect("commit");

        assert_eq!(report.created.len(), 1);
        assert_eq!(report.updated, vec![existing.canonical_id.clone()]);
        let b_id = &report.created[0];
        let a = fx.repo.get_object(None, &existing.uri).await.expect("a");
        assert!(a.metadata.contains(REF, &Term::iri(b_id)));
        assert_eq!(a.title(&fx.vocab), Some("A"));
    }

    #[tokio::test]
    async fn unmatchable_and_alias_nodes_are_skipped() {
        let mut fx = Fixture::new().await;
        let anonymous = fx.node(Term::blank("x"), None, Some("no ids"));
        let real = fx.node(Term::iri("urn:ext:real"), Some("urn:ext:alias"), Some("real"));
        let alias = fx.node(Term::iri("urn:ext:alias"), None, None);
        let bare = fx.node(Term::iri("urn:ext:bare"), None, None);

        let report = fx
            .import(ImportOptions::default(), graph(vec![anonymous, real, alias, bare]))
            .await
            .expect("import");

        assert_eq!(report.created.len(), 1);
        assert_eq!(
            report.skipped,
            vec![
                "_:x".to_string(),
                "urn:ext:alias".to_string(),
                "urn:ext:bare".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn stubs_get_a_title_from_their_identifier() {
        let mut fx = Fixture::new().await;
        let stub = fx.node(Term::iri("https://example.org/people/Ada%20Lovelace"), None, None);
        let options = ImportOptions {
            promote_namespace: Some("https://example.org/people/".to_string()),
            ..ImportOptions::default()
        };

        let report = fx.import(options, graph(vec![stub])).await.expect("import");
        fx.session.commit().await.expect("commit");

        assert_eq!(report.created.len(), 1);
        let objects = fx.repo.objects().await;
        assert_eq!(objects[0].title(&fx.vocab), Some("Ada Lovelace"));
    }

    #[tokio::test]
    async fn unresolvable_managed_reference_drops_only_that_node() {
        let mut fx = Fixture::new().await;
        let broken = fx
            .node(Term::iri("urn:ext:broken"), None, Some("broken"))
            .with(REF, Term::iri("https://example.org/managed/ghost"));
        let fine = fx.node(Term::iri("urn:ext:fine"), None, Some("fine"));
        let options = ImportOptions {
            managed_namespaces: vec!["https://example.org/managed/".to_string()],
            ..ImportOptions::default()
        };

        let report = fx.import(options, graph(vec![broken, fine])).await.expect("import");

        assert_eq!(report.failed, vec!["urn:ext:broken".to_string()]);
        assert_eq!(report.created.len(), 1);
    }

    #[tokio::test]
    async fn self_references_point_at_the_new_canonical_id() {
        let mut fx = Fixture::new().await;
        let node = fx
            .node(Term::iri("urn:ext:loop"), None, Some("loop"))
            .with(REF, Term::iri("urn:ext:loop"));

        let report = fx.import(ImportOptions::default(), graph(vec![node])).await.expect("import");
        fx.session.commit().await.expect("commit");

        let canonical = &report.created[0];
        let object = &fx.repo.objects().await[0];
        assert!(object.metadata.contains(REF, &Term::iri(canonical)));
        assert!(!object.metadata.contains(REF, &Term::iri("urn:ext:loop")));
    }

    #[test]
    fn stub_titles_come_from_the_last_segment() {
        assert_eq!(stub_title("https://example.org/a/b%20c"), "b c");
        assert_eq!(stub_title("urn:isbn:12345"), "12345");
        assert_eq!(stub_title("https://example.org/tag/"), "tag");
    }
}
