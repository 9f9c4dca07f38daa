//! End-to-end scenarios against the in-memory repository.

use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;

use reposync_engine::{
    CreateRequest, GraphImporter, IdentityCache, ImportOptions, IndexOptions, MemoryRepository,
    MergePolicy, MetadataMerge, RepositorySession, RepositoryTransport, SessionOptions,
    SyncError, VersionedIndexer,
};
use reposync_model::{IdentifierClass, Metadata, SourceGraph, SourceNode, Term, Vocabulary};
use tempfile::TempDir;

const REF: &str = "http://purl.org/dc/terms/references";

struct Harness {
    repo: Arc<MemoryRepository>,
    session: RepositorySession,
    cache: IdentityCache,
    vocab: Vocabulary,
}

impl Harness {
    fn new() -> Self {
        let vocab = Vocabulary::default();
        let repo = Arc::new(MemoryRepository::new("mem:/rest", vocab.clone()));
        let session =
            RepositorySession::new(repo.clone(), vocab.clone(), SessionOptions::default());
        Self {
            repo,
            session,
            cache: IdentityCache::new(&vocab),
            vocab,
        }
    }

    async fn import(&mut self, graph: SourceGraph) -> Result<reposync_engine::ImportReport, SyncError> {
        self.session.begin().await?;
        let result = GraphImporter::new(&self.vocab, ImportOptions::default())
            .import(&mut self.session, &mut self.cache, graph)
            .await;
        match result {
            Ok(report) => {
                self.session.commit().await?;
                Ok(report)
            }
            Err(e) => {
                self.session.rollback().await?;
                Err(e)
            }
        }
    }

    async fn seed(&self, identifier: &str, title: &str) -> reposync_model::RepositoryObject {
        let mut metadata = Metadata::new();
        metadata.insert(&self.vocab.identifier_property, Term::iri(identifier));
        metadata.insert(&self.vocab.title_property, Term::literal(title));
        self.repo
            .create_object(None, CreateRequest::new(metadata))
            .await
            .expect("seed object")
    }

    fn node(&self, subject: &str, title: &str) -> SourceNode {
        titled(&self.vocab, subject, title)
    }
}

fn titled(vocab: &Vocabulary, subject: &str, title: &str) -> SourceNode {
    SourceNode::new(Term::iri(subject)).with(&vocab.title_property, Term::literal(title))
}

fn graph(nodes: Vec<SourceNode>) -> SourceGraph {
    let mut graph = SourceGraph::new();
    for node in nodes {
        graph.push(node);
    }
    graph
}

#[tokio::test]
async fn importing_the_same_graph_twice_is_idempotent() {
    let mut h = Harness::new();
    let vocab = h.vocab.clone();
    let doc = || {
        graph(vec![
            titled(&vocab, "urn:ext:a", "A").with(REF, Term::iri("urn:ext:b")),
            titled(&vocab, "urn:ext:b", "B"),
        ])
    };

    let first = h.import(doc()).await.expect("first import");
    let after_first = h.repo.objects().await;
    let second = h.import(doc()).await.expect("second import");
    let after_second = h.repo.objects().await;

    assert_eq!(first.created.len(), 2);
    assert!(second.created.is_empty());
    assert_eq!(second.updated.len(), 2);
    assert_eq!(after_first, after_second);
}

#[tokio::test]
async fn references_resolve_to_existing_canonical_ids() {
    let mut h = Harness::new();
    let b = h.seed("urn:ext:B", "old title").await;

    let report = h
        .import(graph(vec![
            h.node("urn:ext:A", "x").with(REF, Term::iri("urn:ext:B")),
            h.node("urn:ext:B", "y"),
        ]))
        .await
        .expect("import");

    assert_eq!(report.created.len(), 1);
    assert_eq!(report.updated, vec![b.canonical_id.clone()]);

    let objects = h.repo.objects().await;
    let a = objects
        .iter()
        .find(|o| o.canonical_id == report.created[0])
        .expect("A stored");
    assert!(a.metadata.contains(REF, &Term::iri(&b.canonical_id)));
    assert!(!a.metadata.contains(REF, &Term::iri("urn:ext:B")));
    assert!(!a.metadata.contains(REF, &Term::literal("urn:ext:B")));
}

#[tokio::test]
async fn imported_objects_never_share_identifiers() {
    let mut h = Harness::new();
    h.import(graph(vec![
        h.node("urn:ext:1", "one"),
        h.node("urn:ext:2", "two").with(&h.vocab.identifier_property, Term::iri("urn:alt:2")),
        h.node("urn:alt:2", "two again"),
    ]))
    .await
    .expect("import");

    let objects = h.repo.objects().await;
    assert_eq!(objects.len(), 2);
    let mut seen = BTreeSet::new();
    for object in &objects {
        for id in object.identifiers(&h.vocab) {
            assert!(seen.insert(id.clone()), "{id} held twice");
        }
    }
}

#[tokio::test]
async fn shared_identifiers_in_storage_are_reported() {
    let mut h = Harness::new();
    h.seed("urn:ext:shared", "first").await;
    h.seed("urn:ext:shared", "second").await;

    let err = h
        .import(graph(vec![h.node("urn:ext:shared", "incoming")]))
        .await
        .expect_err("duplicate identifiers");

    assert!(matches!(
        err,
        SyncError::CacheInconsistent(_) | SyncError::AmbiguousMatch { .. }
    ));
}

#[tokio::test]
async fn commit_rejects_duplicate_identifiers() {
    let mut h = Harness::new();
    h.session.begin().await.expect("begin");
    for title in ["first", "second"] {
        let mut metadata = Metadata::new();
        metadata.insert(&h.vocab.identifier_property, Term::iri("urn:ext:dup"));
        metadata.insert(&h.vocab.title_property, Term::literal(title));
        h.session
            .create_object(CreateRequest::new(metadata))
            .await
            .expect("create");
    }

    assert!(matches!(
        h.session.commit().await,
        Err(SyncError::Transaction(_))
    ));
    assert!(h.repo.objects().await.is_empty());
}

#[tokio::test]
async fn blank_cycle_without_identity_is_left_unimported() {
    let mut h = Harness::new();
    let a = SourceNode::new(Term::blank("a"))
        .with(&h.vocab.identifier_property, Term::iri("urn:ext:a"))
        .with(&h.vocab.title_property, Term::literal("A"))
        .with(REF, Term::blank("b"));
    let b = SourceNode::new(Term::blank("b"))
        .with(&h.vocab.identifier_property, Term::iri("urn:ext:b"))
        .with(&h.vocab.title_property, Term::literal("B"))
        .with(REF, Term::blank("a"));

    let err = h.import(graph(vec![a, b])).await.expect_err("cycle");

    assert!(matches!(err, SyncError::CycleUnresolved { .. }));
    assert!(h.repo.objects().await.is_empty());
}

#[test]
fn diff_update_of_identical_metadata_is_a_no_op() {
    let vocab = Vocabulary::default();
    let merge = MetadataMerge::new(&vocab);
    let mut metadata = Metadata::new();
    metadata.insert(&vocab.identifier_property, Term::iri("urn:ext:x"));
    metadata.insert(&vocab.title_property, Term::literal("X"));
    metadata.insert(REF, Term::iri("urn:ext:y"));

    assert!(merge
        .plan(MergePolicy::DiffUpdate, &metadata, &metadata)
        .is_empty());

    let mut incoming = Metadata::new();
    incoming.insert(&vocab.title_property, Term::literal("Y"));
    let once = merge.merge(MergePolicy::Overwrite, &metadata, &incoming);
    let twice = merge.merge(MergePolicy::Overwrite, &once, &incoming);
    assert_eq!(once, twice);
}

#[tokio::test]
async fn unchanged_files_are_not_versioned_and_changed_ones_are() {
    let mut h = Harness::new();
    let tree = TempDir::new().expect("tempdir");
    let file = tree.path().join("scan.tif");
    fs::write(&file, b"version one").expect("write");
    let indexer = VersionedIndexer::new(&h.vocab, IndexOptions::default()).expect("indexer");

    for _ in 0..2 {
        h.session.begin().await.expect("begin");
        indexer
            .index(&mut h.session, tree.path(), None)
            .await
            .expect("index");
        h.session.commit().await.expect("commit");
    }
    let objects = h.repo.objects().await;
    assert_eq!(objects.len(), 1);
    let before = objects[0].identifiers(&h.vocab);

    fs::write(&file, b"version onf").expect("rewrite");
    h.session.begin().await.expect("begin");
    let report = indexer
        .index(&mut h.session, tree.path(), None)
        .await
        .expect("index");
    h.session.commit().await.expect("commit");

    assert!(report.created.is_empty());
    assert_eq!(report.versioned.len(), 1);
    assert_eq!(h.repo.objects().await.len(), 2);

    let link = &report.versioned[0];
    let old = link.old.identifiers(&h.vocab);
    let new = link.new.identifiers(&h.vocab);

    assert!(old.is_disjoint(&new));
    let union: BTreeSet<String> = old.union(&new).cloned().collect();
    assert!(before.is_subset(&union));
    for id in union.difference(&before) {
        assert!(matches!(
            h.vocab.classify(id),
            IdentifierClass::Canonical | IdentifierClass::Uuid
        ));
    }
    assert!(new.contains("file:///scan.tif"));
    assert!(link
        .old
        .metadata
        .contains(&h.vocab.newer_version_property, &Term::iri(&link.new.canonical_id)));
    assert!(link
        .new
        .metadata
        .contains(&h.vocab.older_version_property, &Term::iri(&link.old.canonical_id)));
    assert_eq!(
        h.repo.content(&link.new.uri).await.map(|c| c.bytes),
        Some(b"version onf".to_vec())
    );
}
