//! In-memory repository implementing [`RepositoryTransport`].
//!
//! Behaves like a transactional linked-data repository with a separate
//! search index:
//!
//! - writes inside a transaction land in a private overlay on top of
//!   committed state and become visible to others on commit;
//! - transactions expire after a TTL unless kept alive;
//! - the search index is refreshed on commit for every object written in the
//!   transaction, except objects deleted and recreated inside it, whose
//!   index entry stays stale until their metadata is written again;
//! - identifier values must be unique across live objects at commit.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use reposync_model::{Metadata, RepositoryObject, Term, Triple, TriplePattern, Vocabulary};

use crate::error::{TransportError, TransportResult};
use crate::merge::MetadataPatch;
use crate::transport::{Content, CreateRequest, RepositoryTransport, TransactionId};

/// Server-managed creation timestamp written on every new object.
pub const CREATED_PROPERTY: &str = "http://fedora.info/definitions/v4/repository#created";

const DEFAULT_TTL: Duration = Duration::from_secs(180);

#[derive(Debug, Clone)]
struct StoredObject {
    object: RepositoryObject,
    content: Option<Content>,
}

#[derive(Debug, Clone)]
enum Slot {
    Live(StoredObject),
    Tombstone,
}

impl Slot {
    fn live<'a>(slot: Option<&'a Slot>, uri: &str) -> TransportResult<&'a StoredObject> {
        match slot {
            Some(Slot::Live(stored)) => Ok(stored),
            Some(Slot::Tombstone) => Err(TransportError::Deleted(uri.to_string())),
            None => Err(TransportError::NotFound(uri.to_string())),
        }
    }
}

type Objects = BTreeMap<String, Slot>;

#[derive(Debug)]
struct TxState {
    /// Slots written in this transaction
    overlay: Objects,
    expires_at: Instant,
    written: BTreeSet<String>,
    deleted: BTreeSet<String>,
    recreated: BTreeSet<String>,
}

impl TxState {
    fn new(expires_at: Instant) -> Self {
        Self {
            overlay: Objects::new(),
            expires_at,
            written: BTreeSet::new(),
            deleted: BTreeSet::new(),
            recreated: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    objects: Objects,
    index: BTreeMap<String, Metadata>,
    transactions: HashMap<TransactionId, TxState>,
    fail_next: u32,
    keep_alive_calls: usize,
    commits: usize,
}

impl State {
    fn inject_failure(&mut self) -> TransportResult<()> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(TransportError::Transient("injected failure".to_string()));
        }
        Ok(())
    }

    /// Fail unless `tx` exists and has not expired; expired transactions
    /// are discarded.
    fn check_open(&mut self, tx: &TransactionId) -> TransportResult<()> {
        let expired = match self.transactions.get(tx) {
            None => return Err(TransportError::NotFound(format!("transaction {}", tx))),
            Some(state) => state.expires_at <= Instant::now(),
        };
        if expired {
            self.transactions.remove(tx);
            return Err(TransportError::Rejected(format!("transaction {} expired", tx)));
        }
        Ok(())
    }

    fn scope(&mut self, tx: Option<&TransactionId>) -> TransportResult<Scope<'_>> {
        let Some(id) = tx else {
            return Ok(Scope {
                committed: &mut self.objects,
                tx: None,
            });
        };
        self.check_open(id)?;
        let State {
            objects,
            transactions,
            ..
        } = self;
        let tx_state = transactions
            .get_mut(id)
            .ok_or_else(|| TransportError::NotFound(format!("transaction {}", id)))?;
        Ok(Scope {
            committed: objects,
            tx: Some(tx_state),
        })
    }

    fn refresh_index(&mut self, uris: impl IntoIterator<Item = String>) {
        for uri in uris {
            match self.objects.get(&uri) {
                Some(Slot::Live(stored)) => {
                    self.index.insert(uri, stored.object.metadata.clone());
                }
                _ => {
                    self.index.remove(&uri);
                }
            }
        }
    }
}

/// The view one operation works on: committed state, plus the overlay of
/// its transaction when it has one.
struct Scope<'a> {
    committed: &'a mut Objects,
    tx: Option<&'a mut TxState>,
}

impl Scope<'_> {
    fn slot(&self, uri: &str) -> Option<&Slot> {
        self.tx
            .as_ref()
            .and_then(|tx| tx.overlay.get(uri))
            .or_else(|| self.committed.get(uri))
    }

    fn live(&self, uri: &str) -> TransportResult<&StoredObject> {
        Slot::live(self.slot(uri), uri)
    }

    /// Mutable access, copying the committed slot into the overlay first.
    fn live_mut(&mut self, uri: &str) -> TransportResult<&mut StoredObject> {
        let slot = match self.tx.as_mut() {
            Some(tx) => {
                if !tx.overlay.contains_key(uri) {
                    let copy = self
                        .committed
                        .get(uri)
                        .cloned()
                        .ok_or_else(|| TransportError::NotFound(uri.to_string()))?;
                    tx.overlay.insert(uri.to_string(), copy);
                }
                tx.overlay.get_mut(uri)
            }
            None => self.committed.get_mut(uri),
        };
        match slot {
            Some(Slot::Live(stored)) => Ok(stored),
            Some(Slot::Tombstone) => Err(TransportError::Deleted(uri.to_string())),
            None => Err(TransportError::NotFound(uri.to_string())),
        }
    }

    fn put(&mut self, uri: &str, slot: Slot) {
        match self.tx.as_mut() {
            Some(tx) => tx.overlay.insert(uri.to_string(), slot),
            None => self.committed.insert(uri.to_string(), slot),
        };
    }

    fn mark_written(&mut self, uri: &str) {
        if let Some(tx) = self.tx.as_mut() {
            tx.written.insert(uri.to_string());
        }
    }

    fn is_transactional(&self) -> bool {
        self.tx.is_some()
    }
}

/// A transactional repository held entirely in memory.
pub struct MemoryRepository {
    base_uri: String,
    vocabulary: Vocabulary,
    ttl: Duration,
    state: Mutex<State>,
}

impl MemoryRepository {
    pub fn new(base_uri: impl Into<String>, vocabulary: Vocabulary) -> Self {
        Self {
            base_uri: base_uri.into().trim_end_matches('/').to_string(),
            vocabulary,
            ttl: DEFAULT_TTL,
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    /// Make the next `n` calls fail with a transient error.
    pub async fn fail_next(&self, n: u32) {
        self.state.lock().await.fail_next = n;
    }

    pub async fn keep_alive_count(&self) -> usize {
        self.state.lock().await.keep_alive_calls
    }

    pub async fn commit_count(&self) -> usize {
        self.state.lock().await.commits
    }

    /// Committed live objects, ordered by URI.
    pub async fn objects(&self) -> Vec<RepositoryObject> {
        let state = self.state.lock().await;
        state
            .objects
            .values()
            .filter_map(|slot| match slot {
                Slot::Live(stored) => Some(stored.object.clone()),
                Slot::Tombstone => None,
            })
            .collect()
    }

    pub async fn content(&self, uri: &str) -> Option<Content> {
        let state = self.state.lock().await;
        match state.objects.get(uri) {
            Some(Slot::Live(stored)) => stored.content.clone(),
            _ => None,
        }
    }

    /// The metadata the search index currently holds for `uri`.
    pub async fn index_entry(&self, uri: &str) -> Option<Metadata> {
        self.state.lock().await.index.get(uri).cloned()
    }

    fn location(&self, request: &CreateRequest) -> String {
        let parent = request
            .parent
            .as_deref()
            .map(|p| p.trim_end_matches('/'))
            .unwrap_or(&self.base_uri);
        let slug = request
            .slug
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        format!("{}/{}", parent, slug)
    }

    fn check_unique_identifiers(&self, objects: &Objects) -> TransportResult<()> {
        let mut owners: HashMap<&str, &str> = HashMap::new();
        for (uri, slot) in objects {
            let Slot::Live(stored) = slot else { continue };
            for value in stored
                .object
                .metadata
                .values(&self.vocabulary.identifier_property)
                .filter_map(Term::as_iri)
            {
                if let Some(other) = owners.insert(value, uri.as_str()) {
                    return Err(TransportError::Rejected(format!(
                        "identifier {} is held by both {} and {}",
                        value, other, uri
                    )));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RepositoryTransport for MemoryRepository {
    async fn begin_transaction(&self) -> TransportResult<TransactionId> {
        let mut state = self.state.lock().await;
        state.inject_failure()?;
        let id = TransactionId(format!("{}/tx:{}", self.base_uri, Uuid::new_v4()));
        state
            .transactions
            .insert(id.clone(), TxState::new(Instant::now() + self.ttl));
        debug!("Opened transaction {}", id);
        Ok(id)
    }

    async fn keep_alive(&self, tx: &TransactionId) -> TransportResult<()> {
        let mut state = self.state.lock().await;
        state.inject_failure()?;
        state.check_open(tx)?;
        let expires_at = Instant::now() + self.ttl;
        if let Some(tx_state) = state.transactions.get_mut(tx) {
            tx_state.expires_at = expires_at;
        }
        state.keep_alive_calls += 1;
        Ok(())
    }

    async fn commit(&self, tx: &TransactionId) -> TransportResult<()> {
        let mut state = self.state.lock().await;
        state.inject_failure()?;
        state.check_open(tx)?;
        let tx_state = state
            .transactions
            .remove(tx)
            .ok_or_else(|| TransportError::NotFound(format!("transaction {}", tx)))?;

        let mut merged = state.objects.clone();
        merged.extend(tx_state.overlay);
        self.check_unique_identifiers(&merged)?;
        state.objects = merged;

        let recreated = tx_state.recreated;
        let refreshed: Vec<String> = tx_state
            .written
            .into_iter()
            .chain(tx_state.deleted)
            .filter(|uri| !recreated.contains(uri))
            .collect();
        state.refresh_index(refreshed);
        state.commits += 1;
        debug!("Committed transaction {}", tx);
        Ok(())
    }

    async fn rollback(&self, tx: &TransactionId) -> TransportResult<()> {
        let mut state = self.state.lock().await;
        state.inject_failure()?;
        state
            .transactions
            .remove(tx)
            .map(|_| ())
            .ok_or_else(|| TransportError::NotFound(format!("transaction {}", tx)))
    }

    async fn create_object(
        &self,
        tx: Option<&TransactionId>,
        request: CreateRequest,
    ) -> TransportResult<RepositoryObject> {
        let mut state = self.state.lock().await;
        state.inject_failure()?;
        let uri = self.location(&request);
        let mut scope = state.scope(tx)?;

        if let Some(parent) = request.parent.as_deref() {
            scope.live(parent.trim_end_matches('/'))?;
        }
        match scope.slot(&uri) {
            Some(Slot::Live(_)) => {
                return Err(TransportError::Rejected(format!("{} already exists", uri)))
            }
            Some(Slot::Tombstone) => {
                if let Some(tx_state) = scope.tx.as_mut() {
                    if tx_state.deleted.contains(&uri) {
                        tx_state.recreated.insert(uri.clone());
                    }
                }
            }
            None => {}
        }

        let canonical_id = self.vocabulary.canonical_id(&Uuid::new_v4().to_string());
        let mut metadata = request.metadata;
        metadata.retain(|p, v| {
            !(p == self.vocabulary.identifier_property
                && v.as_iri().is_some_and(|id| self.vocabulary.is_canonical(id)))
        });
        metadata.insert(
            &self.vocabulary.identifier_property,
            Term::iri(&canonical_id),
        );
        metadata.insert(
            CREATED_PROPERTY,
            Term::typed_literal(
                Utc::now().to_rfc3339(),
                "http://www.w3.org/2001/XMLSchema#dateTime",
            ),
        );

        let object = RepositoryObject::new(&uri, canonical_id, metadata);
        scope.put(
            &uri,
            Slot::Live(StoredObject {
                object: object.clone(),
                content: request.content,
            }),
        );
        scope.mark_written(&uri);
        if !scope.is_transactional() {
            state.refresh_index([uri]);
        }
        Ok(object)
    }

    async fn get_object(
        &self,
        tx: Option<&TransactionId>,
        uri: &str,
    ) -> TransportResult<RepositoryObject> {
        let mut state = self.state.lock().await;
        state.inject_failure()?;
        let scope = state.scope(tx)?;
        scope.live(uri).map(|stored| stored.object.clone())
    }

    async fn patch_metadata(
        &self,
        tx: Option<&TransactionId>,
        uri: &str,
        patch: &MetadataPatch,
    ) -> TransportResult<RepositoryObject> {
        let mut state = self.state.lock().await;
        state.inject_failure()?;
        let mut scope = state.scope(tx)?;
        let stored = scope.live_mut(uri)?;

        let canonical = Term::iri(&stored.object.canonical_id);
        if patch
            .delete
            .contains(&self.vocabulary.identifier_property, &canonical)
        {
            return Err(TransportError::Rejected(format!(
                "canonical id of {} is immutable",
                uri
            )));
        }
        let mut delete = patch.delete.clone();
        delete.retain(|p, _| !self.vocabulary.is_server_managed(p));
        let mut insert = patch.insert.clone();
        insert.retain(|p, _| !self.vocabulary.is_server_managed(p));

        stored.object.metadata.subtract(&delete);
        stored.object.metadata.extend_from(&insert);
        let object = stored.object.clone();

        scope.mark_written(uri);
        if !scope.is_transactional() {
            state.refresh_index([uri.to_string()]);
        }
        Ok(object)
    }

    async fn replace_metadata(
        &self,
        tx: Option<&TransactionId>,
        uri: &str,
        metadata: &Metadata,
    ) -> TransportResult<RepositoryObject> {
        let mut state = self.state.lock().await;
        state.inject_failure()?;
        let mut scope = state.scope(tx)?;
        let stored = scope.live_mut(uri)?;

        let canonical = Term::iri(&stored.object.canonical_id);
        let mut replaced = stored.object.metadata.clone();
        replaced.retain(|p, v| {
            self.vocabulary.is_server_managed(p)
                || (p == self.vocabulary.identifier_property && *v == canonical)
        });
        for (p, v) in metadata.iter() {
            if !self.vocabulary.is_server_managed(p) {
                replaced.insert(p, v.clone());
            }
        }
        stored.object.metadata = replaced;
        let object = stored.object.clone();

        scope.mark_written(uri);
        if !scope.is_transactional() {
            state.refresh_index([uri.to_string()]);
        }
        Ok(object)
    }

    async fn replace_content(
        &self,
        tx: Option<&TransactionId>,
        uri: &str,
        content: &Content,
    ) -> TransportResult<RepositoryObject> {
        let mut state = self.state.lock().await;
        state.inject_failure()?;
        let mut scope = state.scope(tx)?;
        let stored = scope.live_mut(uri)?;
        stored.content = Some(content.clone());
        let object = stored.object.clone();

        scope.mark_written(uri);
        if !scope.is_transactional() {
            state.refresh_index([uri.to_string()]);
        }
        Ok(object)
    }

    async fn delete_object(&self, tx: Option<&TransactionId>, uri: &str) -> TransportResult<()> {
        let mut state = self.state.lock().await;
        state.inject_failure()?;
        let mut scope = state.scope(tx)?;
        scope.live(uri)?;
        scope.put(uri, Slot::Tombstone);
        if let Some(tx_state) = scope.tx.as_mut() {
            tx_state.written.remove(uri);
            tx_state.deleted.insert(uri.to_string());
        }
        if !scope.is_transactional() {
            state.refresh_index([uri.to_string()]);
        }
        Ok(())
    }

    async fn query(&self, pattern: &TriplePattern) -> TransportResult<Vec<Triple>> {
        let mut state = self.state.lock().await;
        state.inject_failure()?;
        Ok(state
            .index
            .iter()
            .flat_map(|(uri, metadata)| metadata.to_triples(&Term::iri(uri)))
            .filter(|triple| pattern.matches(triple))
            .collect())
    }
}
