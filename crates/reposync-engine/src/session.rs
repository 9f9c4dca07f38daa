//! Transactional session over a repository transport

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, info, warn};

use reposync_config::{SessionSettings, StaleIndexSetting};
use reposync_model::{Metadata, RepositoryObject, Term, Triple, TriplePattern, Vocabulary};

use crate::error::{Result, SyncError};
use crate::keepalive::KeepAlive;
use crate::merge::{MergePolicy, MetadataMerge, MetadataPatch};
use crate::producer::ObjectProducer;
use crate::retry::RetryPolicy;
use crate::transport::{Content, CreateRequest, RepositoryTransport, TransactionId};

/// What to do when identifier candidates stay ambiguous after direct
/// verification against the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StaleIndexPolicy {
    /// Report the ambiguity immediately
    #[default]
    Fail,
    /// Wait and re-query the index up to `attempts` more times
    Retry { attempts: u32, delay: Duration },
}

impl From<&StaleIndexSetting> for StaleIndexPolicy {
    fn from(setting: &StaleIndexSetting) -> Self {
        match *setting {
            StaleIndexSetting::Fail => StaleIndexPolicy::Fail,
            StaleIndexSetting::Retry { attempts, delay_ms } => StaleIndexPolicy::Retry {
                attempts,
                delay: Duration::from_millis(delay_ms),
            },
        }
    }
}

/// Configuration for a repository session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// How often the open transaction is renewed
    pub keep_alive_interval: Duration,
    pub retry: RetryPolicy,
    /// Commit and reopen once this many objects have been touched
    pub autocommit_every: Option<usize>,
    pub stale_index: StaleIndexPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            keep_alive_interval: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            autocommit_every: None,
            stale_index: StaleIndexPolicy::Fail,
        }
    }
}

impl From<&SessionSettings> for SessionOptions {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            keep_alive_interval: Duration::from_millis(settings.keep_alive_interval_ms),
            retry: RetryPolicy {
                max_attempts: settings.max_retries,
                backoff: Duration::from_millis(settings.retry_backoff_ms),
            },
            autocommit_every: settings.autocommit_every,
            stale_index: StaleIndexPolicy::from(&settings.stale_index),
        }
    }
}

/// Outcome of resolving a set of identifiers.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(RepositoryObject),
    NotFound,
    Ambiguous(Vec<RepositoryObject>),
}

struct ActiveTransaction {
    id: TransactionId,
    keep_alive: KeepAlive,
    /// Objects written in this transaction and the identifiers they held
    /// after the last write
    touched: BTreeMap<String, BTreeSet<String>>,
}

/// Owns at most one open transaction against a repository.
///
/// Writes go through the open transaction when there is one and straight
/// to committed state otherwise. Objects deleted and recreated inside a
/// transaction are rewritten after commit so the search index picks them up.
pub struct RepositorySession {
    transport: Arc<dyn RepositoryTransport>,
    vocabulary: Vocabulary,
    options: SessionOptions,
    active: Option<ActiveTransaction>,
    deleted: HashSet<String>,
    recreated: BTreeSet<String>,
}

impl RepositorySession {
    pub fn new(
        transport: Arc<dyn RepositoryTransport>,
        vocabulary: Vocabulary,
        options: SessionOptions,
    ) -> Self {
        Self {
            transport,
            vocabulary,
            options,
            active: None,
            deleted: HashSet::new(),
            recreated: BTreeSet::new(),
        }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn transaction_id(&self) -> Option<&TransactionId> {
        self.active.as_ref().map(|a| &a.id)
    }

    /// Number of distinct objects written in the open transaction.
    pub fn touched_count(&self) -> usize {
        self.active.as_ref().map_or(0, |a| a.touched.len())
    }

    /// Open a transaction and start renewing it in the background.
    pub async fn begin(&mut self) -> Result<()> {
        if let Some(active) = &self.active {
            return Err(SyncError::Transaction(format!(
                "transaction {} is already open",
                active.id
            )));
        }

        let transport = self.transport.as_ref();
        let id = self
            .options
            .retry
            .run("begin transaction", move || transport.begin_transaction())
            .await?;

        let keep_alive = KeepAlive::spawn(
            self.transport.clone(),
            id.clone(),
            self.options.keep_alive_interval,
        );
        info!("Began transaction {}", id);

        self.active = Some(ActiveTransaction {
            id,
            keep_alive,
            touched: BTreeMap::new(),
        });
        Ok(())
    }

    /// Commit the open transaction, then force reindexing of any objects
    /// that were deleted and recreated inside it.
    ///
    /// A failed commit is reported, never retried; the transaction is gone
    /// either way.
    pub async fn commit(&mut self) -> Result<()> {
        let recreated = self.commit_transaction().await?;
        if !recreated.is_empty() {
            self.reindex(&recreated).await?;
        }
        Ok(())
    }

    /// Commit without the reindex pass; returns the recreated objects.
    async fn commit_transaction(&mut self) -> Result<BTreeSet<String>> {
        let active = self.take_active()?;
        active.keep_alive.stop().await;

        let recreated = std::mem::take(&mut self.recreated);
        self.deleted.clear();

        self.transport.commit(&active.id).await.map_err(|e| {
            SyncError::Transaction(format!("commit of {} failed: {}", active.id, e))
        })?;
        info!(
            "Committed transaction {} ({} objects touched)",
            active.id,
            active.touched.len()
        );
        Ok(recreated)
    }

    pub async fn rollback(&mut self) -> Result<()> {
        let active = self.take_active()?;
        active.keep_alive.stop().await;
        self.deleted.clear();
        self.recreated.clear();

        let transport = self.transport.as_ref();
        let id = &active.id;
        self.options
            .retry
            .run("rollback", move || transport.rollback(id))
            .await?;
        info!("Rolled back transaction {}", active.id);
        Ok(())
    }

    /// Tear the session down, rolling back anything left uncommitted.
    pub async fn end(mut self) -> Result<()> {
        if self.active.is_some() {
            warn!("Session ended with an open transaction; rolling back");
            self.rollback().await?;
        }
        Ok(())
    }

    /// Commit and reopen when the autocommit bound has been reached.
    ///
    /// Callers invoke this only between logical operations. Returns whether
    /// a commit happened.
    pub async fn checkpoint(&mut self) -> Result<bool> {
        let Some(limit) = self.options.autocommit_every else {
            return Ok(false);
        };
        if self.active.is_none() || self.touched_count() < limit {
            return Ok(false);
        }

        info!(
            "Autocommit after {} touched objects (limit {})",
            self.touched_count(),
            limit
        );
        self.commit().await?;
        self.begin().await?;
        Ok(true)
    }

    pub async fn create_object(&mut self, request: CreateRequest) -> Result<RepositoryObject> {
        let tx = self.tx();
        let transport = self.transport.as_ref();
        let tx_ref = tx.as_ref();
        let request_ref = &request;
        let object = self
            .options
            .retry
            .run("create object", move || {
                transport.create_object(tx_ref, request_ref.clone())
            })
            .await?;

        if self.deleted.remove(&object.uri) {
            debug!("{} was deleted and recreated in this transaction", object.uri);
            self.recreated.insert(object.uri.clone());
        }
        self.record(&object);
        debug!("Created {} as {}", object.uri, object.canonical_id);
        Ok(object)
    }

    /// Create an object from any producer.
    pub async fn create_from(
        &mut self,
        producer: &dyn ObjectProducer,
        parent: Option<&str>,
    ) -> Result<RepositoryObject> {
        let request = CreateRequest::from_producer(producer, parent)?;
        self.create_object(request).await
    }

    pub async fn get_object(&self, uri: &str) -> Result<RepositoryObject> {
        let tx = self.tx();
        let transport = self.transport.as_ref();
        let tx_ref = tx.as_ref();
        self.options
            .retry
            .run("get object", move || transport.get_object(tx_ref, uri))
            .await
    }

    /// Apply a patch; an empty patch only re-reads the object.
    pub async fn apply_patch(
        &mut self,
        uri: &str,
        patch: &MetadataPatch,
    ) -> Result<RepositoryObject> {
        if patch.is_empty() {
            return self.get_object(uri).await;
        }

        let tx = self.tx();
        let transport = self.transport.as_ref();
        let tx_ref = tx.as_ref();
        let object = self
            .options
            .retry
            .run("patch metadata", move || {
                transport.patch_metadata(tx_ref, uri, patch)
            })
            .await?;
        self.record(&object);
        Ok(object)
    }

    /// Bring `current` in line with `incoming` under `policy`.
    pub async fn merge_metadata(
        &mut self,
        current: &RepositoryObject,
        incoming: &Metadata,
        policy: MergePolicy,
        merge: &MetadataMerge,
    ) -> Result<RepositoryObject> {
        let patch = merge.plan(policy, &current.metadata, incoming);
        debug!(
            "{:?} merge into {}: -{} +{}",
            policy,
            current.uri,
            patch.delete.len(),
            patch.insert.len()
        );
        self.apply_patch(&current.uri, &patch).await
    }

    pub async fn replace_metadata(
        &mut self,
        uri: &str,
        metadata: &Metadata,
    ) -> Result<RepositoryObject> {
        let tx = self.tx();
        let transport = self.transport.as_ref();
        let tx_ref = tx.as_ref();
        let object = self
            .options
            .retry
            .run("replace metadata", move || {
                transport.replace_metadata(tx_ref, uri, metadata)
            })
            .await?;
        self.record(&object);
        Ok(object)
    }

    /// Upload new binary content for an existing object.
    pub async fn replace_content(
        &mut self,
        uri: &str,
        content: &Content,
    ) -> Result<RepositoryObject> {
        let tx = self.tx();
        let transport = self.transport.as_ref();
        let tx_ref = tx.as_ref();
        let object = self
            .options
            .retry
            .run("replace content", move || {
                transport.replace_content(tx_ref, uri, content)
            })
            .await?;
        self.record(&object);
        debug!("Replaced content of {}", uri);
        Ok(object)
    }

    pub async fn delete_object(&mut self, uri: &str) -> Result<()> {
        let tx = self.tx();
        let transport = self.transport.as_ref();
        let tx_ref = tx.as_ref();
        self.options
            .retry
            .run("delete object", move || transport.delete_object(tx_ref, uri))
            .await?;

        if let Some(active) = self.active.as_mut() {
            active.touched.insert(uri.to_string(), BTreeSet::new());
            self.deleted.insert(uri.to_string());
        }
        debug!("Deleted {}", uri);
        Ok(())
    }

    /// Query the search index. Uncommitted writes are not visible here.
    pub async fn query(&self, pattern: &TriplePattern) -> Result<Vec<Triple>> {
        let transport = self.transport.as_ref();
        self.options
            .retry
            .run("query", move || transport.query(pattern))
            .await
    }

    /// Resolve identifiers to the objects holding them.
    ///
    /// Candidates come from the search index and from objects written in
    /// the open transaction; each is re-read directly so a stale index
    /// entry cannot produce a false match.
    pub async fn lookup(&self, identifiers: &[String]) -> Result<Lookup> {
        let mut retries = 0;
        loop {
            let mut found = self.verified_candidates(identifiers).await?;
            match found.len() {
                0 => return Ok(Lookup::NotFound),
                1 => {
                    let object = found.remove(0);
                    return Ok(Lookup::Found(object));
                }
                _ => match self.options.stale_index {
                    StaleIndexPolicy::Retry { attempts, delay } if retries < attempts => {
                        retries += 1;
                        debug!(
                            "{} candidates for {:?}; re-querying ({}/{})",
                            found.len(),
                            identifiers,
                            retries,
                            attempts
                        );
                        time::sleep(delay).await;
                    }
                    _ => return Ok(Lookup::Ambiguous(found)),
                },
            }
        }
    }

    /// Like [`RepositorySession::lookup`], but a missing or ambiguous match
    /// is an error.
    pub async fn find_by_identifiers(&self, identifiers: &[String]) -> Result<RepositoryObject> {
        match self.lookup(identifiers).await? {
            Lookup::Found(object) => Ok(object),
            Lookup::NotFound => Err(SyncError::NotFound {
                identifiers: identifiers.to_vec(),
            }),
            Lookup::Ambiguous(candidates) => Err(SyncError::AmbiguousMatch {
                identifiers: identifiers.to_vec(),
                candidates: candidates.into_iter().map(|o| o.uri).collect(),
            }),
        }
    }

    async fn verified_candidates(&self, identifiers: &[String]) -> Result<Vec<RepositoryObject>> {
        let wanted: BTreeSet<&str> = identifiers.iter().map(String::as_str).collect();
        let mut candidates = BTreeSet::new();

        for id in identifiers {
            let pattern = TriplePattern::with_predicate(&self.vocabulary.identifier_property)
                .object(Term::iri(id));
            for triple in self.query(&pattern).await? {
                if let Some(subject) = triple.subject.as_iri() {
                    candidates.insert(subject.to_string());
                }
            }
        }
        if let Some(active) = &self.active {
            for (uri, ids) in &active.touched {
                if ids.iter().any(|id| wanted.contains(id.as_str())) {
                    candidates.insert(uri.clone());
                }
            }
        }

        let mut verified = Vec::new();
        for uri in candidates {
            let object = match self.get_object(&uri).await {
                Ok(object) => object,
                Err(SyncError::NotFound { .. }) | Err(SyncError::Deleted(_)) => {
                    debug!("Index candidate {} no longer exists", uri);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if object
                .identifiers(&self.vocabulary)
                .iter()
                .any(|id| wanted.contains(id.as_str()))
            {
                verified.push(object);
            } else {
                debug!("Index candidate {} no longer holds {:?}", uri, identifiers);
            }
        }
        Ok(verified)
    }

    async fn reindex(&mut self, uris: &BTreeSet<String>) -> Result<()> {
        info!("Reindexing {} recreated objects", uris.len());
        self.begin().await?;
        for uri in uris {
            let object = self.get_object(uri).await?;
            self.replace_metadata(uri, &object.metadata).await?;
        }
        self.commit_transaction().await.map(|_| ())
    }

    fn tx(&self) -> Option<TransactionId> {
        self.active.as_ref().map(|a| a.id.clone())
    }

    fn take_active(&mut self) -> Result<ActiveTransaction> {
        self.active
            .take()
            .ok_or_else(|| SyncError::Transaction("no open transaction".to_string()))
    }

    fn record(&mut self, object: &RepositoryObject) {
        if let Some(active) = self.active.as_mut() {
            active
                .touched
                .insert(object.uri.clone(), object.identifiers(&self.vocabulary));
        }
    }
}

impl Drop for RepositorySession {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            warn!(
                "Session dropped with transaction {} still open; it will expire",
                active.id
            );
        }
    }
}
