//! Transport trait for repository access.
//!
//! This module defines the trait that must be implemented by any repository
//! backend the engine writes to. Wire framing, authentication and status
//! codes live entirely behind it; implementations translate failures into
//! [`TransportError`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use reposync_model::{Metadata, RepositoryObject, Triple, TriplePattern};

use crate::error::{Result, TransportResult};
use crate::merge::MetadataPatch;
use crate::producer::ObjectProducer;

/// Handle for a server-side transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub String);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Binary content uploaded with an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Everything needed to create one object.
#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    /// Container the object is created under; the repository root if `None`
    pub parent: Option<String>,
    /// Requested path segment; the server picks one if `None`
    pub slug: Option<String>,
    pub metadata: Metadata,
    pub content: Option<Content>,
}

impl CreateRequest {
    pub fn new(metadata: Metadata) -> Self {
        Self {
            metadata,
            ..Self::default()
        }
    }

    pub fn under(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn from_producer(producer: &dyn ObjectProducer, parent: Option<&str>) -> Result<Self> {
        Ok(Self {
            parent: parent.map(str::to_string),
            slug: producer.slug(),
            metadata: producer.metadata()?,
            content: producer.binary()?,
        })
    }
}

/// Operations the engine needs from a repository.
///
/// Methods taking `tx` act inside that transaction when it is `Some`, and
/// directly against committed state otherwise. [`RepositoryTransport::query`]
/// always reads the search index, which only reflects committed writes.
#[async_trait]
pub trait RepositoryTransport: Send + Sync {
    async fn begin_transaction(&self) -> TransportResult<TransactionId>;

    /// Renew a transaction before its server-side expiry.
    async fn keep_alive(&self, tx: &TransactionId) -> TransportResult<()>;

    async fn commit(&self, tx: &TransactionId) -> TransportResult<()>;

    async fn rollback(&self, tx: &TransactionId) -> TransportResult<()>;

    async fn create_object(
        &self,
        tx: Option<&TransactionId>,
        request: CreateRequest,
    ) -> TransportResult<RepositoryObject>;

    async fn get_object(
        &self,
        tx: Option<&TransactionId>,
        uri: &str,
    ) -> TransportResult<RepositoryObject>;

    async fn patch_metadata(
        &self,
        tx: Option<&TransactionId>,
        uri: &str,
        patch: &MetadataPatch,
    ) -> TransportResult<RepositoryObject>;

    /// Replace all user metadata; server-managed values are kept.
    async fn replace_metadata(
        &self,
        tx: Option<&TransactionId>,
        uri: &str,
        metadata: &Metadata,
    ) -> TransportResult<RepositoryObject>;

    /// Replace the binary content of an existing object.
    async fn replace_content(
        &self,
        tx: Option<&TransactionId>,
        uri: &str,
        content: &Content,
    ) -> TransportResult<RepositoryObject>;

    async fn delete_object(&self, tx: Option<&TransactionId>, uri: &str) -> TransportResult<()>;

    /// Read-only triple-pattern query against the search index.
    async fn query(&self, pattern: &TriplePattern) -> TransportResult<Vec<Triple>>;
}
