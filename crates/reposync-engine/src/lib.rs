//! Synchronization engine for graph-based digital object repositories.
//!
//! The engine keeps a repository in step with outside sources of truth
//! while every object keeps exactly one canonical identity.
//!
//! # Features
//!
//! - **Transactional sessions**: [`RepositorySession`] owns one transaction,
//!   keeps it alive in the background and retries transient failures.
//! - **Identity resolution**: [`IdentityCache`] maps any identifier an object
//!   carries to its canonical id and detects duplicates.
//! - **Metadata merge**: [`MetadataMerge`] plans delete/insert patches under
//!   additive, replace or diff-update policies.
//! - **Graph import**: [`GraphImporter`] writes a document of interlinked
//!   nodes in dependency order, rewriting references to canonical ids.
//! - **Versioned indexing**: [`VersionedIndexer`] mirrors a directory tree
//!   and rotates objects whose content changed into new versions.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use reposync_engine::{GraphImporter, IdentityCache, MemoryRepository, RepositorySession};
//!
//! let repo = Arc::new(MemoryRepository::new("mem:/rest", vocab.clone()));
//! let mut session = RepositorySession::new(repo, vocab.clone(), Default::default());
//! let mut cache = IdentityCache::new(&vocab);
//!
//! session.begin().await?;
//! let report = GraphImporter::new(&vocab, Default::default())
//!     .import(&mut session, &mut cache, graph)
//!     .await?;
//! session.commit().await?;
//! ```

pub mod error;
pub mod identity;
pub mod importer;
pub mod indexer;
pub mod keepalive;
pub mod memory;
pub mod merge;
pub mod producer;
pub mod retry;
pub mod session;
pub mod transport;

pub use error::{Result, SyncError, TransportError, TransportResult};
pub use identity::{IdentityCache, Resolution};
pub use importer::{GraphImporter, ImportOptions, ImportReport};
pub use indexer::{
    EntryFilter, FileEntry, IndexOptions, IndexReport, MetadataLookup, NoMetadata,
    SidecarLookup, VersionLink, VersionedIndexer,
};
pub use keepalive::KeepAlive;
pub use memory::MemoryRepository;
pub use merge::{MergePolicy, MetadataMerge, MetadataPatch};
pub use producer::ObjectProducer;
pub use retry::RetryPolicy;
pub use session::{Lookup, RepositorySession, SessionOptions, StaleIndexPolicy};
pub use transport::{Content, CreateRequest, RepositoryTransport, TransactionId};
