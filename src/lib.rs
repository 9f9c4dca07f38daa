//! reposync keeps a graph-based digital object repository in step with
//! outside sources of truth: metadata graphs, directory trees and anything
//! else that can produce objects.
//!
//! This crate re-exports the workspace members:
//!
//! - [`model`]: terms, metadata, objects and the vocabulary that names them
//! - [`config`]: the TOML configuration document
//! - [`engine`]: sessions, identity resolution, merge, import and indexing

pub mod logging;

pub use reposync_config as config;
pub use reposync_engine as engine;
pub use reposync_model as model;

pub use logging::init_logging;
pub use reposync_config::SyncConfig;
pub use reposync_engine::{
    GraphImporter, IdentityCache, MemoryRepository, RepositorySession, SyncError,
    VersionedIndexer,
};
pub use reposync_model::{Metadata, RepositoryObject, SourceGraph, Term, Vocabulary};
