//! Merging locally held metadata with the version stored in the repository.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use reposync_model::{Metadata, Vocabulary};

/// How incoming metadata is combined with what is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Write new values only; never delete
    Additive,
    /// Delete values that disappeared from the incoming description, then
    /// add the new ones
    DiffUpdate,
    /// Delete every unprotected stored value, then write all incoming values
    Overwrite,
}

/// A delete-then-insert change to one object's metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataPatch {
    pub delete: Metadata,
    pub insert: Metadata,
}

impl MetadataPatch {
    pub fn insert_only(insert: Metadata) -> Self {
        Self {
            delete: Metadata::new(),
            insert,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.delete.is_empty() && self.insert.is_empty()
    }

    /// Apply to a metadata set: deletions first, then insertions.
    pub fn apply_to(&self, metadata: &mut Metadata) {
        metadata.subtract(&self.delete);
        metadata.extend_from(&self.insert);
    }
}

/// Plans patches under a [`MergePolicy`] while keeping protected
/// properties intact.
///
/// The identifier property is always protected, as is anything the
/// vocabulary marks server-managed.
#[derive(Debug, Clone)]
pub struct MetadataMerge {
    vocabulary: Vocabulary,
    protected: BTreeSet<String>,
}

impl MetadataMerge {
    pub fn new(vocabulary: &Vocabulary) -> Self {
        let mut protected = BTreeSet::new();
        protected.insert(vocabulary.identifier_property.clone());
        Self {
            vocabulary: vocabulary.clone(),
            protected,
        }
    }

    pub fn with_protected<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protected.extend(properties.into_iter().map(Into::into));
        self
    }

    pub fn is_protected(&self, property: &str) -> bool {
        self.protected.contains(property) || self.vocabulary.is_server_managed(property)
    }

    /// Compute the patch that brings `current` in line with `incoming`.
    ///
    /// For [`MergePolicy::DiffUpdate`], `current` is the snapshot fetched
    /// before the local edit; for [`MergePolicy::Overwrite`] it should be
    /// what is stored right now.
    pub fn plan(&self, policy: MergePolicy, current: &Metadata, incoming: &Metadata) -> MetadataPatch {
        match policy {
            MergePolicy::Additive => MetadataPatch::insert_only(incoming.difference(current)),
            MergePolicy::DiffUpdate => {
                let mut delete = current.difference(incoming);
                delete.retain(|p, _| !self.is_protected(p));
                MetadataPatch {
                    delete,
                    insert: incoming.difference(current),
                }
            }
            MergePolicy::Overwrite => {
                let mut delete = current.clone();
                delete.retain(|p, _| !self.is_protected(p));
                MetadataPatch {
                    delete,
                    insert: incoming.clone(),
                }
            }
        }
    }

    /// The merged result of applying [`MetadataMerge::plan`] to `current`.
    pub fn merge(&self, policy: MergePolicy, current: &Metadata, incoming: &Metadata) -> Metadata {
        let mut merged = current.clone();
        self.plan(policy, current, incoming).apply_to(&mut merged);
        merged
    }
}
