//! Persisted repository objects and in-memory source nodes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::metadata::Metadata;
use crate::term::{Term, Triple};
use crate::vocabulary::Vocabulary;

/// An object persisted in the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryObject {
    /// Location of the object in the repository
    pub uri: String,
    /// The identifier in the canonical namespace
    pub canonical_id: String,
    pub metadata: Metadata,
}

impl RepositoryObject {
    pub fn new(uri: impl Into<String>, canonical_id: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            uri: uri.into(),
            canonical_id: canonical_id.into(),
            metadata,
        }
    }

    /// Every identifier value the object carries, canonical id included.
    pub fn identifiers(&self, vocab: &Vocabulary) -> BTreeSet<String> {
        self.metadata
            .values(&vocab.identifier_property)
            .filter_map(Term::as_iri)
            .map(str::to_string)
            .collect()
    }

    pub fn title(&self, vocab: &Vocabulary) -> Option<&str> {
        self.metadata.first_literal(&vocab.title_property)
    }
}

/// A node of a metadata graph being imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceNode {
    /// IRI or blank-node subject, as it appeared in the document
    pub subject: Term,
    pub properties: Metadata,
}

impl SourceNode {
    pub fn new(subject: Term) -> Self {
        Self {
            subject,
            properties: Metadata::new(),
        }
    }

    pub fn with(mut self, property: impl Into<String>, value: Term) -> Self {
        self.properties.insert(property, value);
        self
    }

    pub fn is_blank(&self) -> bool {
        self.subject.is_blank()
    }

    /// Identifier values asserted on this node, in sorted order.
    pub fn identifiers(&self, vocab: &Vocabulary) -> Vec<String> {
        self.properties
            .values(&vocab.identifier_property)
            .filter_map(Term::as_iri)
            .map(str::to_string)
            .collect()
    }

    /// Whether the node says anything beyond its identifiers.
    pub fn has_descriptive_properties(&self, vocab: &Vocabulary) -> bool {
        self.properties
            .properties()
            .any(|p| p != vocab.identifier_property)
    }
}

/// A parsed metadata document, grouped by subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceGraph {
    nodes: Vec<SourceNode>,
}

impl SourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group triples by subject, keeping first-seen subject order.
    pub fn from_triples<I>(triples: I) -> Self
    where
        I: IntoIterator<Item = Triple>,
    {
        let mut nodes: Vec<SourceNode> = Vec::new();
        let mut index: HashMap<Term, usize> = HashMap::new();
        for triple in triples {
            let slot = *index.entry(triple.subject.clone()).or_insert_with(|| {
                nodes.push(SourceNode::new(triple.subject.clone()));
                nodes.len() - 1
            });
            nodes[slot].properties.insert(triple.predicate, triple.object);
        }
        Self { nodes }
    }

    /// Add a node, folding its properties into an existing node with the
    /// same subject.
    pub fn push(&mut self, node: SourceNode) {
        match self.nodes.iter_mut().find(|n| n.subject == node.subject) {
            Some(existing) => existing.properties.extend_from(&node.properties),
            None => self.nodes.push(node),
        }
    }

    pub fn nodes(&self) -> &[SourceNode] {
        &self.nodes
    }

    pub fn into_nodes(self) -> Vec<SourceNode> {
        self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
