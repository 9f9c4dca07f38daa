//! Property and namespace configuration shared by every component.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How an identifier value is treated during version rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierClass {
    /// The single identifier in the reserved namespace naming an object
    Canonical,
    /// UUID-shaped identifiers stay with the object they were minted for
    Uuid,
    /// Persistent identifiers (handles, DOIs); migrated only on request
    Persistent,
    /// Every other externally sourced identifier
    External,
}

/// The URIs the engine needs to interpret metadata.
///
/// None of these are baked into the engine; a deployment supplies them once
/// and every component receives the same vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vocabulary {
    /// Prefix of canonical ids, e.g. `info:reposync/object/`
    pub canonical_namespace: String,
    /// Property whose values are an object's identifiers
    pub identifier_property: String,
    pub title_property: String,
    /// Child-of-container relation
    pub parent_property: String,
    /// Prefix classifying identifiers as persistent
    pub persistent_id_namespace: String,
    /// Link from a superseded object to its successor
    pub newer_version_property: String,
    /// Link from a successor back to the object it superseded
    pub older_version_property: String,
    pub location_property: String,
    pub mime_type_property: String,
    pub size_property: String,
    pub digest_property: String,
    pub modified_property: String,
    /// Property prefixes owned by the repository server; never deleted
    pub server_managed_prefixes: Vec<String>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            canonical_namespace: "info:reposync/object/".to_string(),
            identifier_property: "http://purl.org/dc/terms/identifier".to_string(),
            title_property: "http://purl.org/dc/terms/title".to_string(),
            parent_property: "http://purl.org/dc/terms/isPartOf".to_string(),
            persistent_id_namespace: "https://hdl.handle.net/".to_string(),
            newer_version_property: "http://purl.org/dc/terms/isReplacedBy".to_string(),
            older_version_property: "http://purl.org/dc/terms/replaces".to_string(),
            location_property: "http://purl.org/dc/terms/source".to_string(),
            mime_type_property: "http://purl.org/dc/terms/format".to_string(),
            size_property: "http://www.w3.org/ns/dcat#byteSize".to_string(),
            digest_property: "http://www.loc.gov/premis/rdf/v1#hasMessageDigest".to_string(),
            modified_property: "http://purl.org/dc/terms/modified".to_string(),
            server_managed_prefixes: vec![
                "http://fedora.info/definitions/v4/repository#".to_string(),
                "http://www.w3.org/ns/ldp#".to_string(),
            ],
        }
    }
}

impl Vocabulary {
    pub fn is_canonical(&self, identifier: &str) -> bool {
        identifier.starts_with(&self.canonical_namespace)
    }

    /// Build the canonical id for a freshly minted local part.
    pub fn canonical_id(&self, local: &str) -> String {
        format!("{}{}", self.canonical_namespace, local)
    }

    pub fn is_server_managed(&self, property: &str) -> bool {
        self.server_managed_prefixes
            .iter()
            .any(|prefix| property.starts_with(prefix.as_str()))
    }

    pub fn classify(&self, identifier: &str) -> IdentifierClass {
        if self.is_canonical(identifier) {
            IdentifierClass::Canonical
        } else if is_uuid_shaped(identifier) {
            IdentifierClass::Uuid
        } else if !self.persistent_id_namespace.is_empty()
            && identifier.starts_with(&self.persistent_id_namespace)
        {
            IdentifierClass::Persistent
        } else {
            IdentifierClass::External
        }
    }
}

/// True when the last path/URN segment of `identifier` parses as a UUID.
pub fn is_uuid_shaped(identifier: &str) -> bool {
    let tail = identifier
        .rsplit(|c| c == ':' || c == '/' || c == '#')
        .next()
        .unwrap_or(identifier);
    Uuid::parse_str(tail).is_ok()
}
