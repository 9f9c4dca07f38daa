//! Things that can become repository objects.

use reposync_model::{Metadata, SourceNode, Term};

use crate::error::Result;
use crate::transport::Content;

/// A source of one repository object: an imported graph node, a file on
/// disk, a record pulled from an external tracker.
pub trait ObjectProducer: Send + Sync {
    /// Stable external identifier of the produced object.
    fn id(&self) -> String;

    /// Preferred path segment under the parent container.
    fn slug(&self) -> Option<String> {
        None
    }

    fn metadata(&self) -> Result<Metadata>;

    fn binary(&self) -> Result<Option<Content>>;
}

impl ObjectProducer for SourceNode {
    fn id(&self) -> String {
        match &self.subject {
            Term::Iri(iri) => iri.clone(),
            other => other.to_string(),
        }
    }

    fn metadata(&self) -> Result<Metadata> {
        Ok(self.properties.clone())
    }

    fn binary(&self) -> Result<Option<Content>> {
        Ok(None)
    }
}
