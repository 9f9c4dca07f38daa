//! Data model shared by the reposync crates.
//!
//! Everything the engine moves around is expressed as RDF-style terms:
//! a [`RepositoryObject`] carries a set-valued [`Metadata`] multimap keyed by
//! property URI, and a [`SourceGraph`] is the parsed document being imported.
//! Which property holds identifiers, and which namespace is canonical, is
//! never hardcoded; it is supplied through a [`Vocabulary`].

pub mod metadata;
pub mod object;
pub mod term;
pub mod vocabulary;

pub use metadata::Metadata;
pub use object::{RepositoryObject, SourceGraph, SourceNode};
pub use term::{Literal, Term, Triple, TriplePattern};
pub use vocabulary::{IdentifierClass, Vocabulary};
