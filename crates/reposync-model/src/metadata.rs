//! Set-valued property multimap.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::term::{Term, Triple};

/// Metadata attached to one resource: property URI → set of values.
///
/// Values for a property form a set. Inserting a value twice is a no-op and
/// value order carries no meaning, which is what keeps repeated merges from
/// accumulating duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata {
    properties: BTreeMap<String, BTreeSet<Term>>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value; returns `false` if it was already present.
    pub fn insert(&mut self, property: impl Into<String>, value: Term) -> bool {
        self.properties
            .entry(property.into())
            .or_default()
            .insert(value)
    }

    /// Replace every value of `property` with `values`.
    pub fn set<I>(&mut self, property: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = Term>,
    {
        let values: BTreeSet<Term> = values.into_iter().collect();
        let property = property.into();
        if values.is_empty() {
            self.properties.remove(&property);
        } else {
            self.properties.insert(property, values);
        }
    }

    /// Remove a single value; returns `true` if it was present.
    pub fn remove(&mut self, property: &str, value: &Term) -> bool {
        let Some(values) = self.properties.get_mut(property) else {
            return false;
        };
        let removed = values.remove(value);
        if values.is_empty() {
            self.properties.remove(property);
        }
        removed
    }

    /// Remove a property with all of its values.
    pub fn remove_property(&mut self, property: &str) -> Option<BTreeSet<Term>> {
        self.properties.remove(property)
    }

    pub fn contains(&self, property: &str, value: &Term) -> bool {
        self.properties
            .get(property)
            .is_some_and(|values| values.contains(value))
    }

    pub fn has_property(&self, property: &str) -> bool {
        self.properties.contains_key(property)
    }

    pub fn values<'a>(&'a self, property: &str) -> impl Iterator<Item = &'a Term> + 'a {
        self.properties.get(property).into_iter().flatten()
    }

    /// The smallest value of a property, for properties used as single-valued.
    pub fn first(&self, property: &str) -> Option<&Term> {
        self.properties.get(property).and_then(|v| v.iter().next())
    }

    pub fn first_literal(&self, property: &str) -> Option<&str> {
        self.values(property).find_map(Term::as_literal)
    }

    pub fn properties(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    /// Every (property, value) pair.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Term)> {
        self.properties
            .iter()
            .flat_map(|(p, values)| values.iter().map(move |v| (p.as_str(), v)))
    }

    /// Number of (property, value) pairs.
    pub fn len(&self) -> usize {
        self.properties.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Pairs present in `self` but absent from `other`.
    pub fn difference(&self, other: &Metadata) -> Metadata {
        self.iter()
            .filter(|(p, v)| !other.contains(p, v))
            .map(|(p, v)| (p.to_string(), v.clone()))
            .collect()
    }

    /// Add every pair of `other` to `self`.
    pub fn extend_from(&mut self, other: &Metadata) {
        for (p, v) in other.iter() {
            self.insert(p, v.clone());
        }
    }

    /// Remove every pair of `other` from `self`.
    pub fn subtract(&mut self, other: &Metadata) {
        for (p, v) in other.iter() {
            self.remove(p, v);
        }
    }

    /// Keep only the pairs for which `keep` returns true.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str, &Term) -> bool,
    {
        self.properties.retain(|p, values| {
            values.retain(|v| keep(p, v));
            !values.is_empty()
        });
    }

    /// Rewrite values in place; a rewrite that collides with an existing
    /// value simply collapses into it.
    pub fn map_values<F>(&mut self, mut rewrite: F)
    where
        F: FnMut(&str, &Term) -> Option<Term>,
    {
        for (p, values) in self.properties.iter_mut() {
            let mut rewritten = BTreeSet::new();
            for v in std::mem::take(values) {
                match rewrite(p, &v) {
                    Some(new_value) => rewritten.insert(new_value),
                    None => rewritten.insert(v),
                };
            }
            *values = rewritten;
        }
    }

    /// Express this metadata as triples about `subject`.
    pub fn to_triples(&self, subject: &Term) -> Vec<Triple> {
        self.iter()
            .map(|(p, v)| Triple::new(subject.clone(), p, v.clone()))
            .collect()
    }
}

impl FromIterator<(String, Term)> for Metadata {
    fn from_iter<T: IntoIterator<Item = (String, Term)>>(iter: T) -> Self {
        let mut metadata = Metadata::new();
        metadata.extend(iter);
        metadata
    }
}

impl Extend<(String, Term)> for Metadata {
    fn extend<T: IntoIterator<Item = (String, Term)>>(&mut self, iter: T) {
        for (p, v) in iter {
            self.insert(p, v);
        }
    }
}
