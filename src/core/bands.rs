//! `BandSet`: the band names captured from one image.
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Immutable set of band names. Membership is case-sensitive and exact.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct BandSet {
    names: Vec<String>,
    index: BTreeSet<String>,
}

impl BandSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ordered = Vec::new();
        let mut index = BTreeSet::new();
        for name in names {
            let name = name.into();
            if index.insert(name.clone()) {
                ordered.push(name);
            }
        }
        Self {
            names: ordered,
            index,
        }
    }

    pub fn contains(&self, band: &str) -> bool {
        self.index.contains(band)
    }

    pub fn any_with_prefix(&self, prefix: &str) -> bool {
        self.names.iter().any(|b| b.starts_with(prefix))
    }

    pub fn contains_all(&self, bands: &[&str]) -> bool {
        bands.iter().all(|b| self.contains(b))
    }

    /// Band names in capture order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl std::fmt::Display for BandSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.names.join(", "))
    }
}

impl From<Vec<String>> for BandSet {
    fn from(names: Vec<String>) -> Self {
        BandSet::new(names)
    }
}

impl From<BandSet> for Vec<String> {
    fn from(bands: BandSet) -> Self {
        bands.names
    }
}

impl<S: Into<String>> FromIterator<S> for BandSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        BandSet::new(iter)
    }
}
