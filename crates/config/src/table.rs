//! # Category Table
//!
//! Ordered membership table mapping workload names to business categories.
//! Entries are evaluated in declaration order and the first set containing a
//! name wins, so overlapping sets resolve deterministically.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One named category and the workload names that belong to it
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CategoryEntry {
    /// Category value written to the classification label (e.g. "chief")
    pub name: String,

    /// Workload names belonging to this category
    #[serde(default)]
    pub members: BTreeSet<String>,
}

impl CategoryEntry {
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            members: members.into_iter().map(Into::into).collect(),
        }
    }
}

/// A workload name present in more than one category set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Overlap {
    /// The ambiguous workload name
    pub member: String,

    /// Categories containing the name, in table order. The first one wins.
    pub categories: Vec<String>,
}

/// Ordered category table plus the fallback used when no set matches
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryTable {
    /// Category sets in evaluation order
    #[serde(default)]
    pub categories: Vec<CategoryEntry>,

    /// Category assigned to workloads absent from every set
    pub fallback: String,
}

impl CategoryTable {
    #[must_use]
    pub fn new(categories: Vec<CategoryEntry>, fallback: impl Into<String>) -> Self {
        Self {
            categories,
            fallback: fallback.into(),
        }
    }

    /// Category of the first entry containing `name`, if any
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.categories
            .iter()
            .find(|entry| entry.members.contains(name))
            .map(|entry| entry.name.as_str())
    }

    /// Every name listed under more than one category
    #[must_use]
    pub fn overlaps(&self) -> Vec<Overlap> {
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut overlaps = Vec::new();

        for entry in &self.categories {
            for member in &entry.members {
                if !seen.insert(member.as_str()) {
                    continue;
                }

                let categories: Vec<String> = self
                    .categories
                    .iter()
                    .filter(|candidate| candidate.members.contains(member))
                    .map(|candidate| candidate.name.clone())
                    .collect();

                if categories.len() > 1 {
                    overlaps.push(Overlap {
                        member: member.clone(),
                        categories,
                    });
                }
            }
        }

        overlaps
    }

    /// Every category value this table can produce, fallback last
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.categories
            .iter()
            .map(|entry| entry.name.as_str())
            .chain(std::iter::once(self.fallback.as_str()))
    }
}
