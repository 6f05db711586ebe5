use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::record::{PlantRecord, ProjectId};

/// Identity of a plant across runs: `(source, first unit id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlantKey {
    pub source: String,
    pub id: String,
}

impl PlantKey {
    pub fn new(source: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for PlantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.id)
    }
}

/// An accepted cross-source match between two plants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchEdge {
    pub left: PlantKey,
    pub right: PlantKey,
    pub score: f64,
}

impl MatchEdge {
    /// Build an edge with endpoints ordered so that `left < right`.
    pub fn new(a: PlantKey, b: PlantKey, score: f64) -> Self {
        if a <= b {
            Self { left: a, right: b, score }
        } else {
            Self { left: b, right: a, score }
        }
    }
}

/// Plants from different sources believed to denote the same real-world plant.
///
/// Members are kept sorted by [`PlantKey`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCluster {
    pub members: Vec<PlantRecord>,
}

impl MatchCluster {
    pub fn new(mut members: Vec<PlantRecord>) -> Self {
        members.sort_by_key(|p| p.key());
        Self { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Smallest member identity; clusters are ordered by it.
    pub fn first_key(&self) -> Option<PlantKey> {
        self.members.first().map(|p| p.key())
    }

    pub fn sources(&self) -> BTreeSet<&str> {
        self.members.iter().map(|p| p.source.as_str()).collect()
    }

    /// More than one plant from the same source ended up in this cluster.
    pub fn is_ambiguous(&self) -> bool {
        self.sources().len() < self.members.len()
    }

    /// Members disagree on the country.
    pub fn has_country_conflict(&self) -> bool {
        let countries: BTreeSet<String> = self
            .members
            .iter()
            .map(|p| p.descriptor.country.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        countries.len() > 1
    }

    /// Union of all members' provenance.
    pub fn project_id(&self) -> ProjectId {
        let mut merged = ProjectId::new();
        for plant in &self.members {
            merged.merge(&plant.project_id);
        }
        merged
    }
}
