use std::collections::BTreeMap;

use plantmatch_core::MatchCluster;
use serde::Serialize;
use tracing::info;

/// Counts describing one matching run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionSummary {
    pub clusters: usize,
    pub matched_plants: usize,
    /// Clusters holding more than one plant from some source.
    pub ambiguous_clusters: usize,
    /// Clusters whose members disagree on the country.
    pub country_conflicts: usize,
    /// Number of distinct sources per cluster -> how many clusters.
    pub clusters_by_source_count: BTreeMap<usize, usize>,
}

pub fn summarize(clusters: &[MatchCluster]) -> CollectionSummary {
    let mut summary = CollectionSummary {
        clusters: clusters.len(),
        ..CollectionSummary::default()
    };
    for cluster in clusters {
        summary.matched_plants += cluster.len();
        if cluster.is_ambiguous() {
            summary.ambiguous_clusters += 1;
        }
        if cluster.has_country_conflict() {
            summary.country_conflicts += 1;
        }
        *summary
            .clusters_by_source_count
            .entry(cluster.sources().len())
            .or_default() += 1;
    }
    summary
}

impl CollectionSummary {
    pub fn log(&self) {
        info!(
            clusters = self.clusters,
            matched_plants = self.matched_plants,
            ambiguous = self.ambiguous_clusters,
            country_conflicts = self.country_conflicts,
            "match summary"
        );
    }
}
