//! Fusion of match clusters into one canonical record each.
//!
//! Descriptive text fields come from the most reliable source present in the
//! cluster. Capacity and commissioning year are averaged. Provenance is the
//! union of every member's `project_id` and is never trimmed.

use plantmatch_core::{Descriptor, MatchCluster, PlantRecord, ReducedPlantRecord};
use tracing::info;

use crate::config::MatchingConfig;

/// Reduce every cluster, preserving cluster order.
pub fn reduce_clusters(
    clusters: &[MatchCluster],
    config: &MatchingConfig,
    requested: &[String],
) -> Vec<ReducedPlantRecord> {
    let reduced: Vec<ReducedPlantRecord> = clusters
        .iter()
        .filter_map(|c| reduce_cluster(c, config, requested))
        .collect();
    let conflicts = clusters.iter().filter(|c| c.has_country_conflict()).count();
    info!(clusters = clusters.len(), records = reduced.len(), country_conflicts = conflicts, "reduced clusters");
    reduced
}

/// Fuse one cluster. `None` only for an empty cluster.
pub fn reduce_cluster(
    cluster: &MatchCluster,
    config: &MatchingConfig,
    requested: &[String],
) -> Option<ReducedPlantRecord> {
    let ranked = ranked_members(cluster, config, requested);
    let priority = *ranked.first()?;

    let mut descriptor = Descriptor {
        capacity_mw: fused_capacity(cluster),
        commissioning_year: mean_year(cluster),
        technology: ranked.iter().find_map(|p| p.descriptor.technology.clone()),
        latitude: None,
        longitude: None,
        ..priority.descriptor.clone()
    };
    if let Some((lat, lon)) = ranked.iter().find_map(|p| p.descriptor.location()) {
        descriptor.latitude = Some(lat);
        descriptor.longitude = Some(lon);
    }

    Some(ReducedPlantRecord {
        descriptor,
        project_id: cluster.project_id(),
    })
}

/// Members ordered by reliability, then by position in `requested`, then key.
fn ranked_members<'a>(cluster: &'a MatchCluster, config: &MatchingConfig, requested: &[String]) -> Vec<&'a PlantRecord> {
    let mut members: Vec<&PlantRecord> = cluster.members.iter().collect();
    members.sort_by(|a, b| {
        let ra = config.source_rank(&a.source, requested);
        let rb = config.source_rank(&b.source, requested);
        ra.cmp(&rb).then_with(|| a.key().cmp(&b.key()))
    });
    members
}

/// Mean of the member plants' capacities.
///
/// Each member counts once, including several plants from one source in an
/// ambiguous cluster.
fn fused_capacity(cluster: &MatchCluster) -> f64 {
    if cluster.members.is_empty() {
        return 0.0;
    }
    let total: f64 = cluster.members.iter().map(|p| p.descriptor.capacity_mw).sum();
    total / cluster.members.len() as f64
}

fn mean_year(cluster: &MatchCluster) -> Option<i32> {
    let years: Vec<i32> = cluster
        .members
        .iter()
        .filter_map(|p| p.descriptor.commissioning_year)
        .collect();
    if years.is_empty() {
        return None;
    }
    let mean = years.iter().map(|&y| f64::from(y)).sum::<f64>() / years.len() as f64;
    Some(mean.round() as i32)
}
