use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};

use ordered_float::OrderedFloat;
use plantmatch_core::{Descriptor, PlantRecord, ProjectId, UnitRecord};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::{CacheController, CacheKey, CachePolicy};
use crate::config::MatchingConfig;
use crate::error::PipelineError;
use crate::oracle::SimilarityOracle;
use crate::union_find::DisjointSet;

/// Persisted grouping for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupAssignment {
    pub source_id: String,
    pub group: usize,
}

/// Reject unit lists that would break the per-source partition.
pub fn check_units(source: &str, units: &[UnitRecord]) -> Result<(), PipelineError> {
    let invalid = |reason: String| PipelineError::InvalidSource {
        name: source.to_string(),
        reason,
    };

    let mut seen = HashSet::with_capacity(units.len());
    for unit in units {
        if unit.source != source {
            return Err(invalid(format!(
                "unit '{}' is tagged with source '{}'",
                unit.source_id, unit.source
            )));
        }
        if !seen.insert(unit.source_id.as_str()) {
            return Err(invalid(format!("duplicate source_id '{}'", unit.source_id)));
        }
        let cap = unit.descriptor.capacity_mw;
        if !cap.is_finite() || cap < 0.0 {
            return Err(invalid(format!("unit '{}' has capacity {cap}", unit.source_id)));
        }
    }
    Ok(())
}

/// Group same-source units into plants, replaying or persisting the grouping
/// as `policy` allows.
pub fn aggregate(
    source: &str,
    units: &[UnitRecord],
    config: &MatchingConfig,
    oracle: &dyn SimilarityOracle,
    cache: &CacheController<'_>,
    policy: CachePolicy,
) -> Vec<PlantRecord> {
    let key = CacheKey::aggregation(source);

    if policy.reuse {
        let replayed = cache
            .load::<Vec<GroupAssignment>>(&key)
            .and_then(|saved| replay_groups(units, &saved));
        match replayed {
            Some(labels) => {
                let plants = build_plants(source, units, &labels);
                info!(source, units = units.len(), plants = plants.len(), "replayed saved aggregation");
                return plants;
            }
            None => debug!(source, "no usable saved aggregation, regrouping"),
        }
    }

    let labels = group_units(units, config, oracle);
    let assignments: Vec<GroupAssignment> = units
        .iter()
        .zip(&labels)
        .map(|(u, &group)| GroupAssignment {
            source_id: u.source_id.clone(),
            group,
        })
        .collect();
    cache.persist(&key, &assignments, policy);

    let plants = build_plants(source, units, &labels);
    info!(source, units = units.len(), plants = plants.len(), "aggregated units");
    plants
}

/// Every unit becomes its own plant.
pub fn wrap_units(units: &[UnitRecord]) -> Vec<PlantRecord> {
    units.iter().map(PlantRecord::from_unit).collect()
}

/// Map saved assignments onto the current units.
///
/// `None` when the saved grouping does not cover exactly the current ids,
/// i.e. the source changed since it was written.
pub fn replay_groups(units: &[UnitRecord], saved: &[GroupAssignment]) -> Option<Vec<usize>> {
    if saved.len() != units.len() {
        return None;
    }
    let by_id: HashMap<&str, usize> = saved.iter().map(|a| (a.source_id.as_str(), a.group)).collect();
    if by_id.len() != saved.len() {
        return None;
    }

    let mut dense: HashMap<usize, usize> = HashMap::new();
    units
        .iter()
        .map(|u| {
            let group = *by_id.get(u.source_id.as_str())?;
            let next = dense.len();
            Some(*dense.entry(group).or_insert(next))
        })
        .collect()
}

/// Connected components of the unit similarity graph, as dense labels.
///
/// Only units with the same fueltype are compared. Units further apart than
/// `distance_threshold_km` never merge. When either unit lacks coordinates the
/// oracle sees names only, so fueltype and capacity cannot carry a weak name
/// over the threshold.
pub fn group_units(units: &[UnitRecord], config: &MatchingConfig, oracle: &dyn SimilarityOracle) -> Vec<usize> {
    let mut buckets: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, unit) in units.iter().enumerate() {
        buckets
            .entry(unit.descriptor.fueltype.trim().to_lowercase())
            .or_default()
            .push(i);
    }

    let mut edges: Vec<(usize, usize)> = buckets
        .values()
        .collect::<Vec<_>>()
        .par_iter()
        .map(|members| bucket_edges(units, members, config, oracle))
        .flatten()
        .collect();
    edges.sort_unstable();

    let mut ds = DisjointSet::new(units.len());
    for (a, b) in edges {
        ds.union(a, b);
    }
    ds.labels()
}

fn bucket_edges(
    units: &[UnitRecord],
    members: &[usize],
    config: &MatchingConfig,
    oracle: &dyn SimilarityOracle,
) -> Vec<(usize, usize)> {
    let mut edges = Vec::new();
    for (pos, &i) in members.iter().enumerate() {
        for &j in &members[pos + 1..] {
            let (a, b) = (&units[i].descriptor, &units[j].descriptor);
            let score = match a.distance_km(b) {
                Some(d) if d > config.distance_threshold_km => continue,
                Some(_) => oracle.score(a, b),
                None => oracle.score(&name_only(a), &name_only(b)),
            };
            if score >= config.aggregation_threshold {
                edges.push((i, j));
            }
        }
    }
    edges
}

/// The descriptor stripped to what can be compared without a location.
fn name_only(d: &Descriptor) -> Descriptor {
    Descriptor::new(d.name.clone(), String::new(), d.country.clone(), 0.0)
}

/// Fold each label's units into one plant.
///
/// Capacity is summed; name, fueltype and country come from the largest
/// member (earliest on ties); coordinates are averaged over members that have
/// them; the commissioning year is the earliest one reported.
pub fn build_plants(source: &str, units: &[UnitRecord], labels: &[usize]) -> Vec<PlantRecord> {
    let groups = labels.iter().copied().max().map(|m| m + 1).unwrap_or(0);
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); groups];
    for (i, &label) in labels.iter().enumerate() {
        members[label].push(i);
    }

    members
        .into_iter()
        .filter(|m| !m.is_empty())
        .map(|idx| fold_group(source, units, &idx))
        .collect()
}

fn fold_group(source: &str, units: &[UnitRecord], idx: &[usize]) -> PlantRecord {
    let group: Vec<&UnitRecord> = idx.iter().map(|&i| &units[i]).collect();

    let rep = group
        .iter()
        .enumerate()
        .min_by_key(|(pos, u)| (Reverse(OrderedFloat(u.descriptor.capacity_mw)), *pos))
        .map(|(_, u)| *u)
        .unwrap_or(group[0]);

    let mut descriptor = rep.descriptor.clone();
    descriptor.capacity_mw = group.iter().map(|u| u.descriptor.capacity_mw).sum();
    if descriptor.technology.is_none() {
        descriptor.technology = group.iter().find_map(|u| u.descriptor.technology.clone());
    }

    let located: Vec<(f64, f64)> = group.iter().filter_map(|u| u.descriptor.location()).collect();
    if located.is_empty() {
        descriptor.latitude = None;
        descriptor.longitude = None;
    } else {
        let n = located.len() as f64;
        descriptor.latitude = Some(located.iter().map(|l| l.0).sum::<f64>() / n);
        descriptor.longitude = Some(located.iter().map(|l| l.1).sum::<f64>() / n);
    }

    descriptor.commissioning_year = group.iter().filter_map(|u| u.descriptor.commissioning_year).min();

    PlantRecord {
        source: source.to_string(),
        descriptor,
        project_id: ProjectId::from_ids(source, group.iter().map(|u| u.source_id.clone()).collect()),
    }
}
