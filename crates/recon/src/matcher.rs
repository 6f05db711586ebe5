use std::collections::{BTreeMap, HashMap};

use plantmatch_core::{Descriptor, MatchCluster, MatchEdge, PlantKey, PlantRecord};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::cache::{CacheController, CacheKey, CachePolicy};
use crate::config::{MatchingConfig, PrefilterConfig};
use crate::oracle::SimilarityOracle;
use crate::union_find::DisjointSet;

/// Persisted edges for one unordered source pair.
///
/// The fingerprints pin the plant sets the edges were computed from; when
/// either side changes the pair is recomputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairMatches {
    pub left_fingerprint: String,
    pub right_fingerprint: String,
    pub settings: String,
    pub edges: Vec<MatchEdge>,
}

#[derive(Debug, Clone)]
pub struct MatchOutput {
    pub clusters: Vec<MatchCluster>,
    /// All accepted edges, sorted by `(left, right)`.
    pub edges: Vec<MatchEdge>,
    pub computed_pairs: usize,
    pub reused_pairs: usize,
}

/// Match plants across every pair of sources and cluster the result.
pub fn match_plants(
    plants_by_source: &BTreeMap<String, Vec<PlantRecord>>,
    config: &MatchingConfig,
    oracle: &dyn SimilarityOracle,
    cache: &CacheController<'_>,
    policy: CachePolicy,
) -> MatchOutput {
    let fingerprints: BTreeMap<&str, String> = plants_by_source
        .iter()
        .map(|(name, plants)| (name.as_str(), plant_fingerprint(plants)))
        .collect();
    let settings = settings_digest(config);

    let sources: Vec<&String> = plants_by_source.keys().collect();
    let mut edges = Vec::new();
    let mut computed_pairs = 0;
    let mut reused_pairs = 0;

    for (i, left) in sources.iter().enumerate() {
        for right in &sources[i + 1..] {
            let key = CacheKey::pair(left, right);
            let current = (&fingerprints[left.as_str()], &fingerprints[right.as_str()]);

            let saved = if policy.reuse {
                cache.load::<PairMatches>(&key).filter(|saved| {
                    (&saved.left_fingerprint, &saved.right_fingerprint) == current
                        && saved.settings == settings
                })
            } else {
                None
            };

            let pair_edges = match saved {
                Some(saved) => {
                    reused_pairs += 1;
                    debug!(left = %left, right = %right, edges = saved.edges.len(), "reused pair matches");
                    saved.edges
                }
                None => {
                    computed_pairs += 1;
                    let pair_edges = find_pair_edges(
                        &plants_by_source[left.as_str()],
                        &plants_by_source[right.as_str()],
                        config,
                        oracle,
                    );
                    debug!(left = %left, right = %right, edges = pair_edges.len(), "computed pair matches");
                    let artifact = PairMatches {
                        left_fingerprint: current.0.clone(),
                        right_fingerprint: current.1.clone(),
                        settings: settings.clone(),
                        edges: pair_edges,
                    };
                    cache.persist(&key, &artifact, policy);
                    artifact.edges
                }
            };
            edges.extend(pair_edges);
        }
    }

    sort_edges(&mut edges);
    let clusters = cluster_edges(plants_by_source, &edges);
    info!(
        sources = sources.len(),
        edges = edges.len(),
        clusters = clusters.len(),
        computed_pairs,
        reused_pairs,
        "matched plants across sources"
    );

    MatchOutput {
        clusters,
        edges,
        computed_pairs,
        reused_pairs,
    }
}

/// Accepted edges between two sources' plants, sorted.
pub fn find_pair_edges(
    left: &[PlantRecord],
    right: &[PlantRecord],
    config: &MatchingConfig,
    oracle: &dyn SimilarityOracle,
) -> Vec<MatchEdge> {
    let mut edges: Vec<MatchEdge> = left
        .par_iter()
        .map(|l| {
            right
                .iter()
                .filter(|r| passes_prefilter(&l.descriptor, &r.descriptor, &config.prefilter))
                .filter_map(|r| {
                    let score = oracle.score(&l.descriptor, &r.descriptor);
                    (score >= config.match_threshold).then(|| MatchEdge::new(l.key(), r.key(), score))
                })
                .collect::<Vec<_>>()
        })
        .flatten()
        .collect();
    sort_edges(&mut edges);
    edges
}

/// Cheap checks that rule a pair out before the oracle is asked.
pub fn passes_prefilter(a: &Descriptor, b: &Descriptor, prefilter: &PrefilterConfig) -> bool {
    if prefilter.same_country {
        let (ca, cb) = (a.country.trim(), b.country.trim());
        if !ca.is_empty() && !cb.is_empty() && !ca.eq_ignore_ascii_case(cb) {
            return false;
        }
    }

    if prefilter.capacity_ratio > 0.0 && a.capacity_mw > 0.0 && b.capacity_mw > 0.0 {
        let ratio = a.capacity_mw.min(b.capacity_mw) / a.capacity_mw.max(b.capacity_mw);
        if ratio < prefilter.capacity_ratio {
            return false;
        }
    }

    if let (Some(max), Some(d)) = (prefilter.max_distance_km, a.distance_km(b)) {
        if d > max {
            return false;
        }
    }

    true
}

/// Connected components of the edge graph with at least two plants.
///
/// Edges are applied in sorted order; clusters come out ordered by their
/// smallest member key. Edges naming unknown plants are ignored.
pub fn cluster_edges(plants_by_source: &BTreeMap<String, Vec<PlantRecord>>, edges: &[MatchEdge]) -> Vec<MatchCluster> {
    let plants: Vec<&PlantRecord> = plants_by_source.values().flatten().collect();
    let index: HashMap<PlantKey, usize> = plants.iter().enumerate().map(|(i, p)| (p.key(), i)).collect();

    let mut ordered: Vec<&MatchEdge> = edges.iter().collect();
    ordered.sort_by(|a, b| (&a.left, &a.right).cmp(&(&b.left, &b.right)));

    let mut ds = DisjointSet::new(plants.len());
    for edge in ordered {
        match (index.get(&edge.left), index.get(&edge.right)) {
            (Some(&a), Some(&b)) => {
                ds.union(a, b);
            }
            _ => debug!(left = %edge.left, right = %edge.right, "edge references unknown plant"),
        }
    }

    let mut clusters: Vec<MatchCluster> = ds
        .components()
        .into_iter()
        .filter(|members| members.len() > 1)
        .map(|members| MatchCluster::new(members.into_iter().map(|i| plants[i].clone()).collect()))
        .collect();
    clusters.sort_by_key(|c| c.first_key());
    clusters
}

fn sort_edges(edges: &mut [MatchEdge]) {
    edges.sort_by(|a, b| (&a.left, &a.right).cmp(&(&b.left, &b.right)));
}

/// SHA-256 over a source's plants in key order.
pub fn plant_fingerprint(plants: &[PlantRecord]) -> String {
    let mut ordered: Vec<&PlantRecord> = plants.iter().collect();
    ordered.sort_by_key(|p| p.key());

    let mut hasher = Sha256::new();
    for plant in ordered {
        hasher.update(serde_json::to_vec(plant).unwrap_or_default());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// The settings that decide which pairs become edges.
fn settings_digest(config: &MatchingConfig) -> String {
    let p = &config.prefilter;
    format!(
        "threshold={};same_country={};capacity_ratio={};max_distance_km={:?}",
        config.match_threshold, p.same_country, p.capacity_ratio, p.max_distance_km
    )
}
