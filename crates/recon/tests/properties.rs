// Property-based tests for clustering and aggregation invariants.
// CI: 128 cases (default). Soak: PROPTEST_CASES=10000 cargo test --release

use std::collections::{BTreeMap, BTreeSet, HashSet};

use plantmatch_core::{Descriptor, MatchEdge, PlantKey, PlantRecord, ProjectId, UnitRecord};
use plantmatch_recon::aggregate::aggregate;
use plantmatch_recon::matcher::cluster_edges;
use plantmatch_recon::union_find::DisjointSet;
use plantmatch_recon::{CacheController, CachePolicy, HeuristicOracle, MatchingConfig, MemoryCacheStore};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn config_128() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(128),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

const SOURCES: [&str; 3] = ["A", "B", "C"];

fn plants(per_source: &[usize]) -> BTreeMap<String, Vec<PlantRecord>> {
    SOURCES
        .iter()
        .zip(per_source)
        .map(|(&source, &n)| {
            let plants = (0..n)
                .map(|i| PlantRecord {
                    source: source.to_string(),
                    descriptor: Descriptor::new(format!("{source}{i}"), "Wind", "Germany", 10.0),
                    project_id: ProjectId::single(source, format!("{source}{i}")),
                })
                .collect();
            (source.to_string(), plants)
        })
        .collect()
}

/// Plant counts per source plus random cross-source edges between them.
fn arb_graph() -> impl Strategy<Value = (Vec<usize>, Vec<MatchEdge>)> {
    prop::collection::vec(1usize..6, 3).prop_flat_map(|counts| {
        let keys: Vec<PlantKey> = SOURCES
            .iter()
            .zip(&counts)
            .flat_map(|(&s, &n)| (0..n).map(move |i| PlantKey::new(s, format!("{s}{i}"))))
            .collect();
        let n = keys.len();
        let edges = prop::collection::vec((0..n, 0..n), 0..12).prop_map(move |pairs| {
            pairs
                .into_iter()
                .filter(|&(a, b)| keys[a].source != keys[b].source)
                .map(|(a, b)| MatchEdge::new(keys[a].clone(), keys[b].clone(), 1.0))
                .collect::<Vec<_>>()
        });
        (Just(counts), edges)
    })
}

fn arb_units() -> impl Strategy<Value = Vec<UnitRecord>> {
    let unit = (0usize..3, 0usize..2, 0u8..4, 1.0f64..500.0);
    prop::collection::vec(unit, 1..25).prop_map(|raw| {
        raw.into_iter()
            .enumerate()
            .map(|(i, (name, fuel, spot, cap))| {
                let names = ["Neurath", "Isar", "Staudinger"];
                let fuels = ["Lignite", "Nuclear"];
                let desc = Descriptor::new(format!("{} Unit {i}", names[name]), fuels[fuel], "Germany", cap);
                let desc = if spot == 0 {
                    desc
                } else {
                    desc.with_location(50.0 + f64::from(spot) * 0.01, 7.0)
                };
                UnitRecord::new("S", format!("u{i}"), desc)
            })
            .collect()
    })
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config_128())]

    /// Both endpoints of every edge land in the same cluster, and no plant is
    /// in two clusters.
    #[test]
    fn clusters_are_transitive_closure((counts, edges) in arb_graph()) {
        let input = plants(&counts);
        let clusters = cluster_edges(&input, &edges);

        let mut cluster_of = BTreeMap::new();
        for (i, cluster) in clusters.iter().enumerate() {
            prop_assert!(cluster.len() >= 2);
            for plant in &cluster.members {
                prop_assert!(cluster_of.insert(plant.key(), i).is_none(), "{} in two clusters", plant.key());
            }
        }
        for edge in &edges {
            prop_assert_eq!(cluster_of.get(&edge.left), cluster_of.get(&edge.right));
            prop_assert!(cluster_of.contains_key(&edge.left));
        }

        // Clusters hold nothing beyond what the edges connect.
        let keys: Vec<PlantKey> = input.values().flatten().map(|p| p.key()).collect();
        let index: BTreeMap<&PlantKey, usize> = keys.iter().enumerate().map(|(i, k)| (k, i)).collect();
        let mut ds = DisjointSet::new(keys.len());
        for edge in &edges {
            ds.union(index[&edge.left], index[&edge.right]);
        }
        let expected = ds.components().into_iter().filter(|c| c.len() > 1).count();
        prop_assert_eq!(clusters.len(), expected);
    }

    /// Edge order and plant order do not change the clustering.
    #[test]
    fn clustering_ignores_input_order((counts, edges) in arb_graph()) {
        let input = plants(&counts);
        let forward = cluster_edges(&input, &edges);

        let mut reversed_edges = edges.clone();
        reversed_edges.reverse();
        let reversed_input: BTreeMap<String, Vec<PlantRecord>> = input
            .iter()
            .map(|(s, p)| (s.clone(), p.iter().rev().cloned().collect()))
            .collect();
        let backward = cluster_edges(&reversed_input, &reversed_edges);

        prop_assert_eq!(forward, backward);
    }

    /// Aggregation partitions a source's unit ids.
    #[test]
    fn aggregation_partitions_unit_ids(units in arb_units()) {
        let store = MemoryCacheStore::new();
        let plants = aggregate(
            "S",
            &units,
            &MatchingConfig::default(),
            &HeuristicOracle::default(),
            &CacheController::new(&store),
            CachePolicy::EPHEMERAL,
        );

        let mut seen = HashSet::new();
        for plant in &plants {
            for id in plant.ids() {
                prop_assert!(seen.insert(id.clone()), "{id} in two plants");
            }
        }
        let expected: HashSet<String> = units.iter().map(|u| u.source_id.clone()).collect();
        prop_assert_eq!(seen, expected);

        let total: f64 = units.iter().map(|u| u.descriptor.capacity_mw).sum();
        let fused: f64 = plants.iter().map(|p| p.descriptor.capacity_mw).sum();
        prop_assert!((total - fused).abs() < 1e-6);

        let sources: BTreeSet<&str> = plants.iter().map(|p| p.source.as_str()).collect();
        prop_assert!(sources.len() <= 1);
    }
}
