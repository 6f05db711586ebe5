//! The collection pipeline: read, aggregate, match, reduce, with the cache
//! controller deciding which stages run.

use std::collections::BTreeMap;

use plantmatch_core::{MatchCluster, PlantRecord, ReducedPlantRecord, UnitRecord};
use tracing::{debug, info, warn};

use crate::aggregate::{aggregate, check_units, wrap_units};
use crate::cache::{CacheController, CacheKey, CachePolicy, CacheStore, UpdateMode};
use crate::config::MatchingConfig;
use crate::error::PipelineError;
use crate::heuristics::{drop_source_combinations, extend_by_non_matched, subsume_uncommon_fueltypes};
use crate::matcher::match_plants;
use crate::oracle::SimilarityOracle;
use crate::reduce::reduce_clusters;
use crate::summary::summarize;

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Produces the normalized units of one source.
pub trait SourceReader: Send + Sync {
    fn read(&self) -> Result<Vec<UnitRecord>, PipelineError>;
}

impl<F> SourceReader for F
where
    F: Fn() -> Result<Vec<UnitRecord>, PipelineError> + Send + Sync,
{
    fn read(&self) -> Result<Vec<UnitRecord>, PipelineError> {
        self()
    }
}

/// Readers by source name.
#[derive(Default)]
pub struct SourceRegistry {
    readers: BTreeMap<String, Box<dyn SourceReader>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `reader` under `name`, replacing any earlier reader.
    pub fn register(&mut self, name: impl Into<String>, reader: impl SourceReader + 'static) {
        self.readers.insert(name.into(), Box::new(reader));
    }

    pub fn get(&self, name: &str) -> Option<&dyn SourceReader> {
        self.readers.get(name).map(|r| r.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.readers.contains_key(name)
    }
}

// ---------------------------------------------------------------------------
// Options + output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct CollectOptions {
    /// Recompute instead of replaying the final artifact.
    pub update: bool,
    pub use_saved_aggregation: bool,
    pub use_saved_matches: bool,
    /// Return reduced records rather than match clusters.
    pub reduced: bool,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            update: false,
            use_saved_aggregation: false,
            use_saved_matches: false,
            reduced: true,
        }
    }
}

impl CollectOptions {
    /// Recompute every stage and ignore all saved state.
    pub fn recompute() -> Self {
        Self {
            update: true,
            use_saved_aggregation: false,
            use_saved_matches: false,
            reduced: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Collection {
    Reduced(Vec<ReducedPlantRecord>),
    Matched(Vec<MatchCluster>),
}

impl Collection {
    pub fn len(&self) -> usize {
        match self {
            Self::Reduced(records) => records.len(),
            Self::Matched(clusters) => clusters.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_reduced(self) -> Option<Vec<ReducedPlantRecord>> {
        match self {
            Self::Reduced(records) => Some(records),
            Self::Matched(_) => None,
        }
    }

    pub fn into_matched(self) -> Option<Vec<MatchCluster>> {
        match self {
            Self::Matched(clusters) => Some(clusters),
            Self::Reduced(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MatchedDataOptions {
    pub update: bool,
    pub use_saved_aggregation: bool,
    pub use_saved_matches: bool,
    /// Add unmatched plants of the fully included sources. Their aggregation
    /// is replayed from the cache when still valid.
    pub extend_by_fully_included: bool,
    pub drop_combinations: bool,
    pub subsume_fueltypes: bool,
}

impl Default for MatchedDataOptions {
    fn default() -> Self {
        Self {
            update: false,
            use_saved_aggregation: false,
            use_saved_matches: false,
            extend_by_fully_included: true,
            drop_combinations: true,
            subsume_fueltypes: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

pub struct Collector<'a> {
    config: &'a MatchingConfig,
    registry: &'a SourceRegistry,
    oracle: &'a dyn SimilarityOracle,
    cache: CacheController<'a>,
}

impl<'a> Collector<'a> {
    pub fn new(
        config: &'a MatchingConfig,
        registry: &'a SourceRegistry,
        oracle: &'a dyn SimilarityOracle,
        store: &'a dyn CacheStore,
    ) -> Self {
        Self {
            config,
            registry,
            oracle,
            cache: CacheController::new(store),
        }
    }

    /// Collect the requested sources into one matched dataset.
    pub fn collect<S: AsRef<str>>(&self, sources: &[S], options: &CollectOptions) -> Result<Collection, PipelineError> {
        let request_order = self.requested(sources)?;
        let mut sources = request_order.clone();
        sources.sort();
        let final_key = if options.reduced {
            CacheKey::reduced(&sources)
        } else {
            CacheKey::matched(&sources)
        };

        let mut mode = UpdateMode::resolve(
            options.update,
            options.use_saved_aggregation,
            options.use_saved_matches,
            self.cache.exists(&final_key),
        );
        info!(sources = ?sources, mode = %mode, "collecting");

        if mode == UpdateMode::FullReplay {
            if let Some(collection) = self.replay(&final_key, options.reduced) {
                info!(key = %final_key, records = collection.len(), "replayed final artifact");
                return Ok(collection);
            }
            warn!(key = %final_key, "final artifact unusable, recomputing");
            mode = UpdateMode::ForceRecompute;
        } else if mode == UpdateMode::ForceRecompute && !options.update {
            info!(key = %final_key, "final artifact missing, recomputing");
        }

        let mut plants_by_source = BTreeMap::new();
        for name in &sources {
            let units = self.read_units(name)?;
            let plants = self.plants_for(name, &units, mode.aggregation_policy());
            plants_by_source.insert(name.clone(), plants);
        }

        let (clusters, reduced) = if sources.len() == 1 {
            debug!(source = %sources[0], "single source, nothing to match");
            let reduced: Vec<ReducedPlantRecord> = plants_by_source
                .values()
                .flatten()
                .map(ReducedPlantRecord::from_plant)
                .collect();
            (Vec::new(), reduced)
        } else {
            let output = match_plants(&plants_by_source, self.config, self.oracle, &self.cache, mode.matching_policy());
            summarize(&output.clusters).log();
            let reduced = reduce_clusters(&output.clusters, self.config, &request_order);
            (output.clusters, reduced)
        };

        self.cache.persist(&CacheKey::matched(&sources), &clusters, CachePolicy::RECOMPUTE);
        self.cache.persist(&CacheKey::reduced(&sources), &reduced, CachePolicy::RECOMPUTE);

        Ok(if options.reduced {
            Collection::Reduced(reduced)
        } else {
            Collection::Matched(clusters)
        })
    }

    /// Plants of one source without any cross-source matching.
    pub fn collect_single(&self, source: &str, use_saved_aggregation: bool) -> Result<Vec<PlantRecord>, PipelineError> {
        if !self.registry.contains(source) {
            return Err(PipelineError::UnknownSource(source.to_string()));
        }
        let units = self.read_units(source)?;
        let policy = if use_saved_aggregation {
            CachePolicy::REUSE
        } else {
            CachePolicy::RECOMPUTE
        };
        Ok(self.plants_for(source, &units, policy))
    }

    /// The configured matching sources, reduced and post-processed.
    pub fn matched_data(&self, options: &MatchedDataOptions) -> Result<Vec<ReducedPlantRecord>, PipelineError> {
        if self.config.matching_sources.is_empty() {
            return Err(PipelineError::ConfigValidation("matching_sources is empty".into()));
        }

        let collect_options = CollectOptions {
            update: options.update,
            use_saved_aggregation: options.use_saved_aggregation,
            use_saved_matches: options.use_saved_matches,
            reduced: true,
        };
        let mut reduced = self
            .collect(&self.config.matching_sources, &collect_options)?
            .into_reduced()
            .unwrap_or_default();

        if options.extend_by_fully_included {
            for source in &self.config.fully_included_sources {
                let plants = self.collect_single(source, true)?;
                reduced = extend_by_non_matched(reduced, source, &plants);
            }
        }

        let post = &self.config.post;
        if options.drop_combinations && !post.drop_combinations.is_empty() {
            reduced = drop_source_combinations(reduced, &post.drop_combinations, &post.exempt_countries);
        }
        if options.subsume_fueltypes && !post.common_fueltypes.is_empty() {
            reduced = subsume_uncommon_fueltypes(reduced, &post.common_fueltypes);
        }

        info!(records = reduced.len(), "matched data ready");
        Ok(reduced)
    }

    /// Registered source names in request order, first occurrence kept.
    fn requested<S: AsRef<str>>(&self, sources: &[S]) -> Result<Vec<String>, PipelineError> {
        let mut names: Vec<String> = Vec::with_capacity(sources.len());
        for name in sources.iter().map(|s| s.as_ref()) {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        if names.is_empty() {
            return Err(PipelineError::ConfigValidation("no sources requested".into()));
        }
        if let Some(unknown) = names.iter().find(|n| !self.registry.contains(n)) {
            return Err(PipelineError::UnknownSource(unknown.clone()));
        }
        Ok(names)
    }

    fn read_units(&self, name: &str) -> Result<Vec<UnitRecord>, PipelineError> {
        let reader = self
            .registry
            .get(name)
            .ok_or_else(|| PipelineError::UnknownSource(name.to_string()))?;
        let units = reader.read().map_err(|e| match e {
            PipelineError::SourceUnavailable { .. }
            | PipelineError::MissingColumn { .. }
            | PipelineError::FieldParse { .. } => e,
            other => PipelineError::source_unavailable(name, other),
        })?;
        check_units(name, &units)?;
        debug!(source = name, units = units.len(), "read source");
        Ok(units)
    }

    fn plants_for(&self, name: &str, units: &[UnitRecord], policy: CachePolicy) -> Vec<PlantRecord> {
        if self.config.is_preaggregated(name) {
            debug!(source = name, "source reports plants, skipping aggregation");
            return wrap_units(units);
        }
        aggregate(name, units, self.config, self.oracle, &self.cache, policy)
    }

    fn replay(&self, key: &CacheKey, reduced: bool) -> Option<Collection> {
        if reduced {
            self.cache.load::<Vec<ReducedPlantRecord>>(key).map(Collection::Reduced)
        } else {
            self.cache.load::<Vec<MatchCluster>>(key).map(Collection::Matched)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use plantmatch_core::Descriptor;

    fn unit(source: &str, id: &str, name: &str, cap: f64) -> UnitRecord {
        UnitRecord::new(source, id, Descriptor::new(name, "Hydro", "Germany", cap))
    }

    fn by_name(a: &Descriptor, b: &Descriptor) -> f64 {
        if a.name == b.name { 0.95 } else { 0.0 }
    }

    fn fixed(units: Vec<UnitRecord>) -> impl Fn() -> Result<Vec<UnitRecord>, PipelineError> + Send + Sync + 'static {
        move || Ok(units.clone())
    }

    fn offline() -> impl Fn() -> Result<Vec<UnitRecord>, PipelineError> + Send + Sync + 'static {
        || Err(PipelineError::Io("connection reset".into()))
    }

    fn registry() -> SourceRegistry {
        let mut registry = SourceRegistry::new();
        registry.register("A", fixed(vec![unit("A", "a1", "Riverside", 100.0), unit("A", "a2", "Lakeside", 20.0)]));
        registry.register("B", fixed(vec![unit("B", "b1", "Riverside", 102.0)]));
        registry
    }

    #[test]
    fn unknown_source_fails_before_reading() {
        let config = MatchingConfig::default();
        let registry = registry();
        let store = MemoryCacheStore::new();
        let collector = Collector::new(&config, &registry, &by_name, &store);
        let err = collector.collect(&["A", "Z"], &CollectOptions::default()).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownSource(name) if name == "Z"));
        assert!(store.keys().is_empty());
    }

    #[test]
    fn empty_request_is_rejected() {
        let config = MatchingConfig::default();
        let registry = registry();
        let store = MemoryCacheStore::new();
        let collector = Collector::new(&config, &registry, &by_name, &store);
        let none: [&str; 0] = [];
        assert!(collector.collect(&none, &CollectOptions::default()).is_err());
    }

    #[test]
    fn missing_final_artifact_forces_recompute() {
        let config = MatchingConfig::default();
        let registry = registry();
        let store = MemoryCacheStore::new();
        let collector = Collector::new(&config, &registry, &by_name, &store);

        let out = collector.collect(&["B", "A"], &CollectOptions::default()).unwrap();
        let reduced = out.into_reduced().unwrap();
        assert_eq!(reduced.len(), 1);
        assert_eq!(reduced[0].descriptor.capacity_mw, 101.0);
        assert!(store.exists(&CacheKey::matched(&["A".into(), "B".into()])));
        assert!(store.exists(&CacheKey::reduced(&["A".into(), "B".into()])));
    }

    #[test]
    fn request_order_breaks_reliability_ties() {
        let mut registry = SourceRegistry::new();
        registry.register("A", fixed(vec![unit("A", "a1", "Alpha", 100.0)]));
        registry.register("B", fixed(vec![unit("B", "b1", "Bravo", 100.0)]));
        let same_plant = |_: &Descriptor, _: &Descriptor| 0.95;
        let name_of = |config: &MatchingConfig, sources: &[&str]| {
            let store = MemoryCacheStore::new();
            let reduced = Collector::new(config, &registry, &same_plant, &store)
                .collect(sources, &CollectOptions::recompute())
                .unwrap()
                .into_reduced()
                .unwrap();
            assert_eq!(reduced.len(), 1);
            reduced[0].descriptor.name.clone()
        };

        let unranked = MatchingConfig::default();
        assert_eq!(name_of(&unranked, &["B", "A"]), "Bravo");
        assert_eq!(name_of(&unranked, &["A", "B", "A"]), "Alpha");

        let ranked = MatchingConfig {
            source_reliability_order: vec!["A".into()],
            ..MatchingConfig::default()
        };
        assert_eq!(name_of(&ranked, &["B", "A"]), "Alpha");
    }

    #[test]
    fn replay_reads_final_artifact_without_sources() {
        let config = MatchingConfig::default();
        let store = MemoryCacheStore::new();
        let registry = registry();
        let first = Collector::new(&config, &registry, &by_name, &store)
            .collect(&["A", "B"], &CollectOptions::default())
            .unwrap();

        let mut failing = SourceRegistry::new();
        failing.register("A", offline());
        failing.register("B", offline());
        let replayed = Collector::new(&config, &failing, &by_name, &store)
            .collect(&["A", "B"], &CollectOptions::default())
            .unwrap();
        assert_eq!(first, replayed);
    }

    #[test]
    fn matched_collection_returns_clusters() {
        let config = MatchingConfig::default();
        let registry = registry();
        let store = MemoryCacheStore::new();
        let collector = Collector::new(&config, &registry, &by_name, &store);
        let options = CollectOptions { reduced: false, ..CollectOptions::recompute() };
        let clusters = collector.collect(&["A", "B"], &options).unwrap().into_matched().unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].sources().len(), 2);
    }

    #[test]
    fn reader_failure_is_source_unavailable() {
        let config = MatchingConfig::default();
        let mut registry = registry();
        registry.register("B", offline());
        let store = MemoryCacheStore::new();
        let collector = Collector::new(&config, &registry, &by_name, &store);
        let err = collector.collect(&["A", "B"], &CollectOptions::recompute()).unwrap_err();
        assert!(matches!(err, PipelineError::SourceUnavailable { ref name, .. } if name == "B"));
        assert!(!store.exists(&CacheKey::reduced(&["A".into(), "B".into()])));
    }

    #[test]
    fn invalid_units_are_rejected() {
        let config = MatchingConfig::default();
        let mut registry = SourceRegistry::new();
        registry.register("A", fixed(vec![unit("A", "a1", "X", 1.0), unit("A", "a1", "Y", 1.0)]));
        let store = MemoryCacheStore::new();
        let collector = Collector::new(&config, &registry, &by_name, &store);
        let err = collector.collect_single("A", false).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidSource { .. }));
    }

    #[test]
    fn single_source_yields_its_plants() {
        let config = MatchingConfig::default();
        let registry = registry();
        let store = MemoryCacheStore::new();
        let collector = Collector::new(&config, &registry, &by_name, &store);
        let reduced = collector.collect(&["A"], &CollectOptions::recompute()).unwrap();
        assert_eq!(reduced.len(), 2);
    }

    #[test]
    fn preaggregated_sources_skip_aggregation() {
        let mut config = MatchingConfig::default();
        config.sources.insert("A".into(), crate::config::SourceConfig { aggregated_units: true });
        let mut registry = SourceRegistry::new();
        registry.register("A", fixed(vec![unit("A", "a1", "Twin", 10.0), unit("A", "a2", "Twin", 10.0)]));
        let store = MemoryCacheStore::new();
        let collector = Collector::new(&config, &registry, &by_name, &store);
        assert_eq!(collector.collect_single("A", false).unwrap().len(), 2);

        let config = MatchingConfig::default();
        let collector = Collector::new(&config, &registry, &by_name, &store);
        assert_eq!(collector.collect_single("A", false).unwrap().len(), 1);
    }
}
