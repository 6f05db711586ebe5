use std::path::PathBuf;

use plantmatch_io::{write_reduced_csv, ColumnMapping, CsvSource, DirCacheStore};
use plantmatch_recon::{
    CacheKey, CacheStore, CollectOptions, Collector, HeuristicOracle, MatchedDataOptions, MatchingConfig, SourceRegistry,
};
use tempfile::tempdir;

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn registry() -> SourceRegistry {
    let dir = fixtures_dir();
    let opsd_columns = ColumnMapping {
        id: "Id".into(),
        name: "Name".into(),
        fueltype: "Fuel".into(),
        country: "Country".into(),
        capacity_mw: "Capacity".into(),
        technology: None,
        commissioning_year: Some("YearCommissioned".into()),
        ..ColumnMapping::default()
    };

    let mut registry = SourceRegistry::new();
    registry.register("ENTSOE", CsvSource::new("ENTSOE", dir.join("entsoe.csv")));
    registry.register("OPSD", CsvSource::new("OPSD", dir.join("opsd.csv")).with_columns(opsd_columns));
    registry.register("GPD", CsvSource::new("GPD", dir.join("gpd.csv")));
    registry
}

fn config() -> MatchingConfig {
    let toml = std::fs::read_to_string(fixtures_dir().join("matching.toml")).unwrap();
    MatchingConfig::from_toml(&toml).unwrap()
}

#[test]
fn csv_sources_through_disk_cache() {
    let cache_dir = tempdir().unwrap();
    let store = DirCacheStore::new(cache_dir.path());
    let config = config();
    let registry = registry();
    let oracle = HeuristicOracle::default();
    let collector = Collector::new(&config, &registry, &oracle, &store);

    let first = collector
        .collect(&["ENTSOE", "OPSD", "GPD"], &CollectOptions::default())
        .unwrap()
        .into_reduced()
        .unwrap();
    assert_eq!(first.len(), 4);
    assert_eq!(first[0].descriptor.name, "Neurath Unit 1");
    assert_eq!(first[0].descriptor.commissioning_year, Some(2012));
    assert_eq!(first[0].descriptor.technology.as_deref(), Some("Steam Turbine"));

    let sources: Vec<String> = ["ENTSOE", "GPD", "OPSD"].iter().map(|s| s.to_string()).collect();
    for key in [
        CacheKey::reduced(&sources),
        CacheKey::matched(&sources),
        CacheKey::aggregation("ENTSOE"),
        CacheKey::aggregation("OPSD"),
        CacheKey::pair("ENTSOE", "OPSD"),
        CacheKey::pair("GPD", "OPSD"),
    ] {
        assert!(store.exists(&key), "missing artifact {key}");
    }
    // Preaggregated sources have no grouping to save.
    assert!(!store.exists(&CacheKey::aggregation("GPD")));

    // A fresh store handle over the same directory replays the result.
    let reopened = DirCacheStore::new(cache_dir.path());
    let replayed = Collector::new(&config, &registry, &oracle, &reopened)
        .collect(&["GPD", "OPSD", "ENTSOE"], &CollectOptions::default())
        .unwrap()
        .into_reduced()
        .unwrap();
    assert_eq!(first, replayed);
}

#[test]
fn tampered_disk_artifact_is_recomputed() {
    let cache_dir = tempdir().unwrap();
    let store = DirCacheStore::new(cache_dir.path());
    let config = config();
    let registry = registry();
    let oracle = HeuristicOracle::default();
    let collector = Collector::new(&config, &registry, &oracle, &store);
    let sources = ["ENTSOE", "OPSD"];

    let expected = collector.collect(&sources, &CollectOptions::recompute()).unwrap();
    let key = CacheKey::reduced(&["ENTSOE".into(), "OPSD".into()]);
    std::fs::write(store.artifact_path(&key), b"[]").unwrap();

    let again = collector.collect(&sources, &CollectOptions::default()).unwrap();
    assert_eq!(again, expected);
    assert!(store.read(&key).is_ok());
}

#[test]
fn matched_data_exports_to_csv() {
    let cache_dir = tempdir().unwrap();
    let out_dir = tempdir().unwrap();
    let store = DirCacheStore::new(cache_dir.path());
    let config = config();
    let registry = registry();
    let oracle = HeuristicOracle::default();
    let collector = Collector::new(&config, &registry, &oracle, &store);

    let records = collector.matched_data(&MatchedDataOptions::default()).unwrap();
    let names: Vec<&str> = records.iter().map(|r| r.descriptor.name.as_str()).collect();
    assert_eq!(names, vec!["Neurath Unit 1", "Isar 2", "Aguayo", "Staudinger 5"]);

    let path = out_dir.path().join("matched.csv");
    write_reduced_csv(&records, &path).unwrap();
    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.lines().count(), 5);
    assert!(content.contains("\"{\"\"ENTSOE\"\":[\"\"e4\"\"]}\""));
}

#[test]
fn missing_source_file_aborts() {
    let cache_dir = tempdir().unwrap();
    let store = DirCacheStore::new(cache_dir.path());
    let config = config();
    let mut registry = registry();
    registry.register("GPD", CsvSource::new("GPD", fixtures_dir().join("does-not-exist.csv")));
    let oracle = HeuristicOracle::default();
    let collector = Collector::new(&config, &registry, &oracle, &store);

    let err = collector
        .collect(&["ENTSOE", "GPD"], &CollectOptions::recompute())
        .unwrap_err();
    assert!(err.to_string().contains("source 'GPD' unavailable"));
}
