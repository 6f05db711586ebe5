use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use crate::error::PipelineError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingConfig {
    /// Source names, most trustworthy first.
    #[serde(default)]
    pub source_reliability_order: Vec<String>,
    /// Minimum oracle confidence for a cross-source match.
    pub match_threshold: f64,
    /// Minimum oracle confidence for merging two units of one source.
    pub aggregation_threshold: f64,
    /// Units further apart than this are never aggregated.
    pub distance_threshold_km: f64,
    #[serde(default)]
    pub prefilter: PrefilterConfig,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
    #[serde(default)]
    pub matching_sources: Vec<String>,
    #[serde(default)]
    pub fully_included_sources: Vec<String>,
    #[serde(default)]
    pub post: PostProcessConfig,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            source_reliability_order: Vec::new(),
            match_threshold: 0.8,
            aggregation_threshold: 0.9,
            distance_threshold_km: 5.0,
            prefilter: PrefilterConfig::default(),
            sources: BTreeMap::new(),
            matching_sources: Vec::new(),
            fully_included_sources: Vec::new(),
            post: PostProcessConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Candidate pre-filters
// ---------------------------------------------------------------------------

/// Cheap checks applied before a cross-source pair is handed to the oracle.
#[derive(Debug, Clone, Deserialize)]
pub struct PrefilterConfig {
    #[serde(default = "default_true")]
    pub same_country: bool,
    /// Minimum `min/max` capacity ratio. `0` disables the check.
    #[serde(default = "default_capacity_ratio")]
    pub capacity_ratio: f64,
    #[serde(default)]
    pub max_distance_km: Option<f64>,
}

impl Default for PrefilterConfig {
    fn default() -> Self {
        Self {
            same_country: true,
            capacity_ratio: default_capacity_ratio(),
            max_distance_km: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_capacity_ratio() -> f64 {
    0.5
}

// ---------------------------------------------------------------------------
// Per-source settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceConfig {
    /// The source already reports whole plants; skip unit aggregation.
    #[serde(default)]
    pub aggregated_units: bool,
}

// ---------------------------------------------------------------------------
// Post-processing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostProcessConfig {
    /// Reduced records backed by exactly one of these source sets are dropped.
    #[serde(default)]
    pub drop_combinations: Vec<Vec<String>>,
    /// Countries for which `drop_combinations` does not apply.
    #[serde(default)]
    pub exempt_countries: Vec<String>,
    /// Fueltypes kept as-is when uncommon fueltypes are subsumed.
    #[serde(default)]
    pub common_fueltypes: Vec<String>,
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl MatchingConfig {
    pub fn from_toml(input: &str) -> Result<Self, PipelineError> {
        let config: MatchingConfig =
            toml::from_str(input).map_err(|e| PipelineError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        for (label, value) in [
            ("match_threshold", self.match_threshold),
            ("aggregation_threshold", self.aggregation_threshold),
            ("prefilter.capacity_ratio", self.prefilter.capacity_ratio),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PipelineError::ConfigValidation(format!(
                    "{label} must be within [0, 1], got {value}"
                )));
            }
        }

        if !(self.distance_threshold_km > 0.0) {
            return Err(PipelineError::ConfigValidation(format!(
                "distance_threshold_km must be positive, got {}",
                self.distance_threshold_km
            )));
        }

        if let Some(max) = self.prefilter.max_distance_km {
            if !(max > 0.0) {
                return Err(PipelineError::ConfigValidation(format!(
                    "prefilter.max_distance_km must be positive, got {max}"
                )));
            }
        }

        let mut seen = BTreeSet::new();
        for name in &self.source_reliability_order {
            if !seen.insert(name.as_str()) {
                return Err(PipelineError::ConfigValidation(format!(
                    "source '{name}' listed twice in source_reliability_order"
                )));
            }
        }

        for combo in &self.post.drop_combinations {
            if combo.is_empty() {
                return Err(PipelineError::ConfigValidation(
                    "post.drop_combinations entries must name at least one source".into(),
                ));
            }
        }

        Ok(())
    }

    /// Whether `source` reports plants rather than units.
    pub fn is_preaggregated(&self, source: &str) -> bool {
        self.sources.get(source).map(|s| s.aggregated_units).unwrap_or(false)
    }

    /// Rank of `source` for fusion: position in the reliability order, then
    /// position in `requested` for sources the order does not list.
    pub fn source_rank(&self, source: &str, requested: &[String]) -> (usize, usize) {
        let listed = self
            .source_reliability_order
            .iter()
            .position(|s| s == source)
            .unwrap_or(usize::MAX);
        let asked = requested.iter().position(|s| s == source).unwrap_or(usize::MAX);
        (listed, asked)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
