//! Pairwise similarity between two record descriptors.
//!
//! The pipeline only needs a confidence in `[0, 1]` and compares it with a
//! configured threshold. [`HeuristicOracle`] is the stock implementation.

use plantmatch_core::Descriptor;

/// Scores how likely two descriptors denote the same unit or plant.
pub trait SimilarityOracle: Send + Sync {
    /// Confidence in `[0, 1]`. Must be symmetric.
    fn score(&self, a: &Descriptor, b: &Descriptor) -> f64;
}

impl<F> SimilarityOracle for F
where
    F: Fn(&Descriptor, &Descriptor) -> f64 + Send + Sync,
{
    fn score(&self, a: &Descriptor, b: &Descriptor) -> f64 {
        self(a, b)
    }
}

// ---------------------------------------------------------------------------
// Heuristic oracle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OracleWeights {
    pub name: f64,
    pub fueltype: f64,
    pub location: f64,
    pub capacity: f64,
}

impl Default for OracleWeights {
    fn default() -> Self {
        Self {
            name: 0.5,
            fueltype: 0.15,
            location: 0.25,
            capacity: 0.1,
        }
    }
}

/// Weighted mean of name, fueltype, location and capacity similarity.
///
/// Signals a pair cannot provide (missing coordinates, zero capacity, blank
/// fueltype) drop out of both numerator and denominator.
#[derive(Debug, Clone)]
pub struct HeuristicOracle {
    pub weights: OracleWeights,
    /// Distance at which location similarity reaches zero.
    pub location_scale_km: f64,
}

impl Default for HeuristicOracle {
    fn default() -> Self {
        Self {
            weights: OracleWeights::default(),
            location_scale_km: 10.0,
        }
    }
}

impl SimilarityOracle for HeuristicOracle {
    fn score(&self, a: &Descriptor, b: &Descriptor) -> f64 {
        let w = &self.weights;
        let mut total = w.name * name_similarity(&a.name, &b.name);
        let mut weight = w.name;

        let (fa, fb) = (a.fueltype.trim(), b.fueltype.trim());
        if !fa.is_empty() && !fb.is_empty() {
            total += w.fueltype * if fa.eq_ignore_ascii_case(fb) { 1.0 } else { 0.0 };
            weight += w.fueltype;
        }

        if let Some(d) = a.distance_km(b) {
            total += w.location * (1.0 - d / self.location_scale_km).max(0.0);
            weight += w.location;
        }

        if a.capacity_mw > 0.0 && b.capacity_mw > 0.0 {
            total += w.capacity * a.capacity_mw.min(b.capacity_mw) / a.capacity_mw.max(b.capacity_mw);
            weight += w.capacity;
        }

        if weight > 0.0 {
            (total / weight).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Tokens that say nothing about which plant a name refers to.
const GENERIC_TOKENS: &[&str] = &[
    "unit", "units", "block", "blocks", "power", "plant", "station", "powerstation", "generating",
    "kraftwerk", "centrale", "central", "ccgt", "chp", "gt", "st", "npp", "hpp", "tpp",
    "i", "ii", "iii", "iv", "v", "vi",
];

/// Lower-case, strip punctuation, drop generic words and unit numbers.
pub fn normalize_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let tokens: Vec<&str> = cleaned
        .split_whitespace()
        .filter(|t| !GENERIC_TOKENS.contains(t))
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .collect();

    if tokens.is_empty() {
        cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
    } else {
        tokens.join(" ")
    }
}

/// Jaro-Winkler similarity of the normalized names.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let (na, nb) = (normalize_name(a), normalize_name(b));
    if na.is_empty() || nb.is_empty() {
        return 0.0;
    }
    strsim::jaro_winkler(&na, &nb)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(name: &str, fuel: &str, cap: f64) -> Descriptor {
        Descriptor::new(name, fuel, "Germany", cap)
    }

    #[test]
    fn normalize_drops_unit_numbers() {
        assert_eq!(normalize_name("Plant X Unit 1"), "x");
        assert_eq!(normalize_name("Plant X Unit 2"), "x");
        assert_eq!(normalize_name("Kraftwerk Neurath Block F"), "neurath f");
        assert_eq!(normalize_name("Riverside Power"), "riverside");
    }

    #[test]
    fn normalize_keeps_something_when_everything_is_generic() {
        assert_eq!(normalize_name("Power Plant 2"), "power plant 2");
    }

    #[test]
    fn identical_units_score_one() {
        let a = desc("Plant X Unit 1", "Hard Coal", 50.0).with_location(51.0, 6.5);
        let b = desc("Plant X Unit 2", "Hard Coal", 50.0).with_location(51.0, 6.5);
        let s = HeuristicOracle::default().score(&a, &b);
        assert!((s - 1.0).abs() < 1e-9, "got {s}");
    }

    #[test]
    fn missing_location_falls_back_to_remaining_signals() {
        let a = desc("Riverside", "Hydro", 100.0);
        let b = desc("Riverside Power", "Hydro", 100.0).with_location(47.0, 11.0);
        let s = HeuristicOracle::default().score(&a, &b);
        assert!((s - 1.0).abs() < 1e-9, "got {s}");
    }

    #[test]
    fn different_fuel_and_far_apart_scores_low() {
        let a = desc("Neurath", "Lignite", 4000.0).with_location(51.03, 6.61);
        let b = desc("Isar", "Nuclear", 1400.0).with_location(48.6, 12.3);
        let s = HeuristicOracle::default().score(&a, &b);
        assert!(s < 0.5, "got {s}");
    }

    #[test]
    fn score_is_symmetric() {
        let a = desc("Staudinger 5", "Hard Coal", 510.0).with_location(50.08, 8.95);
        let b = desc("Grosskrotzenburg", "Hard Coal", 500.0).with_location(50.09, 8.96);
        let o = HeuristicOracle::default();
        assert!((o.score(&a, &b) - o.score(&b, &a)).abs() < 1e-12);
    }

    #[test]
    fn closures_are_oracles() {
        let fixed = |_: &Descriptor, _: &Descriptor| 0.9;
        let a = desc("A", "Wind", 1.0);
        assert_eq!(fixed.score(&a, &a), 0.9);
    }
}
