//! Adjustments applied to a reduced dataset after matching.

use std::collections::{BTreeSet, HashSet};

use plantmatch_core::{PlantRecord, ReducedPlantRecord};
use tracing::info;

pub const OTHER_FUELTYPE: &str = "Other";

/// Append every plant of `source` that no reduced record already covers.
///
/// A plant counts as covered when any of its ids appears in some record's
/// `project_id[source]`.
pub fn extend_by_non_matched(
    mut reduced: Vec<ReducedPlantRecord>,
    source: &str,
    plants: &[PlantRecord],
) -> Vec<ReducedPlantRecord> {
    let covered: HashSet<&str> = reduced
        .iter()
        .flat_map(|r| r.project_id.ids(source))
        .map(String::as_str)
        .collect();

    let missing: Vec<ReducedPlantRecord> = plants
        .iter()
        .filter(|p| p.source == source)
        .filter(|p| !p.ids().iter().any(|id| covered.contains(id.as_str())))
        .map(ReducedPlantRecord::from_plant)
        .collect();

    info!(source, added = missing.len(), "extended by non-matched plants");
    reduced.extend(missing);
    reduced
}

/// Drop records backed by exactly one of `combinations` unless the record's
/// country is exempt.
pub fn drop_source_combinations(
    reduced: Vec<ReducedPlantRecord>,
    combinations: &[Vec<String>],
    exempt_countries: &[String],
) -> Vec<ReducedPlantRecord> {
    let combos: Vec<BTreeSet<&str>> = combinations
        .iter()
        .map(|c| c.iter().map(String::as_str).collect())
        .collect();

    let before = reduced.len();
    let kept: Vec<ReducedPlantRecord> = reduced
        .into_iter()
        .filter(|r| {
            let exempt = exempt_countries
                .iter()
                .any(|c| c.eq_ignore_ascii_case(r.descriptor.country.trim()));
            if exempt {
                return true;
            }
            let sources: BTreeSet<&str> = r.project_id.sources().collect();
            !combos.contains(&sources)
        })
        .collect();

    info!(dropped = before - kept.len(), "dropped source combinations");
    kept
}

/// Rename every fueltype outside `common` to [`OTHER_FUELTYPE`].
pub fn subsume_uncommon_fueltypes(mut reduced: Vec<ReducedPlantRecord>, common: &[String]) -> Vec<ReducedPlantRecord> {
    let mut renamed = 0;
    for record in &mut reduced {
        let fueltype = &record.descriptor.fueltype;
        if !common.iter().any(|c| c.eq_ignore_ascii_case(fueltype)) && fueltype != OTHER_FUELTYPE {
            record.descriptor.fueltype = OTHER_FUELTYPE.to_string();
            renamed += 1;
        }
    }
    info!(renamed, "subsumed uncommon fueltypes");
    reduced
}
