use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cluster::PlantKey;
use crate::geo::haversine_km;

// ---------------------------------------------------------------------------
// Descriptive fields
// ---------------------------------------------------------------------------

/// The descriptive fields shared by units, plants and reduced records.
///
/// Optional fields are `None` when the source does not report them; nothing
/// downstream invents a value for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub name: String,
    pub fueltype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technology: Option<String>,
    pub country: String,
    pub capacity_mw: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commissioning_year: Option<i32>,
}

impl Descriptor {
    pub fn new(name: impl Into<String>, fueltype: impl Into<String>, country: impl Into<String>, capacity_mw: f64) -> Self {
        Self {
            name: name.into(),
            fueltype: fueltype.into(),
            technology: None,
            country: country.into(),
            capacity_mw,
            latitude: None,
            longitude: None,
            commissioning_year: None,
        }
    }

    pub fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn with_technology(mut self, technology: impl Into<String>) -> Self {
        self.technology = Some(technology.into());
        self
    }

    pub fn with_commissioning_year(mut self, year: i32) -> Self {
        self.commissioning_year = Some(year);
        self
    }

    /// `(latitude, longitude)` when both coordinates are present.
    pub fn location(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }

    /// Distance to `other` in km, `None` if either side lacks coordinates.
    pub fn distance_km(&self, other: &Descriptor) -> Option<f64> {
        Some(haversine_km(self.location()?, other.location()?))
    }
}

// ---------------------------------------------------------------------------
// Units
// ---------------------------------------------------------------------------

/// One generating unit as reported by one source. Never mutated after read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub source: String,
    pub source_id: String,
    #[serde(flatten)]
    pub descriptor: Descriptor,
}

impl UnitRecord {
    pub fn new(source: impl Into<String>, source_id: impl Into<String>, descriptor: Descriptor) -> Self {
        Self {
            source: source.into(),
            source_id: source_id.into(),
            descriptor,
        }
    }
}

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

/// Source name → ordered list of the original `source_id`s folded into a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(BTreeMap<String, Vec<String>>);

impl ProjectId {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids(source: impl Into<String>, ids: Vec<String>) -> Self {
        let mut map = BTreeMap::new();
        map.insert(source.into(), ids);
        Self(map)
    }

    pub fn single(source: impl Into<String>, id: impl Into<String>) -> Self {
        Self::from_ids(source, vec![id.into()])
    }

    pub fn push(&mut self, source: &str, id: impl Into<String>) {
        let id = id.into();
        let ids = self.0.entry(source.to_string()).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    /// Union with `other`. Per-source order is kept, ids already present are skipped.
    pub fn merge(&mut self, other: &ProjectId) {
        for (source, ids) in &other.0 {
            for id in ids {
                self.push(source, id.clone());
            }
        }
    }

    pub fn ids(&self, source: &str) -> &[String] {
        self.0.get(source).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn contains(&self, source: &str, id: &str) -> bool {
        self.ids(source).iter().any(|i| i == id)
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    /// Total number of ids across all sources.
    pub fn len(&self) -> usize {
        self.0.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Plants
// ---------------------------------------------------------------------------

/// One or more same-source units believed to form one physical plant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantRecord {
    pub source: String,
    #[serde(flatten)]
    pub descriptor: Descriptor,
    pub project_id: ProjectId,
}

impl PlantRecord {
    /// Wrap a unit that already describes a whole plant.
    pub fn from_unit(unit: &UnitRecord) -> Self {
        Self {
            source: unit.source.clone(),
            descriptor: unit.descriptor.clone(),
            project_id: ProjectId::single(unit.source.clone(), unit.source_id.clone()),
        }
    }

    /// The unit ids this plant was built from.
    pub fn ids(&self) -> &[String] {
        self.project_id.ids(&self.source)
    }

    /// Stable identity: source plus the first folded-in unit id.
    pub fn key(&self) -> PlantKey {
        PlantKey {
            source: self.source.clone(),
            id: self.ids().first().cloned().unwrap_or_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reduced output
// ---------------------------------------------------------------------------

/// The fused output row for one match cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducedPlantRecord {
    #[serde(flatten)]
    pub descriptor: Descriptor,
    pub project_id: ProjectId,
}

impl ReducedPlantRecord {
    /// A plant that matched nothing, carried over unchanged.
    pub fn from_plant(plant: &PlantRecord) -> Self {
        Self {
            descriptor: plant.descriptor.clone(),
            project_id: plant.project_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_id_merge_keeps_order_and_skips_duplicates() {
        let mut a = ProjectId::from_ids("A", vec!["a1".into(), "a2".into()]);
        let mut b = ProjectId::from_ids("A", vec!["a2".into(), "a3".into()]);
        b.push("B", "b1");
        a.merge(&b);

        assert_eq!(a.ids("A"), &["a1", "a2", "a3"]);
        assert_eq!(a.ids("B"), &["b1"]);
        assert_eq!(a.len(), 4);
        assert_eq!(a.sources().collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn missing_source_has_no_ids() {
        let p = ProjectId::single("A", "a1");
        assert!(p.ids("B").is_empty());
        assert!(p.contains("A", "a1"));
        assert!(!p.contains("A", "a2"));
    }

    #[test]
    fn plant_key_uses_first_unit() {
        let plant = PlantRecord {
            source: "A".into(),
            descriptor: Descriptor::new("X", "Hard Coal", "Germany", 100.0),
            project_id: ProjectId::from_ids("A", vec!["u7".into(), "u3".into()]),
        };
        let key = plant.key();
        assert_eq!(key.source, "A");
        assert_eq!(key.id, "u7");
    }

    #[test]
    fn location_requires_both_coordinates() {
        let mut d = Descriptor::new("X", "Wind", "Spain", 10.0);
        d.latitude = Some(40.0);
        assert!(d.location().is_none());
        assert!(d.distance_km(&d.clone().with_location(40.0, 1.0)).is_none());
        let d = d.with_location(40.0, -3.0);
        assert_eq!(d.location(), Some((40.0, -3.0)));
    }

    #[test]
    fn plant_serializes_flat_with_project_id_map() {
        let plant = PlantRecord::from_unit(&UnitRecord::new(
            "A",
            "u1",
            Descriptor::new("Riverside", "Hydro", "Austria", 100.0),
        ));
        let json = serde_json::to_value(&plant).unwrap();
        assert_eq!(json["name"], "Riverside");
        assert_eq!(json["project_id"]["A"][0], "u1");
        assert!(json.get("latitude").is_none());

        let back: PlantRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, plant);
    }
}
