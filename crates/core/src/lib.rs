//! `plantmatch-core`: shared record types for the plant matching pipeline.
//!
//! Units come from source readers, plants from aggregation, clusters from
//! cross-source matching and reduced records from fusion. Everything here is
//! plain data; the algorithms live in `plantmatch-recon`.

pub mod cluster;
pub mod geo;
pub mod record;

pub use cluster::{MatchCluster, MatchEdge, PlantKey};
pub use record::{Descriptor, PlantRecord, ProjectId, ReducedPlantRecord, UnitRecord};
