//! `plantmatch-recon`: entity resolution and fusion of power plant records.
//!
//! Pure engine crate: units go in through [`SourceReader`]s, reduced plant
//! records come out. Similarity scoring and cache storage are traits so the
//! io crate (or a test) can plug in its own.

pub mod aggregate;
pub mod cache;
pub mod collect;
pub mod config;
pub mod error;
pub mod heuristics;
pub mod matcher;
pub mod oracle;
pub mod reduce;
pub mod summary;
pub mod union_find;

pub use cache::{CacheController, CacheKey, CachePolicy, CacheStore, MemoryCacheStore, UpdateMode};
pub use collect::{Collection, CollectOptions, Collector, MatchedDataOptions, SourceReader, SourceRegistry};
pub use config::MatchingConfig;
pub use error::PipelineError;
pub use oracle::{HeuristicOracle, SimilarityOracle};
pub use summary::{summarize, CollectionSummary};
