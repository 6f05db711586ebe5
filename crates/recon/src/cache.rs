//! Cache keys, storage seam and the update-mode state machine.
//!
//! Every persisted artifact is a JSON envelope carrying the exact key it was
//! written for. A read whose envelope key differs from the requested one is a
//! miss, never a partial hit. Stores replace artifacts whole.

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PipelineError;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// `source_id → group` assignments for one source.
    AggregationGroups,
    /// Accepted match edges between exactly two sources.
    PairMatches,
    /// Match clusters for a requested source set.
    Matched,
    /// Reduced records for a requested source set.
    Reduced,
}

/// Identifies one artifact. `sources` is always sorted and de-duplicated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub kind: ArtifactKind,
    pub sources: Vec<String>,
}

impl CacheKey {
    pub fn new<I, S>(kind: ArtifactKind, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut sources: Vec<String> = sources.into_iter().map(Into::into).collect();
        sources.sort();
        sources.dedup();
        Self { kind, sources }
    }

    pub fn aggregation(source: &str) -> Self {
        Self::new(ArtifactKind::AggregationGroups, [source])
    }

    pub fn pair(a: &str, b: &str) -> Self {
        Self::new(ArtifactKind::PairMatches, [a, b])
    }

    pub fn matched(sources: &[String]) -> Self {
        Self::new(ArtifactKind::Matched, sources.iter().cloned())
    }

    pub fn reduced(sources: &[String]) -> Self {
        Self::new(ArtifactKind::Reduced, sources.iter().cloned())
    }

    /// File-name friendly stem, e.g. `Matched_CARMA_ENTSOE_reduced`.
    pub fn stem(&self) -> String {
        let joined = self
            .sources
            .iter()
            .map(|s| s.to_uppercase())
            .collect::<Vec<_>>()
            .join("_");
        match self.kind {
            ArtifactKind::AggregationGroups => format!("aggregation_groups_{joined}"),
            ArtifactKind::PairMatches => format!("matches_{joined}"),
            ArtifactKind::Matched => format!("Matched_{joined}"),
            ArtifactKind::Reduced => format!("Matched_{joined}_reduced"),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stem())
    }
}

// ---------------------------------------------------------------------------
// Storage seam
// ---------------------------------------------------------------------------

/// Keyed byte storage for cache artifacts.
///
/// `write` must be atomic: a concurrent reader sees the old artifact or the
/// new one, never a mix.
pub trait CacheStore: Send + Sync {
    fn exists(&self, key: &CacheKey) -> bool;
    fn read(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, PipelineError>;
    fn write(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), PipelineError>;
}

/// In-process store, mostly for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: RwLock<BTreeMap<CacheKey, Vec<u8>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        self.entries.read().keys().cloned().collect()
    }
}

impl CacheStore for MemoryCacheStore {
    fn exists(&self, key: &CacheKey) -> bool {
        self.entries.read().contains_key(key)
    }

    fn read(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, PipelineError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn write(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), PipelineError> {
        self.entries.write().insert(key.clone(), bytes.to_vec());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Policies + update mode
// ---------------------------------------------------------------------------

/// What one stage may do with its cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Replay a stored artifact instead of computing, when one is valid.
    pub reuse: bool,
    /// Store what was computed.
    pub persist: bool,
}

impl CachePolicy {
    pub const RECOMPUTE: Self = Self { reuse: false, persist: true };
    pub const REUSE: Self = Self { reuse: true, persist: true };
    pub const EPHEMERAL: Self = Self { reuse: false, persist: false };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateMode {
    ForceRecompute,
    ReuseAggregationOnly,
    ReuseMatchesOnly,
    ReuseBoth,
    /// Read the final artifact and skip every stage.
    FullReplay,
}

impl UpdateMode {
    /// Resolve the requested flags against the presence of the final artifact.
    ///
    /// Without `update` the final artifact is replayed; if it is missing the
    /// run is forced to recompute everything, whatever reuse was asked for.
    pub fn resolve(
        update: bool,
        use_saved_aggregation: bool,
        use_saved_matches: bool,
        final_present: bool,
    ) -> Self {
        if !update {
            return if final_present {
                Self::FullReplay
            } else {
                Self::ForceRecompute
            };
        }
        match (use_saved_aggregation, use_saved_matches) {
            (false, false) => Self::ForceRecompute,
            (true, false) => Self::ReuseAggregationOnly,
            (false, true) => Self::ReuseMatchesOnly,
            (true, true) => Self::ReuseBoth,
        }
    }

    pub fn aggregation_policy(self) -> CachePolicy {
        match self {
            Self::ReuseAggregationOnly | Self::ReuseBoth | Self::FullReplay => CachePolicy::REUSE,
            Self::ForceRecompute | Self::ReuseMatchesOnly => CachePolicy::RECOMPUTE,
        }
    }

    pub fn matching_policy(self) -> CachePolicy {
        match self {
            Self::ReuseMatchesOnly | Self::ReuseBoth | Self::FullReplay => CachePolicy::REUSE,
            Self::ForceRecompute | Self::ReuseAggregationOnly => CachePolicy::RECOMPUTE,
        }
    }
}

impl fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ForceRecompute => write!(f, "FORCE_RECOMPUTE"),
            Self::ReuseAggregationOnly => write!(f, "REUSE_AGGREGATION_ONLY"),
            Self::ReuseMatchesOnly => write!(f, "REUSE_MATCHES_ONLY"),
            Self::ReuseBoth => write!(f, "REUSE_BOTH"),
            Self::FullReplay => write!(f, "FULL_REPLAY"),
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ArtifactOut<'p, T: Serialize> {
    key: &'p CacheKey,
    engine_version: &'static str,
    written_at: String,
    payload: &'p T,
}

#[derive(Deserialize)]
struct ArtifactIn {
    key: CacheKey,
    #[allow(dead_code)]
    engine_version: String,
    #[allow(dead_code)]
    written_at: String,
    payload: serde_json::Value,
}

/// Typed, validated access to a [`CacheStore`].
pub struct CacheController<'a> {
    store: &'a dyn CacheStore,
}

impl<'a> CacheController<'a> {
    pub fn new(store: &'a dyn CacheStore) -> Self {
        Self { store }
    }

    pub fn exists(&self, key: &CacheKey) -> bool {
        self.store.exists(key)
    }

    /// Read and decode `key`.
    ///
    /// `Ok(None)` when absent or written for another key; `CacheCorrupt` when
    /// the bytes exist but do not decode.
    pub fn read_strict<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>, PipelineError> {
        let corrupt = |reason: String| PipelineError::CacheCorrupt {
            key: key.to_string(),
            reason,
        };

        let Some(bytes) = self.store.read(key).map_err(|e| corrupt(e.to_string()))? else {
            return Ok(None);
        };

        let artifact: ArtifactIn =
            serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;
        if &artifact.key != key {
            warn!(requested = %key, found = %artifact.key, "cache key mismatch, treating as absent");
            return Ok(None);
        }

        serde_json::from_value(artifact.payload)
            .map(Some)
            .map_err(|e| corrupt(e.to_string()))
    }

    /// Like [`read_strict`](Self::read_strict) but a corrupt artifact reads as absent.
    pub fn load<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        match self.read_strict(key) {
            Ok(Some(value)) => {
                debug!(key = %key, "cache hit");
                Some(value)
            }
            Ok(None) => {
                debug!(key = %key, "cache miss");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "ignoring unreadable cache artifact");
                None
            }
        }
    }

    pub fn save<T: Serialize>(&self, key: &CacheKey, payload: &T) -> Result<(), PipelineError> {
        let artifact = ArtifactOut {
            key,
            engine_version: env!("CARGO_PKG_VERSION"),
            written_at: chrono::Utc::now().to_rfc3339(),
            payload,
        };
        let bytes = serde_json::to_vec(&artifact).map_err(|e| PipelineError::Io(e.to_string()))?;
        self.store.write(key, &bytes)?;
        debug!(key = %key, bytes = bytes.len(), "cache artifact written");
        Ok(())
    }

    /// Persist when `policy` asks for it. A failed write only costs the cache.
    pub fn persist<T: Serialize>(&self, key: &CacheKey, payload: &T, policy: CachePolicy) {
        if !policy.persist {
            return;
        }
        if let Err(e) = self.save(key, payload) {
            warn!(key = %key, error = %e, "failed to write cache artifact");
        }
    }
}
