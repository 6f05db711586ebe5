// Directory-backed cache store

use std::fs;
use std::path::{Path, PathBuf};

use plantmatch_recon::{CacheKey, CacheStore, PipelineError};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::write_atomic;

/// One `<stem>.json` file per artifact with a `<stem>.sha256` checksum next to it.
#[derive(Debug, Clone)]
pub struct DirCacheStore {
    root: PathBuf,
}

impl DirCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<user cache dir>/plantmatch`, if the platform has a cache dir.
    pub fn default_root() -> Option<PathBuf> {
        dirs::cache_dir().map(|d| d.join("plantmatch"))
    }

    pub fn open_default() -> Result<Self, PipelineError> {
        Self::default_root()
            .map(Self::new)
            .ok_or_else(|| PipelineError::Io("no cache directory on this platform".into()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}.json", key.stem()))
    }

    fn checksum_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}.sha256", key.stem()))
    }
}

fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

impl CacheStore for DirCacheStore {
    fn exists(&self, key: &CacheKey) -> bool {
        self.artifact_path(key).is_file()
    }

    fn read(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, PipelineError> {
        let path = self.artifact_path(key);
        if !path.is_file() {
            return Ok(None);
        }
        let corrupt = |reason: String| PipelineError::CacheCorrupt {
            key: key.to_string(),
            reason,
        };

        let bytes = fs::read(&path).map_err(|e| PipelineError::Io(format!("{}: {e}", path.display())))?;
        let expected = fs::read_to_string(self.checksum_path(key)).map_err(|e| corrupt(format!("checksum unreadable: {e}")))?;
        if expected.trim() != checksum(&bytes) {
            return Err(corrupt("checksum mismatch".into()));
        }
        Ok(Some(bytes))
    }

    fn write(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), PipelineError> {
        let io_err = |e: std::io::Error| PipelineError::Io(format!("{}: {e}", self.root.display()));
        fs::create_dir_all(&self.root).map_err(io_err)?;
        // Checksum before artifact; a torn pair reads as a mismatch.
        write_atomic(&self.checksum_path(key), checksum(bytes).as_bytes()).map_err(io_err)?;
        write_atomic(&self.artifact_path(key), bytes).map_err(io_err)?;
        debug!(key = %key, path = %self.artifact_path(key).display(), "wrote cache artifact");
        Ok(())
    }
}
