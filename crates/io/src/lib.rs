// File collaborators for the matching pipeline

pub mod csv;
pub mod export;
pub mod store;

pub use self::csv::{ColumnMapping, CsvSource};
pub use export::write_reduced_csv;
pub use store::DirCacheStore;

/// Write `bytes` next to `path` and rename over it, so readers never see a
/// half-written file.
pub(crate) fn write_atomic(path: &std::path::Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}
