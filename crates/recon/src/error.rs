#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (threshold out of range, duplicate source, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// A requested source has no registered reader.
    #[error("unknown source: {0}")]
    UnknownSource(String),
    /// The source reader failed. Aborts the whole request.
    #[error("source '{name}' unavailable: {reason}")]
    SourceUnavailable { name: String, reason: String },
    /// The source returned records that break the unit contract.
    #[error("source '{name}' returned invalid units: {reason}")]
    InvalidSource { name: String, reason: String },
    /// A cache artifact exists but cannot be used.
    #[error("cache artifact '{key}' is corrupt: {reason}")]
    CacheCorrupt { key: String, reason: String },
    /// Missing required column in a tabular source.
    #[error("source '{name}': missing column '{column}'")]
    MissingColumn { name: String, column: String },
    /// Field parse error in a tabular source.
    #[error("source '{name}', record '{record_id}': cannot parse {field} '{value}'")]
    FieldParse {
        name: String,
        record_id: String,
        field: String,
        value: String,
    },
    /// IO error (file read, write, rename).
    #[error("IO error: {0}")]
    Io(String),
}

impl PipelineError {
    pub fn source_unavailable(name: &str, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}
